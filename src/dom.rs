//! Minimal retained element model.
//!
//! The pipeline is a DOM-embedded widget in its host runtime; this module
//! provides the small retained tree it mutates so src writes, placeholder
//! insertion/removal, attribute propagation, and ghost marking are
//! observable without a full document implementation. Hosts embedding the
//! crate can treat this as the scratch model mirrored into their real
//! document by the mutation scheduler.

use rustc_hash::FxHashMap;

/// Identifier of a node in an [`ElementModel`] arena.
///
/// Ids are never reused; a detached node keeps its id so late async
/// results can probe for it and observe that it is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

#[derive(Debug)]
struct Node {
  tag: String,
  attrs: FxHashMap<String, String>,
  children: Vec<NodeId>,
  parent: Option<NodeId>,
  /// Compositing opacity, 0.0..=1.0. Placeholder canvases start at 0.
  opacity: f32,
  attached: bool,
}

/// Arena-backed element tree.
#[derive(Debug, Default)]
pub struct ElementModel {
  nodes: Vec<Node>,
}

impl ElementModel {
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates a detached element with the given tag name.
  pub fn create_element(&mut self, tag: &str) -> NodeId {
    let id = NodeId(self.nodes.len() as u32);
    self.nodes.push(Node {
      tag: tag.to_string(),
      attrs: FxHashMap::default(),
      children: Vec::new(),
      parent: None,
      opacity: 1.0,
      attached: true,
    });
    id
  }

  fn node(&self, id: NodeId) -> &Node {
    &self.nodes[id.0 as usize]
  }

  fn node_mut(&mut self, id: NodeId) -> &mut Node {
    &mut self.nodes[id.0 as usize]
  }

  /// Tag name of a node.
  pub fn tag_name(&self, id: NodeId) -> &str {
    &self.node(id).tag
  }

  /// True while the node has not been removed from the model.
  ///
  /// Late worker responses and fire-and-forget timers check this before
  /// touching a node; a missing node is a harmless no-op.
  pub fn is_attached(&self, id: NodeId) -> bool {
    self.node(id).attached
  }

  /// Appends `child` to `parent`'s child list.
  pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
    self.node_mut(child).parent = Some(parent);
    self.node_mut(parent).children.push(child);
  }

  /// Detaches a node (and leaves its subtree unreachable).
  pub fn remove(&mut self, id: NodeId) {
    if let Some(parent) = self.node(id).parent {
      let siblings = &mut self.node_mut(parent).children;
      siblings.retain(|c| *c != id);
    }
    let node = self.node_mut(id);
    node.parent = None;
    node.attached = false;
  }

  /// Child ids of a node.
  pub fn children(&self, id: NodeId) -> &[NodeId] {
    &self.node(id).children
  }

  /// First attached child with the given tag name.
  pub fn find_child_by_tag(&self, parent: NodeId, tag: &str) -> Option<NodeId> {
    self
      .children(parent)
      .iter()
      .copied()
      .find(|c| self.node(*c).attached && self.node(*c).tag == tag)
  }

  pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) {
    self.node_mut(id).attrs.insert(name.to_string(), value.to_string());
  }

  pub fn remove_attribute(&mut self, id: NodeId, name: &str) {
    self.node_mut(id).attrs.remove(name);
  }

  /// Attribute value by name, if present.
  pub fn get_attribute_ref(&self, id: NodeId, name: &str) -> Option<&str> {
    self.node(id).attrs.get(name).map(String::as_str)
  }

  /// Presence-only boolean attribute check.
  pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
    self.node(id).attrs.contains_key(name)
  }

  pub fn set_opacity(&mut self, id: NodeId, opacity: f32) {
    self.node_mut(id).opacity = opacity.clamp(0.0, 1.0);
  }

  pub fn opacity(&self, id: NodeId) -> f32 {
    self.node(id).opacity
  }

  /// Adds a token to the node's `class` attribute.
  pub fn add_class(&mut self, id: NodeId, class: &str) {
    if self.has_class(id, class) {
      return;
    }
    let node = self.node_mut(id);
    let entry = node.attrs.entry("class".to_string()).or_default();
    if !entry.is_empty() {
      entry.push(' ');
    }
    entry.push_str(class);
  }

  /// Removes a token from the node's `class` attribute.
  pub fn remove_class(&mut self, id: NodeId, class: &str) {
    let node = self.node_mut(id);
    if let Some(entry) = node.attrs.get_mut("class") {
      let filtered = entry
        .split_ascii_whitespace()
        .filter(|token| *token != class)
        .collect::<Vec<_>>()
        .join(" ");
      *entry = filtered;
    }
  }

  pub fn has_class(&self, id: NodeId, class: &str) -> bool {
    self
      .get_attribute_ref(id, "class")
      .map(|value| value.split_ascii_whitespace().any(|token| token == class))
      .unwrap_or(false)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn append_and_remove_track_attachment() {
    let mut model = ElementModel::new();
    let root = model.create_element("container");
    let img = model.create_element("img");
    model.append_child(root, img);

    assert_eq!(model.children(root), &[img]);
    assert!(model.is_attached(img));

    model.remove(img);
    assert!(model.children(root).is_empty());
    assert!(!model.is_attached(img));
  }

  #[test]
  fn find_child_by_tag_skips_detached_nodes() {
    let mut model = ElementModel::new();
    let root = model.create_element("container");
    let canvas = model.create_element("canvas");
    model.append_child(root, canvas);
    assert_eq!(model.find_child_by_tag(root, "canvas"), Some(canvas));

    model.remove(canvas);
    assert_eq!(model.find_child_by_tag(root, "canvas"), None);
  }

  #[test]
  fn class_tokens_round_trip() {
    let mut model = ElementModel::new();
    let img = model.create_element("img");
    model.add_class(img, "ghost");
    model.add_class(img, "ghost");
    model.add_class(img, "contain");

    assert!(model.has_class(img, "ghost"));
    assert_eq!(model.get_attribute_ref(img, "class"), Some("ghost contain"));

    model.remove_class(img, "ghost");
    assert!(!model.has_class(img, "ghost"));
    assert!(model.has_class(img, "contain"));
  }
}
