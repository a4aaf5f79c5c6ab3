//! Image element controller.
//!
//! Top-level orchestrator for one image element: reacts to attribute
//! mutations and layout passes, runs source selection, builds the blur-up
//! placeholder, drives the load controller, and handles fallback on
//! error. All element-model writes go through the host's deferred
//! mutation scheduler; reads happen inline on the caller's thread.
//!
//! State machine: `Unbuilt -> Initialized -> LayingOut -> Loaded |
//! Fallback`. Attribute-triggered and layout-triggered reselection funnel
//! through the same idempotent selection step, and every load session is
//! stamped with a monotonic sequence so a slow superseded load can never
//! overwrite a newer one.

use crate::clock::Clock;
use crate::debug::runtime;
use crate::dom::{ElementModel, NodeId};
use crate::error::{Error, Result, SrcsetError};
use crate::host::{LayoutEnv, MutationScheduler, PreconnectHints};
use crate::loader::{LoadController, LoadSession};
use crate::placeholder::worker::BlurWorker;
use crate::placeholder::{build_placeholder, PlaceholderHandle};
use crate::resource::url_origin;
use crate::srcset::{parse_sizes, SelectionContext, SizesList, SourceSet};
use std::sync::Arc;

/// Candidate-set declaration; takes precedence over `src`.
pub const ATTR_SRCSET: &str = "srcset";
/// Single-URL declaration.
pub const ATTR_SRC: &str = "src";
/// Slot width declaration.
pub const ATTR_SIZES: &str = "sizes";
/// Presence flag: skip loading while the document is prerendering.
pub const ATTR_NOPRERENDER: &str = "noprerender";
/// Presence flag: this element is itself a fallback; nested fallback is
/// forbidden.
pub const ATTR_FALLBACK: &str = "fallback";
/// Palette descriptor for the blur-up placeholder (token format).
pub const ATTR_LOW_RES: &str = "low-res";
/// Palette descriptor for the blur-up placeholder (packed blob format).
pub const ATTR_BLUR: &str = "blur";
/// Presence flag: an image node was server-rendered in place.
pub const ATTR_SSR: &str = "ssr";

/// Class marking the visible image node as visually suppressed after an
/// unrecoverable load failure.
pub const CLASS_GHOST: &str = "ghost";

/// Attributes mirrored from the element onto its inner image node.
const ATTRIBUTES_TO_PROPAGATE: &[&str] = &[
  "alt",
  "title",
  "aria-describedby",
  "aria-label",
  "aria-labelledby",
];

/// Additional passthrough attributes under the native-srcset experiment.
const EXPERIMENTAL_ATTRIBUTES_TO_PROPAGATE: &[&str] = &[ATTR_SRC, ATTR_SRCSET, ATTR_SIZES];

/// Side length of the placeholder canvas, in pixels.
const PLACEHOLDER_CANVAS_SIZE: u32 = 60;

/// Lifecycle state of the element controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
  Unbuilt,
  Initialized,
  LayingOut,
  Loaded,
  Fallback,
}

/// Completion report surfaced by [`ImageElement::pump`].
///
/// Failures are surfaced after local fallback handling so host telemetry
/// can observe them.
#[derive(Debug)]
pub enum ElementEvent {
  Loaded {
    url: String,
    width: u32,
    height: u32,
  },
  LoadFailed {
    error: Error,
    fallback_entered: bool,
  },
  /// A superseded session completed; its result was discarded.
  StaleLoadDropped {
    url: String,
    sequence: u64,
  },
}

/// Counters describing what this element has done so far.
#[derive(Debug, Default, Clone)]
pub struct ElementDiagnostics {
  pub selections: usize,
  pub loads_started: usize,
  pub loads_succeeded: usize,
  pub loads_failed: usize,
  pub stale_completions_dropped: usize,
  pub placeholders_built: usize,
}

/// Host collaborators injected into an element controller.
pub struct ElementDeps {
  pub layout: Arc<dyn LayoutEnv>,
  pub scheduler: Arc<dyn MutationScheduler>,
  pub preconnect: Arc<dyn PreconnectHints>,
  pub loader: LoadController,
  pub worker: Arc<BlurWorker>,
  pub clock: Arc<dyn Clock>,
}

/// Controller for one image element.
pub struct ImageElement {
  deps: ElementDeps,
  container: NodeId,
  state: ElementState,
  img: Option<NodeId>,

  /// Cached candidate-set parse; invalidated on src/srcset mutation.
  source_set: Option<SourceSet>,
  /// Cached sizes parse; invalidated on sizes mutation.
  sizes: Option<Option<SizesList>>,

  /// URL of the most recent selection (displayed or in flight).
  current_url: Option<String>,
  /// Monotonic selection counter; stamps every load session.
  sequence: u64,
  sessions: Vec<LoadSession>,
  placeholder: Option<PlaceholderHandle>,

  allow_fallback: bool,
  fallback_shown: bool,
  first_layout_completed: bool,

  diagnostics: ElementDiagnostics,
}

impl ImageElement {
  /// Creates an unbuilt controller for the element at `container`.
  pub fn new(container: NodeId, deps: ElementDeps) -> Self {
    Self {
      deps,
      container,
      state: ElementState::Unbuilt,
      img: None,
      source_set: None,
      sizes: None,
      current_url: None,
      sequence: 0,
      sessions: Vec::new(),
      placeholder: None,
      allow_fallback: true,
      fallback_shown: false,
      first_layout_completed: false,
      diagnostics: ElementDiagnostics::default(),
    }
  }

  pub fn state(&self) -> ElementState {
    self.state
  }

  pub fn container(&self) -> NodeId {
    self.container
  }

  /// Inner image node, once built.
  pub fn img_node(&self) -> Option<NodeId> {
    self.img
  }

  /// URL of the most recent selection.
  pub fn current_url(&self) -> Option<&str> {
    self.current_url.as_deref()
  }

  /// Current selection counter.
  pub fn sequence(&self) -> u64 {
    self.sequence
  }

  pub fn placeholder(&self) -> Option<&PlaceholderHandle> {
    self.placeholder.as_ref()
  }

  pub fn diagnostics(&self) -> &ElementDiagnostics {
    &self.diagnostics
  }

  /// Number of sessions still awaiting completion.
  pub fn pending_sessions(&self) -> usize {
    self.sessions.len()
  }

  /// Blocks until every pending session has its network result, or
  /// `timeout` passes. The dwell deadline may still gate completion;
  /// this only drains the network side so a following [`pump`] is
  /// deterministic.
  ///
  /// [`pump`]: ImageElement::pump
  pub fn wait_network(&self, timeout: std::time::Duration) -> bool {
    self.sessions.iter().all(|session| session.wait_network(timeout))
  }

  // --------------------------------------------------------------------
  // Build
  // --------------------------------------------------------------------

  /// First-layout initialization: creates (or adopts) the inner image
  /// node and propagates passthrough attributes.
  ///
  /// Build runs with direct model access; only post-build effects are
  /// deferred through the scheduler.
  fn build(&mut self, model: &mut ElementModel) {
    debug_assert_eq!(self.state, ElementState::Unbuilt);

    // An element that is itself a fallback gets no fallback of its own.
    self.allow_fallback = !model.has_attribute(self.container, ATTR_FALLBACK);

    let img = if model.has_attribute(self.container, ATTR_SSR) {
      model.find_child_by_tag(self.container, "img")
    } else {
      None
    };
    let img = img.unwrap_or_else(|| {
      let node = model.create_element("img");
      model.append_child(self.container, node);
      node
    });

    self.propagate_attributes(model, img);
    self.img = Some(img);
    self.state = ElementState::Initialized;
  }

  fn propagate_attributes(&self, model: &mut ElementModel, img: NodeId) {
    let mut names: Vec<&str> = ATTRIBUTES_TO_PROPAGATE.to_vec();
    if runtime::runtime_toggles().truthy(runtime::TOGGLE_NATIVE_SRCSET) {
      names.extend_from_slice(EXPERIMENTAL_ATTRIBUTES_TO_PROPAGATE);
    }
    for name in names {
      if let Some(value) = model.get_attribute_ref(self.container, name).map(str::to_string) {
        model.set_attribute(img, name, &value);
      }
    }
  }

  // --------------------------------------------------------------------
  // Selection
  // --------------------------------------------------------------------

  fn source_set(&mut self, model: &ElementModel) -> Result<&SourceSet> {
    if self.source_set.is_none() {
      let parsed = if let Some(srcset) = model.get_attribute_ref(self.container, ATTR_SRCSET) {
        SourceSet::parse(srcset)?
      } else if let Some(src) = model.get_attribute_ref(self.container, ATTR_SRC) {
        SourceSet::from_src(src)?
      } else {
        return Err(Error::Srcset(SrcsetError::Empty));
      };
      self.source_set = Some(parsed);
    }
    Ok(self.source_set.as_ref().unwrap())
  }

  fn sizes(&mut self, model: &ElementModel) -> Option<&SizesList> {
    if self.sizes.is_none() {
      let parsed = model
        .get_attribute_ref(self.container, ATTR_SIZES)
        .and_then(parse_sizes);
      self.sizes = Some(parsed);
    }
    self.sizes.as_ref().unwrap().as_ref()
  }

  fn selection_context(&mut self, model: &ElementModel) -> SelectionContext {
    let viewport = self.deps.layout.viewport();
    let dpr = self.deps.layout.device_pixel_ratio();
    let mut ctx = SelectionContext::new(viewport.width, dpr);
    if let Some(sizes) = self.sizes(model) {
      ctx = ctx.with_slot_width(sizes.evaluate(viewport.width));
    }
    ctx
  }

  // --------------------------------------------------------------------
  // Layout
  // --------------------------------------------------------------------

  /// Layout pass: builds on first call, re-runs selection, and starts a
  /// new load when the selection changed.
  ///
  /// An unchanged selection is a no-op (no placeholder, no load). A
  /// measured width of zero, or a prerender pass on a `noprerender`
  /// element, skips selection entirely and reports success.
  ///
  /// A placeholder construction failure does not block the load: the
  /// session is already running when the error is returned.
  pub fn layout(&mut self, model: &mut ElementModel) -> Result<()> {
    if self.state == ElementState::Unbuilt {
      self.build(model);
    }

    if self.deps.layout.layout_width() <= 0.0 {
      return Ok(());
    }
    if self.deps.layout.is_prerendering() && model.has_attribute(self.container, ATTR_NOPRERENDER) {
      return Ok(());
    }

    let ctx = self.selection_context(model);
    let selected = self.source_set(model)?.select(ctx).to_string();
    if self.current_url.as_deref() == Some(selected.as_str()) {
      return Ok(());
    }

    self.sequence += 1;
    self.diagnostics.selections += 1;
    self.current_url = Some(selected.clone());
    self.state = ElementState::LayingOut;

    if let Some(origin) = url_origin(&selected) {
      self.deps.preconnect.preconnect(&origin);
    }

    let placeholder_result = self.start_placeholder(model);

    // The visible node's src is written at completion, never here: an
    // in-flight selection must not show up as a stale src.
    let session = self.deps.loader.begin(&selected, self.sequence);
    self.diagnostics.loads_started += 1;
    self.sessions.push(session);

    placeholder_result
  }

  fn start_placeholder(&mut self, model: &ElementModel) -> Result<()> {
    // A ghosted element never gets a placeholder that would obscure the
    // fallback visual.
    if self.fallback_shown {
      return Ok(());
    }

    let descriptor = model
      .get_attribute_ref(self.container, ATTR_LOW_RES)
      .or_else(|| model.get_attribute_ref(self.container, ATTR_BLUR))
      .map(str::to_string);
    let Some(descriptor) = descriptor else {
      return Ok(());
    };

    if let Some(mut old) = self.placeholder.take() {
      old.dispose(&self.deps.scheduler);
    }

    let handle = build_placeholder(
      &descriptor,
      PLACEHOLDER_CANVAS_SIZE,
      PLACEHOLDER_CANVAS_SIZE,
      self.container,
      &self.deps.scheduler,
      &self.deps.worker,
    )?;
    if !handle.is_inert() {
      self.diagnostics.placeholders_built += 1;
    }
    self.placeholder = Some(handle);
    Ok(())
  }

  /// Schedules the `src` write on the inner image node.
  fn apply_src(&self, url: String) {
    let Some(img) = self.img else {
      return;
    };
    self.deps.scheduler.schedule(Box::new(move |model| {
      if model.is_attached(img) {
        model.set_attribute(img, ATTR_SRC, &url);
      }
    }));
  }

  // --------------------------------------------------------------------
  // Attribute mutations
  // --------------------------------------------------------------------

  /// Reacts to a host attribute-mutation notification.
  ///
  /// `changed` holds the names of attributes whose new values are already
  /// visible on the element node. `srcset` takes precedence over `src`
  /// when both mutate; both funnel into the same idempotent selection
  /// step as a layout pass.
  pub fn attributes_changed(&mut self, model: &mut ElementModel, changed: &[&str]) -> Result<()> {
    let mut reselect = false;

    if changed.contains(&ATTR_SRCSET) || changed.contains(&ATTR_SRC) {
      self.source_set = None;
      reselect = true;
    }
    if changed.contains(&ATTR_SIZES) {
      self.sizes = None;
      reselect = true;
    }

    if reselect && self.state != ElementState::Unbuilt {
      return self.layout(model);
    }
    Ok(())
  }

  // --------------------------------------------------------------------
  // Completion pump
  // --------------------------------------------------------------------

  /// Applies due timers and completed load sessions, returning what
  /// happened.
  ///
  /// Call once per host frame (or after advancing a test clock). Stale
  /// completions from sessions superseded by a newer selection are
  /// discarded here, never applied.
  pub fn pump(&mut self) -> Vec<ElementEvent> {
    let now = self.deps.clock.now();
    let mut events = Vec::new();

    if let Some(placeholder) = &mut self.placeholder {
      placeholder.tick(now, &self.deps.scheduler);
    }

    let mut completed: Vec<(u64, String, Result<(u32, u32)>)> = Vec::new();
    self.sessions.retain_mut(|session| {
      match session.try_complete(now) {
        None => true,
        Some(result) => {
          let dims = result.map(|img| img.dimensions());
          completed.push((session.sequence(), session.target_url().to_string(), dims));
          false
        }
      }
    });

    for (sequence, url, result) in completed {
      if sequence != self.sequence {
        self.diagnostics.stale_completions_dropped += 1;
        events.push(ElementEvent::StaleLoadDropped { url, sequence });
        continue;
      }
      match result {
        Ok((width, height)) => {
          self.complete_load(now, &url);
          events.push(ElementEvent::Loaded { url, width, height });
        }
        Err(error) => {
          let fallback_entered = self.fail_load();
          events.push(ElementEvent::LoadFailed {
            error,
            fallback_entered,
          });
        }
      }
    }

    events
  }

  fn complete_load(&mut self, now: std::time::Instant, url: &str) {
    self.diagnostics.loads_succeeded += 1;
    self.state = ElementState::Loaded;
    self.first_layout_completed = true;

    // The visible node's src reflects the completed selection.
    self.apply_src(url.to_string());

    // Clear any transient failure visuals from an earlier fallback.
    if self.fallback_shown {
      self.fallback_shown = false;
      self.set_ghosted(false);
    }

    if let Some(placeholder) = &mut self.placeholder {
      placeholder.on_load_complete(now, &self.deps.scheduler);
    }
  }

  /// Handles a load failure; returns whether the fallback transition
  /// fired.
  fn fail_load(&mut self) -> bool {
    self.diagnostics.loads_failed += 1;

    // Fallback is shown once per element lifetime, and only for failures
    // on the first layout attempt.
    let enter_fallback = !self.first_layout_completed && self.allow_fallback && !self.fallback_shown;
    if enter_fallback {
      self.fallback_shown = true;
      self.state = ElementState::Fallback;
      self.set_ghosted(true);
      if let Some(mut placeholder) = self.placeholder.take() {
        placeholder.dispose(&self.deps.scheduler);
      }
    } else if self.fallback_shown {
      // Still failed; the existing fallback visual stands untouched.
      self.state = ElementState::Fallback;
    } else if self.first_layout_completed {
      // A later reselection failed; keep showing what already loaded.
      self.state = ElementState::Loaded;
    } else {
      self.state = ElementState::Initialized;
    }
    enter_fallback
  }

  fn set_ghosted(&self, ghosted: bool) {
    let Some(img) = self.img else {
      return;
    };
    let container = self.container;
    self.deps.scheduler.schedule(Box::new(move |model| {
      if model.is_attached(img) {
        if ghosted {
          model.add_class(img, CLASS_GHOST);
        } else {
          model.remove_class(img, CLASS_GHOST);
        }
      }
      // The fallback visual is whichever child declares itself one.
      let children: Vec<NodeId> = model.children(container).to_vec();
      for child in children {
        if model.has_attribute(child, ATTR_FALLBACK) {
          model.set_opacity(child, if ghosted { 1.0 } else { 0.0 });
        }
      }
    }));
  }
}
