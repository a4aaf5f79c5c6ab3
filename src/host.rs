//! Host capability interfaces.
//!
//! The surrounding runtime owns layout measurement, mutation scheduling,
//! and connection warm-up. The element controller only ever talks to these
//! traits, which keeps the core testable and the host free to batch DOM
//! writes at a safe point in its frame.

use crate::dom::ElementModel;
use crate::geometry::Size;
use parking_lot::Mutex;
use std::sync::Arc;

/// Scoped layout and visibility measurement.
///
/// Queried on every layout pass; implementations should return the
/// element's current rendering width and the document's viewport state.
pub trait LayoutEnv: Send + Sync {
  /// Current rendering width of the element's slot, in CSS px.
  fn layout_width(&self) -> f32;

  /// Viewport size in CSS px.
  fn viewport(&self) -> Size;

  /// Device pixel ratio (image pixels per CSS px), > 0.
  fn device_pixel_ratio(&self) -> f32;

  /// True while the document is being prerendered rather than displayed.
  fn is_prerendering(&self) -> bool {
    false
  }
}

impl<T: LayoutEnv + ?Sized> LayoutEnv for Arc<T> {
  fn layout_width(&self) -> f32 {
    (**self).layout_width()
  }

  fn viewport(&self) -> Size {
    (**self).viewport()
  }

  fn device_pixel_ratio(&self) -> f32 {
    (**self).device_pixel_ratio()
  }

  fn is_prerendering(&self) -> bool {
    (**self).is_prerendering()
  }
}

/// Mutable layout environment for hosts that push measurements in.
#[derive(Debug)]
pub struct MeasuredLayoutEnv {
  state: Mutex<MeasuredState>,
}

#[derive(Debug, Clone, Copy)]
struct MeasuredState {
  layout_width: f32,
  viewport: Size,
  device_pixel_ratio: f32,
  prerendering: bool,
}

impl MeasuredLayoutEnv {
  pub fn new(layout_width: f32, viewport: Size, device_pixel_ratio: f32) -> Self {
    Self {
      state: Mutex::new(MeasuredState {
        layout_width,
        viewport,
        device_pixel_ratio,
        prerendering: false,
      }),
    }
  }

  pub fn set_layout_width(&self, width: f32) {
    self.state.lock().layout_width = width;
  }

  pub fn set_viewport(&self, viewport: Size) {
    self.state.lock().viewport = viewport;
  }

  pub fn set_device_pixel_ratio(&self, dpr: f32) {
    self.state.lock().device_pixel_ratio = dpr;
  }

  pub fn set_prerendering(&self, prerendering: bool) {
    self.state.lock().prerendering = prerendering;
  }
}

impl LayoutEnv for MeasuredLayoutEnv {
  fn layout_width(&self) -> f32 {
    self.state.lock().layout_width
  }

  fn viewport(&self) -> Size {
    self.state.lock().viewport
  }

  fn device_pixel_ratio(&self) -> f32 {
    self.state.lock().device_pixel_ratio
  }

  fn is_prerendering(&self) -> bool {
    self.state.lock().prerendering
  }
}

/// A deferred write against the element model.
pub type Mutation = Box<dyn FnOnce(&mut ElementModel) + Send>;

/// Batched, deferred element-model writes.
///
/// All DOM-touching effects of the pipeline are funneled through this
/// trait; the host applies them at a safe point in the frame. Nothing in
/// the core mutates the model inline.
pub trait MutationScheduler: Send + Sync {
  fn schedule(&self, mutation: Mutation);
}

impl<T: MutationScheduler + ?Sized> MutationScheduler for Arc<T> {
  fn schedule(&self, mutation: Mutation) {
    (**self).schedule(mutation)
  }
}

/// Queueing scheduler: collects mutations until the host flushes them.
#[derive(Default)]
pub struct QueuedMutations {
  queue: Mutex<Vec<Mutation>>,
}

impl QueuedMutations {
  pub fn new() -> Self {
    Self::default()
  }

  /// Applies and drains all queued mutations, returning how many ran.
  pub fn flush(&self, model: &mut ElementModel) -> usize {
    let drained = std::mem::take(&mut *self.queue.lock());
    let count = drained.len();
    for mutation in drained {
      mutation(model);
    }
    count
  }

  /// Number of mutations waiting to be applied.
  pub fn pending(&self) -> usize {
    self.queue.lock().len()
  }
}

impl MutationScheduler for QueuedMutations {
  fn schedule(&self, mutation: Mutation) {
    self.queue.lock().push(mutation);
  }
}

/// Connection warm-up hinting for a chosen resource URL.
pub trait PreconnectHints: Send + Sync {
  /// Hint that `origin` (scheme + host) will be fetched from soon.
  fn preconnect(&self, origin: &str);
}

impl<T: PreconnectHints + ?Sized> PreconnectHints for Arc<T> {
  fn preconnect(&self, origin: &str) {
    (**self).preconnect(origin)
  }
}

/// Hint sink that remembers every origin it was asked to warm.
#[derive(Default)]
pub struct CollectedPreconnects {
  origins: Mutex<Vec<String>>,
}

impl CollectedPreconnects {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn origins(&self) -> Vec<String> {
    self.origins.lock().clone()
  }
}

impl PreconnectHints for CollectedPreconnects {
  fn preconnect(&self, origin: &str) {
    let mut origins = self.origins.lock();
    if origins.last().map(String::as_str) != Some(origin) {
      origins.push(origin.to_string());
    }
  }
}

/// Hint sink that ignores all hints.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPreconnect;

impl PreconnectHints for NoPreconnect {
  fn preconnect(&self, _origin: &str) {}
}
