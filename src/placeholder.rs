//! Blur-up placeholder generation.
//!
//! While the chosen resource streams in, the element shows a coarse color
//! mosaic derived from an inline palette declaration, optionally smoothed
//! by the shared background blur worker. The mosaic is an immediate,
//! synchronous render; the blur is asynchronous and best-effort, and if
//! the response never arrives the mosaic alone is shown.
//!
//! Two palette declaration formats are accepted: whitespace-delimited
//! 6-hex-digit tokens, and a bare hex-digit blob consumed in 2-character
//! groups (three groups per color). Malformed tokens are dropped silently;
//! a declaration yielding no colors produces an inert handle.

pub mod blur;
pub mod worker;

use crate::debug::runtime;
use crate::dom::{ElementModel, NodeId};
use crate::error::PlaceholderError;
use crate::host::MutationScheduler;
use crate::placeholder::blur::{radius_for_width, stack_blur};
use crate::placeholder::worker::{BlurTicket, BlurWorker};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;
use tiny_skia::{Paint, Pixmap, Rect, Transform};

/// Delay between the load-completion signal and canvas removal.
///
/// Fire-and-forget: once armed, the removal happens regardless of any
/// later state change.
pub const REMOVAL_DELAY: Duration = Duration::from_millis(500);

/// One palette color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
  pub r: u8,
  pub g: u8,
  pub b: u8,
}

fn parse_hex_color(token: &str) -> Option<Rgb> {
  let hex = token.strip_prefix('#').unwrap_or(token);
  if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
    return None;
  }
  Some(Rgb {
    r: u8::from_str_radix(&hex[0..2], 16).ok()?,
    g: u8::from_str_radix(&hex[2..4], 16).ok()?,
    b: u8::from_str_radix(&hex[4..6], 16).ok()?,
  })
}

/// Parses a palette descriptor into its valid colors.
///
/// Malformed tokens (and malformed 6-digit groups in blob form) are
/// dropped, never fatal.
pub fn parse_palette(descriptor: &str) -> Vec<Rgb> {
  let trimmed = descriptor.trim();
  if trimmed.is_empty() {
    return Vec::new();
  }

  if trimmed.split_whitespace().nth(1).is_some() {
    return trimmed.split_whitespace().filter_map(parse_hex_color).collect();
  }

  // Single token: either one color or a packed blob of 2-character groups.
  if trimmed.len() > 6 || trimmed.starts_with('#') {
    let bare = trimmed.strip_prefix('#').unwrap_or(trimmed);
    return bare
      .as_bytes()
      .chunks_exact(6)
      .filter_map(|chunk| parse_hex_color(std::str::from_utf8(chunk).ok()?))
      .collect();
  }

  parse_hex_color(trimmed).into_iter().collect()
}

fn grid_side(count: usize) -> Result<usize, PlaceholderError> {
  let side = (count as f64).sqrt().round() as usize;
  if side * side != count {
    return Err(PlaceholderError::NonSquarePalette { count });
  }
  Ok(side)
}

/// Renders the palette as a square cell mosaic.
///
/// Cells are painted edge to edge; the palette colors are opaque, so the
/// premultiplied pixmap bytes double as a plain RGBA buffer for the blur
/// worker.
fn render_mosaic(palette: &[Rgb], width: u32, height: u32) -> Result<Pixmap, PlaceholderError> {
  let side = grid_side(palette.len())?;
  let mut pixmap = Pixmap::new(width, height).ok_or(PlaceholderError::InvalidCanvas { width, height })?;

  let cell_w = width as f32 / side as f32;
  let cell_h = height as f32 / side as f32;
  let mut paint = Paint::default();
  paint.anti_alias = false;

  for row in 0..side {
    for col in 0..side {
      let color = palette[row * side + col];
      paint.set_color_rgba8(color.r, color.g, color.b, 255);
      // Snap cell edges outward so fractional cell sizes leave no seams.
      let x0 = (col as f32 * cell_w).floor();
      let y0 = (row as f32 * cell_h).floor();
      let x1 = ((col + 1) as f32 * cell_w).ceil().min(width as f32);
      let y1 = ((row + 1) as f32 * cell_h).ceil().min(height as f32);
      if let Some(rect) = Rect::from_xywh(x0, y0, x1 - x0, y1 - y0) {
        pixmap.fill_rect(rect, &paint, Transform::identity(), None);
      }
    }
  }

  Ok(pixmap)
}

/// Reveal state of a placeholder visual.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RevealState {
  Hidden,
  Revealed,
  Removed,
}

/// Live placeholder visual plus its pending blur response.
///
/// The canvas node id is filled in by the deferred mutation that inserts
/// it; every later effect re-checks that the node still exists, so a
/// disposed placeholder degrades every pending signal to a no-op.
pub struct PlaceholderHandle {
  canvas: Arc<Mutex<Option<NodeId>>>,
  pixmap: Option<Pixmap>,
  ticket: Option<BlurTicket>,
  reveal: RevealState,
  removal_deadline: Option<Instant>,
}

impl PlaceholderHandle {
  fn inert() -> Self {
    Self {
      canvas: Arc::new(Mutex::new(None)),
      pixmap: None,
      ticket: None,
      reveal: RevealState::Removed,
      removal_deadline: None,
    }
  }

  /// True when the declaration yielded no colors and nothing is shown.
  pub fn is_inert(&self) -> bool {
    self.pixmap.is_none() && self.reveal == RevealState::Removed
  }

  /// Canvas node inserted for this placeholder, once the host flushed the
  /// insertion.
  pub fn canvas_node(&self) -> Option<NodeId> {
    *self.canvas.lock().expect("canvas cell poisoned")
  }

  /// Current visual content (mosaic, then the blurred mosaic once the
  /// worker response has been applied). RGBA, row-major; all pixels are
  /// opaque so premultiplication is a no-op.
  pub fn bitmap(&self) -> Option<&[u8]> {
    self.pixmap.as_ref().map(|p| p.data())
  }

  pub fn dimensions(&self) -> (u32, u32) {
    self
      .pixmap
      .as_ref()
      .map(|p| (p.width(), p.height()))
      .unwrap_or((0, 0))
  }

  /// True once the blur worker response has replaced the raw mosaic.
  pub fn is_blurred(&self) -> bool {
    self.pixmap.is_some() && self.ticket.is_none()
  }

  /// Signals that the real image finished loading: reveal the visual and
  /// arm the removal timer.
  pub fn on_load_complete(&mut self, now: Instant, scheduler: &dyn MutationScheduler) {
    if self.reveal != RevealState::Hidden {
      return;
    }
    self.reveal = RevealState::Revealed;
    self.removal_deadline = Some(now + REMOVAL_DELAY);

    let canvas = Arc::clone(&self.canvas);
    scheduler.schedule(Box::new(move |model| {
      if let Some(id) = *canvas.lock().expect("canvas cell poisoned") {
        if model.is_attached(id) {
          model.set_opacity(id, 1.0);
        }
      }
    }));
  }

  /// Applies due timers and pending worker responses.
  pub fn tick(&mut self, now: Instant, scheduler: &dyn MutationScheduler) {
    if let Some(blurred) = self.ticket.as_ref().and_then(|ticket| ticket.take()) {
      if let Some(pixmap) = self.pixmap.as_mut() {
        if blurred.len() == pixmap.data().len() {
          pixmap.data_mut().copy_from_slice(&blurred);
        }
      }
      self.ticket = None;
    }

    if let Some(deadline) = self.removal_deadline {
      if now >= deadline {
        self.removal_deadline = None;
        self.detach(scheduler);
      }
    }
  }

  /// Removes the visual immediately (failure path: never obscure the
  /// ghost state) and drops the pending blur response.
  pub fn dispose(&mut self, scheduler: &dyn MutationScheduler) {
    self.removal_deadline = None;
    self.detach(scheduler);
  }

  fn detach(&mut self, scheduler: &dyn MutationScheduler) {
    self.reveal = RevealState::Removed;
    self.ticket = None;
    self.pixmap = None;

    let canvas = Arc::clone(&self.canvas);
    scheduler.schedule(Box::new(move |model| {
      if let Some(id) = *canvas.lock().expect("canvas cell poisoned") {
        if model.is_attached(id) {
          model.remove(id);
        }
      }
    }));
  }
}

/// Builds the placeholder for a freshly selected source.
///
/// Renders the mosaic synchronously, schedules insertion of a transparent
/// canvas under `container`, and (unless disabled by toggle) submits the
/// buffer to `worker` for background blurring.
pub fn build_placeholder(
  descriptor: &str,
  width: u32,
  height: u32,
  container: NodeId,
  scheduler: &dyn MutationScheduler,
  worker: &BlurWorker,
) -> Result<PlaceholderHandle, PlaceholderError> {
  let palette = parse_palette(descriptor);
  if palette.is_empty() {
    return Ok(PlaceholderHandle::inert());
  }

  let pixmap = render_mosaic(&palette, width, height)?;

  let toggles = runtime::runtime_toggles();
  let radius = radius_for_width(width);
  let ticket = if radius > 0 && !toggles.truthy(runtime::TOGGLE_DISABLE_BLUR) {
    Some(worker.submit(pixmap.data().to_vec(), width, height, radius))
  } else {
    None
  };

  let canvas = Arc::new(Mutex::new(None));
  let cell = Arc::clone(&canvas);
  scheduler.schedule(Box::new(move |model: &mut ElementModel| {
    if !model.is_attached(container) {
      return;
    }
    let id = model.create_element("canvas");
    model.set_opacity(id, 0.0);
    model.append_child(container, id);
    *cell.lock().expect("canvas cell poisoned") = Some(id);
  }));

  Ok(PlaceholderHandle {
    canvas,
    pixmap: Some(pixmap),
    ticket,
    reveal: RevealState::Hidden,
    removal_deadline: None,
  })
}

/// Synchronous variant used by tooling: mosaic plus in-place blur, no
/// worker round-trip.
pub fn render_blurred_mosaic(descriptor: &str, width: u32, height: u32) -> crate::error::Result<Vec<u8>> {
  let palette = parse_palette(descriptor);
  if palette.is_empty() {
    return Err(crate::error::Error::Other("palette descriptor yielded no colors".to_string()));
  }
  let mut pixels = render_mosaic(&palette, width, height)?.take();
  stack_blur(&mut pixels, width, height, radius_for_width(width));
  Ok(pixels)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_palette_accepts_token_format() {
    let palette = parse_palette("ff0000 00ff00 0000ff 000000");
    assert_eq!(palette.len(), 4);
    assert_eq!(palette[0], Rgb { r: 255, g: 0, b: 0 });
    assert_eq!(palette[3], Rgb { r: 0, g: 0, b: 0 });
  }

  #[test]
  fn parse_palette_drops_malformed_tokens() {
    let palette = parse_palette("ff0000 zzzzzz 00ff00 12345");
    assert_eq!(palette.len(), 2);
    assert_eq!(palette[1], Rgb { r: 0, g: 255, b: 0 });
  }

  #[test]
  fn parse_palette_accepts_packed_blob() {
    let palette = parse_palette("ff000000ff000000ff000000");
    assert_eq!(palette.len(), 4);
    assert_eq!(palette[1], Rgb { r: 0, g: 255, b: 0 });
  }

  #[test]
  fn parse_palette_of_nothing_is_empty() {
    assert!(parse_palette("").is_empty());
    assert!(parse_palette("  \t ").is_empty());
    assert!(parse_palette("nothexy").is_empty());
  }

  #[test]
  fn three_color_palette_has_no_square_grid() {
    let palette = parse_palette("ff0000 00ff00 0000ff");
    assert_eq!(palette.len(), 3);
    assert!(matches!(
      render_mosaic(&palette, 8, 8),
      Err(PlaceholderError::NonSquarePalette { count: 3 })
    ));
  }

  #[test]
  fn mosaic_places_palette_cells_in_row_major_order() {
    let palette = parse_palette("ff0000 00ff00 0000ff ffffff");
    let pixmap = render_mosaic(&palette, 4, 4).unwrap();
    let pixels = pixmap.data();

    // Top-left cell is the first color, bottom-right the last.
    assert_eq!(&pixels[0..3], &[255, 0, 0]);
    let last = (3 * 4 + 3) * 4;
    assert_eq!(&pixels[last..last + 3], &[255, 255, 255]);
    // Top-right quadrant holds the second color.
    let top_right = 3 * 4;
    assert_eq!(&pixels[top_right..top_right + 3], &[0, 255, 0]);
  }

  #[test]
  fn blob_without_complete_groups_drops_the_remainder() {
    let palette = parse_palette("ff000000ff00ab");
    assert_eq!(palette.len(), 2);
  }
}
