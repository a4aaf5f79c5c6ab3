//! Responsive image candidate parsing and selection (`srcset`/`sizes`).
//!
//! Parsing and selection are centralized here so layout passes, mutation
//! handling, and prefetch tooling agree on which resource was chosen.
//! Selection is a pure function of the declared candidates and the
//! measured environment: callers cache the parse (invalidate on attribute
//! change), never the selection result.

use crate::error::SrcsetError;
use cssparser::{Parser, ParserInput, Token};

/// Descriptor declared on a srcset candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SrcsetDescriptor {
  /// Intrinsic resource width in pixels (`640w`).
  Width(u32),
  /// Resource pixel density (`2x` / `2dppx`).
  Density(f32),
}

/// One candidate URL with its descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct SrcsetCandidate {
  pub url: String,
  pub descriptor: SrcsetDescriptor,
}

/// Selection inputs describing the rendering environment.
///
/// Ephemeral: computed from the host layout capability on every selection
/// call.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext {
  /// Viewport width in CSS px.
  pub viewport_width: f32,
  /// Device pixel ratio (image px per CSS px), > 0.
  pub device_pixel_ratio: f32,
  /// Slot width in CSS px when a `sizes` evaluation narrowed it.
  pub slot_width: Option<f32>,
}

impl SelectionContext {
  pub fn new(viewport_width: f32, device_pixel_ratio: f32) -> Self {
    Self {
      viewport_width,
      device_pixel_ratio,
      slot_width: None,
    }
  }

  pub fn with_slot_width(mut self, slot_width: f32) -> Self {
    self.slot_width = Some(slot_width);
    self
  }

  fn source_width(&self) -> f32 {
    match self.slot_width {
      Some(w) if w.is_finite() && w > 0.0 => w,
      _ => self.viewport_width,
    }
  }
}

/// An ordered, non-empty set of srcset candidates.
///
/// Non-emptiness is established at parse time; a declaration yielding no
/// usable candidate is a configuration error, never a silent default.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSet {
  candidates: Vec<SrcsetCandidate>,
}

impl SourceSet {
  /// Parses a `srcset` declaration.
  pub fn parse(attr: &str) -> Result<Self, SrcsetError> {
    if attr.trim().is_empty() {
      return Err(SrcsetError::Empty);
    }
    let candidates = parse_srcset(attr);
    if candidates.is_empty() {
      return Err(SrcsetError::Malformed {
        detail: format!("no usable candidate in {attr:?}"),
      });
    }
    Ok(Self { candidates })
  }

  /// Wraps a bare `src` URL as a single 1x candidate.
  pub fn from_src(src: &str) -> Result<Self, SrcsetError> {
    let url = src.trim();
    if url.is_empty() {
      return Err(SrcsetError::Empty);
    }
    Ok(Self {
      candidates: vec![SrcsetCandidate {
        url: url.to_string(),
        descriptor: SrcsetDescriptor::Density(1.0),
      }],
    })
  }

  pub fn candidates(&self) -> &[SrcsetCandidate] {
    &self.candidates
  }

  /// Selects the best candidate URL for the given environment.
  ///
  /// Width descriptors: the effective target pixel width is
  /// `source width * device pixel ratio`; the candidate with the smallest
  /// declared width that still covers the target wins, and when none
  /// covers it the largest available is chosen (never under-serve below
  /// the largest declared resource). Density descriptors: the candidate
  /// closest to the device pixel ratio wins, preferring the next density
  /// above on ties. Density candidates are ignored when any width
  /// descriptor is present.
  ///
  /// Pure and deterministic for identical inputs.
  pub fn select(&self, ctx: SelectionContext) -> &str {
    let dpr = sanitized_dpr(ctx.device_pixel_ratio);

    if self.has_width_descriptors() {
      let target = ctx.source_width().max(1.0) * dpr;
      return self.select_by_width(target);
    }
    self.select_by_density(dpr)
  }

  fn has_width_descriptors(&self) -> bool {
    self
      .candidates
      .iter()
      .any(|c| matches!(c.descriptor, SrcsetDescriptor::Width(_)))
  }

  fn select_by_width(&self, target: f32) -> &str {
    let mut best_ge: Option<(&SrcsetCandidate, u32)> = None;
    let mut largest: Option<(&SrcsetCandidate, u32)> = None;

    for candidate in &self.candidates {
      let SrcsetDescriptor::Width(width) = candidate.descriptor else {
        continue;
      };
      if width as f32 >= target {
        let replace = best_ge.map(|(_, w)| width < w).unwrap_or(true);
        if replace {
          best_ge = Some((candidate, width));
        }
      }
      let replace = largest.map(|(_, w)| width > w).unwrap_or(true);
      if replace {
        largest = Some((candidate, width));
      }
    }

    // `candidates` is non-empty and contains at least one width entry here.
    best_ge
      .or(largest)
      .map(|(c, _)| c.url.as_str())
      .unwrap_or_else(|| self.candidates[0].url.as_str())
  }

  fn select_by_density(&self, dpr: f32) -> &str {
    let mut best: Option<(&SrcsetCandidate, f32)> = None;

    for candidate in &self.candidates {
      let SrcsetDescriptor::Density(density) = candidate.descriptor else {
        continue;
      };
      if !density.is_finite() || density <= 0.0 {
        continue;
      }
      let replace = match best {
        None => true,
        Some((_, current)) => {
          let dist = (density - dpr).abs();
          let current_dist = (current - dpr).abs();
          // Ties resolve upward: a density above the target beats an
          // equally distant one below it.
          dist < current_dist || (dist == current_dist && density > current)
        }
      };
      if replace {
        best = Some((candidate, density));
      }
    }

    best
      .map(|(c, _)| c.url.as_str())
      .unwrap_or_else(|| self.candidates[0].url.as_str())
  }
}

fn sanitized_dpr(dpr: f32) -> f32 {
  if dpr.is_finite() && dpr > 0.0 {
    dpr
  } else {
    1.0
  }
}

/// Parse a `srcset` attribute into candidate URLs with descriptors.
///
/// A small, allocation-minimal byte-cursor parser. Invalid candidate
/// strings are skipped. The first comma of a `data:` URL separates
/// metadata from payload and belongs to the URL.
pub fn parse_srcset(attr: &str) -> Vec<SrcsetCandidate> {
  fn is_data_url(bytes: &[u8], start: usize) -> bool {
    if start + 5 > bytes.len() {
      return false;
    }
    let matches = |offset: usize, expected: u8| bytes[start + offset].to_ascii_lowercase() == expected;
    matches(0, b'd') && matches(1, b'a') && matches(2, b't') && matches(3, b'a') && bytes[start + 4] == b':'
  }

  let bytes = attr.as_bytes();
  let mut out = Vec::new();
  let mut idx = 0;

  while idx < bytes.len() {
    while idx < bytes.len() && (bytes[idx].is_ascii_whitespace() || bytes[idx] == b',') {
      idx += 1;
    }
    if idx >= bytes.len() {
      break;
    }

    let url_start = idx;
    let data_url = is_data_url(bytes, url_start);
    let mut data_commas_seen = 0usize;

    while idx < bytes.len() {
      let b = bytes[idx];
      if b.is_ascii_whitespace() {
        break;
      }
      if b == b',' {
        if data_url && data_commas_seen == 0 {
          data_commas_seen = 1;
          idx += 1;
          continue;
        }
        break;
      }
      idx += 1;
    }

    let url = attr[url_start..idx].trim();
    if url.is_empty() {
      while idx < bytes.len() && bytes[idx] != b',' {
        idx += 1;
      }
      continue;
    }

    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
      idx += 1;
    }

    let desc_start = idx;
    while idx < bytes.len() && bytes[idx] != b',' {
      idx += 1;
    }
    let desc_str = attr[desc_start..idx].trim();

    let mut descriptor: Option<SrcsetDescriptor> = None;
    let mut valid = true;
    for desc in desc_str.split_whitespace() {
      if descriptor.is_some() {
        // More than one descriptor token invalidates the candidate.
        valid = false;
        break;
      }
      let d = desc.trim();
      if let Some(raw) = d.strip_suffix("dppx") {
        if let Ok(val) = raw.parse::<f32>() {
          descriptor = Some(SrcsetDescriptor::Density(val));
        }
      } else if let Some(raw) = d.strip_suffix('x') {
        if let Ok(val) = raw.parse::<f32>() {
          descriptor = Some(SrcsetDescriptor::Density(val));
        }
      } else if let Some(raw) = d.strip_suffix('w') {
        if let Ok(val) = raw.parse::<u32>() {
          descriptor = Some(SrcsetDescriptor::Width(val));
        }
      }
    }
    if valid {
      out.push(SrcsetCandidate {
        url: url.to_string(),
        descriptor: descriptor.unwrap_or(SrcsetDescriptor::Density(1.0)),
      });
    }

    if idx < bytes.len() && bytes[idx] == b',' {
      idx += 1;
    }
  }

  out
}

/// One entry of a `sizes` list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizesEntry {
  /// `(max-width: Npx)` condition; `None` is the unconditional default.
  pub max_width: Option<f32>,
  pub length: SizesLength,
}

/// Slot length of a `sizes` entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizesLength {
  Px(f32),
  Vw(f32),
}

/// Parsed `sizes` attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct SizesList {
  pub entries: Vec<SizesEntry>,
}

impl SizesList {
  /// Resolves the slot width in CSS px for the given viewport width.
  ///
  /// The first entry whose condition matches wins; entries without a
  /// condition always match. With no matching entry the viewport width is
  /// the slot width.
  pub fn evaluate(&self, viewport_width: f32) -> f32 {
    for entry in &self.entries {
      let matches = match entry.max_width {
        Some(max) => viewport_width <= max,
        None => true,
      };
      if matches {
        return match entry.length {
          SizesLength::Px(px) => px,
          SizesLength::Vw(vw) => viewport_width * vw / 100.0,
        };
      }
    }
    viewport_width
  }
}

/// Parse an HTML `sizes` attribute into a `SizesList`.
///
/// Only `px`/`vw` lengths and `(max-width: Npx)` conditions are
/// understood; entries that do not fit are skipped. Returns `None` when no
/// valid entries remain.
pub fn parse_sizes(attr: &str) -> Option<SizesList> {
  let mut entries = Vec::new();
  for item in attr.split(',') {
    let trimmed = item.trim();
    if trimmed.is_empty() {
      continue;
    }
    let mut parts = trimmed.rsplitn(2, char::is_whitespace);
    let length_part = parts.next().map(str::trim);
    let media_part = parts.next().map(str::trim);

    let length = match length_part.and_then(parse_sizes_length) {
      Some(l) => l,
      None => continue,
    };

    let max_width = match media_part {
      Some(cond) if !cond.is_empty() => match parse_max_width_condition(cond) {
        Some(px) => Some(px),
        // Unsupported condition: the entry cannot be evaluated, skip it.
        None => continue,
      },
      _ => None,
    };

    entries.push(SizesEntry { max_width, length });
  }

  if entries.is_empty() {
    None
  } else {
    Some(SizesList { entries })
  }
}

fn parse_sizes_length(value: &str) -> Option<SizesLength> {
  let mut input = ParserInput::new(value);
  let mut parser = Parser::new(&mut input);

  let parsed = match parser.next() {
    Ok(Token::Dimension { value, ref unit, .. }) => {
      if unit.eq_ignore_ascii_case("px") {
        Some(SizesLength::Px(*value))
      } else if unit.eq_ignore_ascii_case("vw") {
        Some(SizesLength::Vw(*value))
      } else {
        None
      }
    }
    Ok(Token::Number { value, .. }) if *value == 0.0 => Some(SizesLength::Px(0.0)),
    _ => None,
  }?;

  parser.skip_whitespace();
  if parser.is_exhausted() {
    Some(parsed)
  } else {
    None
  }
}

fn parse_max_width_condition(cond: &str) -> Option<f32> {
  let inner = cond.trim().strip_prefix('(')?.strip_suffix(')')?;
  let (name, value) = inner.split_once(':')?;
  if !name.trim().eq_ignore_ascii_case("max-width") {
    return None;
  }
  match parse_sizes_length(value.trim())? {
    SizesLength::Px(px) => Some(px),
    SizesLength::Vw(_) => None,
  }
}
