//! Error types for respimg
//!
//! This module provides error types for all subsystems:
//! - Srcset errors (candidate-set parsing and selection)
//! - Placeholder errors (palette construction)
//! - Load errors (fetching, decoding)
//!
//! All errors use the `thiserror` crate for minimal boilerplate and
//! proper error trait implementations.

use thiserror::Error;

/// Result type alias for respimg operations
///
/// This is a convenience type that uses our Error type as the error variant.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for respimg
///
/// This enum covers all possible errors that can occur while selecting,
/// placeholding, and loading an image resource. Each variant wraps a more
/// specific error type for that subsystem.
#[derive(Error, Debug, Clone)]
pub enum Error {
  /// Candidate-set configuration error
  #[error("Srcset error: {0}")]
  Srcset(#[from] SrcsetError),

  /// Placeholder construction error
  #[error("Placeholder error: {0}")]
  Placeholder(#[from] PlaceholderError),

  /// Resource loading or decoding error
  #[error("Load error: {0}")]
  Load(#[from] LoadError),

  /// I/O error (file reading, network transport, etc.)
  ///
  /// Stored as a string so the error stays `Clone`-able across cache and
  /// in-flight sharing boundaries.
  #[error("I/O error: {0}")]
  Io(String),

  /// Generic error for miscellaneous issues
  #[error("{0}")]
  Other(String),
}

impl From<std::io::Error> for Error {
  fn from(err: std::io::Error) -> Self {
    Error::Io(err.to_string())
  }
}

/// Errors in the declared candidate set
///
/// A candidate set that cannot produce a selection is a configuration
/// error: it is surfaced to the caller and never silently defaulted or
/// retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SrcsetError {
  /// The declaration contained no usable candidates
  #[error("srcset declaration contains no candidates")]
  Empty,

  /// No candidate survived descriptor parsing
  #[error("malformed srcset declaration: {detail}")]
  Malformed { detail: String },
}

/// Errors during placeholder construction
///
/// These are construction-time contract failures. They never block the
/// real image load; callers degrade to a no-placeholder presentation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderError {
  /// Palette length is not a perfect square, so no cell grid exists
  #[error("palette of {count} colors is not a perfect square grid")]
  NonSquarePalette { count: usize },

  /// Requested canvas dimensions cannot back a pixel buffer
  #[error("invalid placeholder canvas size {width}x{height}")]
  InvalidCanvas { width: u32, height: u32 },
}

/// Errors while loading the chosen resource
///
/// A load failure is recovered locally by the element's one-shot fallback
/// transition and then re-surfaced so host telemetry can observe it.
#[derive(Error, Debug, Clone)]
pub enum LoadError {
  /// The fetch itself failed (transport, HTTP status, unsupported scheme)
  #[error("failed to fetch {url}: {reason}")]
  Fetch { url: String, reason: String },

  /// Fetched bytes did not decode as an image
  #[error("failed to decode {url}: {reason}")]
  Decode { url: String, reason: String },

  /// Decoded image exceeds configured limits
  #[error("image {url} exceeds decode limits ({width}x{height})")]
  TooLarge { url: String, width: u32, height: u32 },
}

impl LoadError {
  /// URL the failed load was targeting.
  pub fn url(&self) -> &str {
    match self {
      LoadError::Fetch { url, .. } | LoadError::Decode { url, .. } | LoadError::TooLarge { url, .. } => {
        url
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn error_messages_include_context() {
    let err = Error::from(SrcsetError::Empty);
    assert!(err.to_string().contains("no candidates"));

    let err = Error::from(PlaceholderError::NonSquarePalette { count: 3 });
    assert!(err.to_string().contains("3"));

    let err = Error::from(LoadError::Fetch {
      url: "https://example.test/a.jpg".to_string(),
      reason: "timeout".to_string(),
    });
    assert!(err.to_string().contains("a.jpg"));
  }

  #[test]
  fn load_error_exposes_target_url() {
    let err = LoadError::Decode {
      url: "https://example.test/b.jpg".to_string(),
      reason: "truncated".to_string(),
    };
    assert_eq!(err.url(), "https://example.test/b.jpg");
  }
}
