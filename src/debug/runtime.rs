//! Runtime toggles sourced from `RESPIMG_*` environment variables.
//!
//! Values are captured once (via [`RuntimeToggles::from_env`]) and then
//! reused for the lifetime of a pipeline. Callers can also construct
//! instances manually to override environment-derived behavior when
//! embedding the library.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::RwLock;

/// Skip submitting placeholder buffers to the blur worker when truthy.
pub const TOGGLE_DISABLE_BLUR: &str = "RESPIMG_DISABLE_BLUR";
/// Override the dwell throttle base, in milliseconds (0 disables dwell).
pub const TOGGLE_DWELL_MS: &str = "RESPIMG_DWELL_MS";
/// Enable per-element diagnostics capture when truthy.
pub const TOGGLE_DIAGNOSTICS: &str = "RESPIMG_DIAGNOSTICS";
/// Experimental: also propagate `src`/`srcset`/`sizes` onto the inner
/// image node so the native engine participates in selection.
pub const TOGGLE_NATIVE_SRCSET: &str = "RESPIMG_NATIVE_SRCSET";

/// Parsed runtime debug/configuration toggles.
#[derive(Debug, Clone, Default)]
pub struct RuntimeToggles {
  raw: HashMap<String, String>,
}

impl RuntimeToggles {
  /// Parse all `RESPIMG_*` environment variables into a toggle map.
  pub fn from_env() -> Self {
    let raw = std::env::vars()
      .filter(|(k, _)| k.starts_with("RESPIMG_"))
      .collect::<HashMap<_, _>>();
    Self { raw }
  }

  /// Construct a toggle set from a provided map of key/value pairs.
  pub fn from_map(raw: HashMap<String, String>) -> Self {
    Self { raw }
  }

  /// Returns the raw string value for a toggle, if set.
  pub fn get(&self, key: &str) -> Option<&str> {
    self.raw.get(key).map(String::as_str)
  }

  /// Returns true when the toggle is present and truthy (`!= 0`/`false`/`off`).
  pub fn truthy(&self, key: &str) -> bool {
    self
      .get(key)
      .map(|v| {
        let v = v.trim();
        !(v.eq_ignore_ascii_case("0") || v.eq_ignore_ascii_case("false") || v.eq_ignore_ascii_case("off"))
      })
      .unwrap_or(false)
  }

  /// Parse a toggle as `u64`, returning `None` when unset or unparseable.
  pub fn u64(&self, key: &str) -> Option<u64> {
    self.get(key).and_then(|v| v.trim().parse::<u64>().ok())
  }

  /// Parse a toggle as `u64`, falling back to a default when unset or invalid.
  pub fn u64_with_default(&self, key: &str, default: u64) -> u64 {
    self.u64(key).unwrap_or(default)
  }
}

static RUNTIME_TOGGLES: OnceLock<RwLock<Arc<RuntimeToggles>>> = OnceLock::new();

fn toggles_cell() -> &'static RwLock<Arc<RuntimeToggles>> {
  RUNTIME_TOGGLES.get_or_init(|| RwLock::new(Arc::new(RuntimeToggles::from_env())))
}

/// Returns the process-wide toggle set, captured from the environment on
/// first use.
pub fn runtime_toggles() -> Arc<RuntimeToggles> {
  toggles_cell().read().expect("toggle lock poisoned").clone()
}

/// Replaces the process-wide toggle set (embedding/test override).
pub fn set_runtime_toggles(toggles: RuntimeToggles) {
  let mut guard = toggles_cell().write().expect("toggle lock poisoned");
  *guard = Arc::new(toggles);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn truthy_treats_zero_false_off_as_disabled() {
    let mut raw = HashMap::new();
    raw.insert("RESPIMG_DISABLE_BLUR".to_string(), "0".to_string());
    raw.insert("RESPIMG_DIAGNOSTICS".to_string(), "on".to_string());
    let toggles = RuntimeToggles::from_map(raw);

    assert!(!toggles.truthy(TOGGLE_DISABLE_BLUR));
    assert!(toggles.truthy(TOGGLE_DIAGNOSTICS));
    assert!(!toggles.truthy("RESPIMG_UNSET"));
  }

  #[test]
  fn u64_with_default_falls_back_on_garbage() {
    let mut raw = HashMap::new();
    raw.insert("RESPIMG_DWELL_MS".to_string(), "abc".to_string());
    let toggles = RuntimeToggles::from_map(raw);

    assert_eq!(toggles.u64(TOGGLE_DWELL_MS), None);
    assert_eq!(toggles.u64_with_default(TOGGLE_DWELL_MS, 1200), 1200);
  }
}
