//! Image loading and the dwell-throttled load controller.
//!
//! [`ImageStore`] turns a URL into decoded pixels through a
//! [`ResourceFetcher`], with an in-memory cache keyed by resolved URL and
//! single-flight de-duplication of concurrent loads. [`LoadController`]
//! wraps a store load into a [`LoadSession`]: the fetch runs off-thread
//! while a randomized minimum-dwell deadline runs against the injected
//! clock, and the session completes only when both are satisfied. The
//! dwell is an anti-flicker floor under perceived latency, not a timeout:
//! network time adds on top.

use crate::clock::Clock;
use crate::debug::runtime;
use crate::error::{Error, LoadError, Result};
use crate::resource::{resolve_against_base, FetchedResource, ResourceFetcher};
use image::RgbaImage;
use lru::LruCache;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::io::Cursor;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

/// Base of the randomized minimum-dwell throttle.
pub const DWELL_BASE: Duration = Duration::from_millis(1200);

// ============================================================================
// Diagnostics
// ============================================================================

/// Per-thread load diagnostics collection.
#[derive(Debug, Default, Clone)]
pub struct LoadDiagnostics {
  pub requests: usize,
  pub cache_hits: usize,
  pub cache_misses: usize,
}

thread_local! {
  static LOAD_DIAGNOSTICS: RefCell<Option<LoadDiagnostics>> = const { RefCell::new(None) };
}

/// Begin collecting load diagnostics on this thread.
pub fn enable_load_diagnostics() {
  LOAD_DIAGNOSTICS.with(|cell| {
    *cell.borrow_mut() = Some(LoadDiagnostics::default());
  });
}

/// Stop collecting and return the counters gathered since enabling.
pub fn take_load_diagnostics() -> Option<LoadDiagnostics> {
  LOAD_DIAGNOSTICS.with(|cell| cell.borrow_mut().take())
}

fn record_request() {
  LOAD_DIAGNOSTICS.with(|cell| {
    if let Some(stats) = cell.borrow_mut().as_mut() {
      stats.requests += 1;
    }
  });
}

fn record_cache_hit() {
  LOAD_DIAGNOSTICS.with(|cell| {
    if let Some(stats) = cell.borrow_mut().as_mut() {
      stats.cache_hits += 1;
    }
  });
}

fn record_cache_miss() {
  LOAD_DIAGNOSTICS.with(|cell| {
    if let Some(stats) = cell.borrow_mut().as_mut() {
      stats.cache_misses += 1;
    }
  });
}

// ============================================================================
// Decoded images
// ============================================================================

/// A fetched and decoded image.
#[derive(Debug)]
pub struct LoadedImage {
  /// Resolved URL the bytes came from.
  pub url: String,
  /// Decoded RGBA pixels.
  pub image: RgbaImage,
  /// Content type reported by the fetch, when any.
  pub content_type: Option<String>,
}

impl LoadedImage {
  pub fn dimensions(&self) -> (u32, u32) {
    self.image.dimensions()
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// Decode limits for [`ImageStore`].
#[derive(Debug, Clone, Copy)]
pub struct ImageStoreConfig {
  /// Maximum number of decoded pixels (width * height). `0` disables the limit.
  pub max_decoded_pixels: u64,
  /// Maximum allowed width or height for a decoded image. `0` disables the limit.
  pub max_decoded_dimension: u32,
  /// Number of decoded images kept in memory.
  pub cache_capacity: usize,
}

impl Default for ImageStoreConfig {
  fn default() -> Self {
    Self {
      max_decoded_pixels: 100_000_000,
      max_decoded_dimension: 16384,
      cache_capacity: 64,
    }
  }
}

#[derive(Clone)]
enum SharedImageResult {
  Success(Arc<LoadedImage>),
  Error(Error),
}

impl SharedImageResult {
  fn as_result(&self) -> Result<Arc<LoadedImage>> {
    match self {
      Self::Success(img) => Ok(Arc::clone(img)),
      Self::Error(err) => Err(err.clone()),
    }
  }
}

struct DecodeInFlight {
  result: Mutex<Option<SharedImageResult>>,
  cv: Condvar,
}

impl DecodeInFlight {
  fn new() -> Self {
    Self {
      result: Mutex::new(None),
      cv: Condvar::new(),
    }
  }

  fn set(&self, result: SharedImageResult) {
    if let Ok(mut slot) = self.result.lock() {
      *slot = Some(result);
      self.cv.notify_all();
    }
  }

  fn wait(&self) -> Result<Arc<LoadedImage>> {
    let mut guard = self.result.lock().unwrap();
    while guard.is_none() {
      guard = self.cv.wait(guard).unwrap();
    }
    guard.as_ref().unwrap().as_result()
  }
}

// ============================================================================
// ImageStore
// ============================================================================

/// Fetch + decode with in-memory caching.
///
/// Results are cached by resolved URL; concurrent loads of the same URL
/// are de-duplicated so the bytes are fetched and decoded once.
pub struct ImageStore {
  cache: Mutex<LruCache<String, Arc<LoadedImage>>>,
  in_flight: Mutex<FxHashMap<String, Arc<DecodeInFlight>>>,
  fetcher: Arc<dyn ResourceFetcher>,
  base_url: Option<String>,
  config: ImageStoreConfig,
}

impl ImageStore {
  pub fn with_fetcher(fetcher: Arc<dyn ResourceFetcher>) -> Self {
    Self::with_fetcher_and_config(fetcher, ImageStoreConfig::default())
  }

  pub fn with_fetcher_and_config(fetcher: Arc<dyn ResourceFetcher>, config: ImageStoreConfig) -> Self {
    let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).unwrap();
    Self {
      cache: Mutex::new(LruCache::new(capacity)),
      in_flight: Mutex::new(FxHashMap::default()),
      fetcher,
      base_url: None,
      config,
    }
  }

  /// Sets the base URL used to resolve relative image sources.
  pub fn set_base_url(&mut self, base_url: impl Into<String>) {
    self.base_url = Some(base_url.into());
  }

  /// Resolve a potentially relative URL to an absolute URL.
  pub fn resolve_url(&self, url: &str) -> String {
    if url.is_empty() || url.starts_with("data:") {
      return url.to_string();
    }
    if let Ok(parsed) = url::Url::parse(url) {
      return parsed.to_string();
    }
    if let Some(base) = &self.base_url {
      if let Some(resolved) = resolve_against_base(base, url) {
        return resolved;
      }
    }
    url.to_string()
  }

  /// Load an image, blocking until fetched and decoded.
  ///
  /// Subsequent loads of the same resolved URL return the cached image.
  pub fn load(&self, url: &str) -> Result<Arc<LoadedImage>> {
    let resolved = self.resolve_url(url);

    record_request();
    if let Some(img) = self.cache.lock().unwrap().get(&resolved).cloned() {
      record_cache_hit();
      return Ok(img);
    }
    record_cache_miss();

    let (flight, is_owner) = self.join_in_flight(&resolved);
    if !is_owner {
      return flight.wait();
    }

    let outcome = self.fetch_and_decode(&resolved);
    let shared = match &outcome {
      Ok(img) => {
        self.cache.lock().unwrap().put(resolved.clone(), Arc::clone(img));
        SharedImageResult::Success(Arc::clone(img))
      }
      Err(err) => SharedImageResult::Error(err.clone()),
    };
    flight.set(shared);
    self.in_flight.lock().unwrap().remove(&resolved);
    outcome
  }

  fn join_in_flight(&self, resolved: &str) -> (Arc<DecodeInFlight>, bool) {
    let mut in_flight = self.in_flight.lock().unwrap();
    if let Some(existing) = in_flight.get(resolved) {
      (Arc::clone(existing), false)
    } else {
      let flight = Arc::new(DecodeInFlight::new());
      in_flight.insert(resolved.to_string(), Arc::clone(&flight));
      (flight, true)
    }
  }

  fn fetch_and_decode(&self, resolved: &str) -> Result<Arc<LoadedImage>> {
    let FetchedResource { bytes, content_type } = self.fetcher.fetch(resolved)?;

    let (width, height) = image::ImageReader::new(Cursor::new(&bytes))
      .with_guessed_format()
      .map_err(|e| {
        Error::Load(LoadError::Decode {
          url: resolved.to_string(),
          reason: e.to_string(),
        })
      })?
      .into_dimensions()
      .map_err(|e| {
        Error::Load(LoadError::Decode {
          url: resolved.to_string(),
          reason: e.to_string(),
        })
      })?;

    self.check_limits(resolved, width, height)?;

    let decoded = image::load_from_memory(&bytes).map_err(|e| {
      Error::Load(LoadError::Decode {
        url: resolved.to_string(),
        reason: e.to_string(),
      })
    })?;

    Ok(Arc::new(LoadedImage {
      url: resolved.to_string(),
      image: decoded.into_rgba8(),
      content_type,
    }))
  }

  fn check_limits(&self, resolved: &str, width: u32, height: u32) -> Result<()> {
    let too_many_pixels =
      self.config.max_decoded_pixels > 0 && u64::from(width) * u64::from(height) > self.config.max_decoded_pixels;
    let too_wide = self.config.max_decoded_dimension > 0
      && (width > self.config.max_decoded_dimension || height > self.config.max_decoded_dimension);
    if too_many_pixels || too_wide {
      return Err(Error::Load(LoadError::TooLarge {
        url: resolved.to_string(),
        width,
        height,
      }));
    }
    Ok(())
  }
}

// ============================================================================
// Load sessions
// ============================================================================

fn hash_u64(input: &str) -> u64 {
  let mut hash: u64 = 0xcbf29ce484222325;
  for &b in input.as_bytes() {
    hash ^= u64::from(b);
    hash = hash.wrapping_mul(0x100000001b3);
  }
  hash
}

fn pseudo_rand_u64(mut x: u64) -> u64 {
  x ^= x >> 12;
  x ^= x << 25;
  x ^= x >> 27;
  x.wrapping_mul(0x2545F4914F6CDD1D)
}

fn jitter_duration(max: Duration, seed: u64) -> Duration {
  if max.is_zero() {
    return Duration::ZERO;
  }
  let max_ns = max.as_nanos();
  let denom = max_ns.saturating_add(1);
  let rand = pseudo_rand_u64(seed) as u128;
  let jitter_ns = rand % denom;
  let secs = (jitter_ns / 1_000_000_000) as u64;
  let nanos = (jitter_ns % 1_000_000_000) as u32;
  Duration::new(secs, nanos)
}

/// Dwell base from the environment: `RESPIMG_DWELL_MS` when set,
/// otherwise [`DWELL_BASE`].
pub fn default_dwell_base() -> Duration {
  let toggles = runtime::runtime_toggles();
  Duration::from_millis(toggles.u64_with_default(runtime::TOGGLE_DWELL_MS, DWELL_BASE.as_millis() as u64))
}

/// Computes the minimum dwell for one load: `base + jitter(0..base)`.
///
/// Deterministic for a given (url, sequence, base) triple.
pub fn dwell_for(url: &str, sequence: u64, base: Duration) -> Duration {
  base + jitter_duration(base, hash_u64(url) ^ pseudo_rand_u64(sequence))
}

/// Lifecycle state of a load session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Pending,
  Succeeded,
  Failed,
}

struct SessionCell {
  result: Mutex<Option<Result<Arc<LoadedImage>>>>,
  cv: Condvar,
}

impl SessionCell {
  fn new() -> Self {
    Self {
      result: Mutex::new(None),
      cv: Condvar::new(),
    }
  }

  fn set(&self, result: Result<Arc<LoadedImage>>) {
    if let Ok(mut slot) = self.result.lock() {
      *slot = Some(result);
      self.cv.notify_all();
    }
  }
}

/// One in-flight attempt to load a chosen URL.
///
/// Owned by the element controller; a newer selection supersedes (but
/// does not cancel) the session, and the element discards completions
/// whose sequence is stale.
pub struct LoadSession {
  sequence: u64,
  target_url: String,
  started_at: Instant,
  dwell_deadline: Instant,
  state: SessionState,
  cell: Arc<SessionCell>,
}

impl LoadSession {
  /// Monotonic sequence stamped at selection time.
  pub fn sequence(&self) -> u64 {
    self.sequence
  }

  pub fn target_url(&self) -> &str {
    &self.target_url
  }

  pub fn started_at(&self) -> Instant {
    self.started_at
  }

  pub fn state(&self) -> SessionState {
    self.state
  }

  /// Instant before which the session will not report completion.
  pub fn dwell_deadline(&self) -> Instant {
    self.dwell_deadline
  }

  /// True once the network side has produced a result (the dwell may
  /// still be holding completion back).
  pub fn network_done(&self) -> bool {
    self.cell.result.lock().map(|r| r.is_some()).unwrap_or(false)
  }

  /// Blocks until the network result exists or `timeout` passes.
  pub fn wait_network(&self, timeout: Duration) -> bool {
    let Ok(guard) = self.cell.result.lock() else {
      return false;
    };
    let Ok((guard, _)) = self.cell.cv.wait_timeout_while(guard, timeout, |r| r.is_none()) else {
      return false;
    };
    guard.is_some()
  }

  /// Takes the completion when BOTH the network result exists and the
  /// dwell deadline has passed. Returns `None` while pending and after
  /// the completion was already taken.
  pub fn try_complete(&mut self, now: Instant) -> Option<Result<Arc<LoadedImage>>> {
    if self.state != SessionState::Pending {
      return None;
    }
    if now < self.dwell_deadline {
      return None;
    }
    let taken = self.cell.result.lock().ok()?.take()?;
    self.state = match &taken {
      Ok(_) => SessionState::Succeeded,
      Err(_) => SessionState::Failed,
    };
    Some(taken)
  }
}

/// Starts load sessions against a shared [`ImageStore`].
pub struct LoadController {
  store: Arc<ImageStore>,
  clock: Arc<dyn Clock>,
  dwell_base: Duration,
}

impl LoadController {
  pub fn new(store: Arc<ImageStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      clock,
      dwell_base: default_dwell_base(),
    }
  }

  /// Overrides the dwell base for sessions started by this controller.
  pub fn with_dwell_base(mut self, dwell_base: Duration) -> Self {
    self.dwell_base = dwell_base;
    self
  }

  pub fn store(&self) -> &Arc<ImageStore> {
    &self.store
  }

  /// Begins loading `url`, stamping the session with `sequence`.
  ///
  /// The fetch runs on a worker thread; the dwell deadline is computed up
  /// front from the injected clock.
  pub fn begin(&self, url: &str, sequence: u64) -> LoadSession {
    let resolved = self.store.resolve_url(url);
    let now = self.clock.now();
    let dwell = dwell_for(&resolved, sequence, self.dwell_base);

    let cell = Arc::new(SessionCell::new());
    let worker_cell = Arc::clone(&cell);
    let store = Arc::clone(&self.store);
    let load_url = resolved.clone();

    std::thread::Builder::new()
      .name("respimg-load".to_string())
      .spawn(move || {
        worker_cell.set(store.load(&load_url));
      })
      .expect("failed to spawn load thread");

    LoadSession {
      sequence,
      target_url: resolved,
      started_at: now,
      dwell_deadline: now + dwell,
      state: SessionState::Pending,
      cell,
    }
  }
}
