//! Shared background blur worker.
//!
//! One worker thread serves the whole process: lazily created on first
//! use, reused for the lifetime of the page, never torn down. Jobs are
//! self-contained (pixel buffer + dimensions + radius), so concurrent
//! submission needs no locking beyond the channel itself. Requests and
//! responses are correlated by a generated job id through a registry of
//! result sinks; there is no cancellation, and a response arriving after
//! its sink was deregistered is dropped harmlessly.

use crate::placeholder::blur::stack_blur;
use rustc_hash::FxHashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Duration;

/// Correlates a blur request with its response.
pub type JobId = u64;

struct BlurJob {
  job_id: JobId,
  pixels: Vec<u8>,
  width: u32,
  height: u32,
  radius: u32,
}

/// Result slot a worker response lands in.
///
/// Same shape as an in-flight decode cell: a mutex-guarded option plus a
/// condvar so callers may either poll or block with a timeout.
struct ResultSink {
  slot: Mutex<Option<Vec<u8>>>,
  cv: Condvar,
}

impl ResultSink {
  fn new() -> Self {
    Self {
      slot: Mutex::new(None),
      cv: Condvar::new(),
    }
  }

  fn set(&self, pixels: Vec<u8>) {
    if let Ok(mut slot) = self.slot.lock() {
      *slot = Some(pixels);
      self.cv.notify_all();
    }
  }

  fn take(&self) -> Option<Vec<u8>> {
    self.slot.lock().ok()?.take()
  }

  fn wait_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
    let guard = self.slot.lock().ok()?;
    let (mut guard, _) = self.cv.wait_timeout_while(guard, timeout, |slot| slot.is_none()).ok()?;
    guard.take()
  }
}

#[derive(Default)]
struct SinkRegistry {
  sinks: Mutex<FxHashMap<JobId, Arc<ResultSink>>>,
}

impl SinkRegistry {
  fn register(&self, job_id: JobId) -> Arc<ResultSink> {
    let sink = Arc::new(ResultSink::new());
    self.sinks.lock().expect("registry lock poisoned").insert(job_id, Arc::clone(&sink));
    sink
  }

  fn deregister(&self, job_id: JobId) {
    self.sinks.lock().expect("registry lock poisoned").remove(&job_id);
  }

  /// Delivers a response; a missing entry means the target was disposed
  /// and the result is dropped.
  fn complete(&self, job_id: JobId, pixels: Vec<u8>) {
    let sink = self.sinks.lock().expect("registry lock poisoned").remove(&job_id);
    if let Some(sink) = sink {
      sink.set(pixels);
    }
  }

  fn contains(&self, job_id: JobId) -> bool {
    self.sinks.lock().expect("registry lock poisoned").contains_key(&job_id)
  }
}

/// Handle to the blur worker thread.
///
/// Obtain the process-wide instance through [`BlurWorker::shared`]; tests
/// may build private instances with [`BlurWorker::new`].
pub struct BlurWorker {
  tx: mpsc::Sender<BlurJob>,
  registry: Arc<SinkRegistry>,
  next_job_id: AtomicU64,
}

static SHARED_WORKER: OnceLock<Arc<BlurWorker>> = OnceLock::new();

impl BlurWorker {
  /// Spawns a dedicated worker thread and returns its handle.
  pub fn new() -> Self {
    let (tx, rx) = mpsc::channel::<BlurJob>();
    let registry = Arc::new(SinkRegistry::default());
    let worker_registry = Arc::clone(&registry);

    std::thread::Builder::new()
      .name("respimg-blur".to_string())
      .spawn(move || {
        while let Ok(mut job) = rx.recv() {
          stack_blur(&mut job.pixels, job.width, job.height, job.radius);
          worker_registry.complete(job.job_id, job.pixels);
        }
      })
      .expect("failed to spawn blur worker thread");

    Self {
      tx,
      registry,
      next_job_id: AtomicU64::new(1),
    }
  }

  /// Process-wide shared worker handle, lazily created on first use and
  /// alive for the lifetime of the process.
  pub fn shared() -> Arc<BlurWorker> {
    Arc::clone(SHARED_WORKER.get_or_init(|| Arc::new(BlurWorker::new())))
  }

  /// Submits a blur job and returns the ticket its response lands on.
  ///
  /// `pixels` is a tightly packed RGBA buffer of `width * height` pixels.
  pub fn submit(&self, pixels: Vec<u8>, width: u32, height: u32, radius: u32) -> BlurTicket {
    let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
    let sink = self.registry.register(job_id);

    // A send error means the worker thread died; the ticket then simply
    // never completes, which downstream treats as "no blur".
    let _ = self.tx.send(BlurJob {
      job_id,
      pixels,
      width,
      height,
      radius,
    });

    BlurTicket {
      job_id,
      sink,
      registry: Arc::clone(&self.registry),
    }
  }

  #[cfg(test)]
  fn is_registered(&self, job_id: JobId) -> bool {
    self.registry.contains(job_id)
  }
}

impl Default for BlurWorker {
  fn default() -> Self {
    Self::new()
  }
}

/// Pending blur response.
///
/// Dropping the ticket deregisters its sink; a response that arrives
/// afterwards is discarded by the registry.
pub struct BlurTicket {
  job_id: JobId,
  sink: Arc<ResultSink>,
  registry: Arc<SinkRegistry>,
}

impl BlurTicket {
  pub fn job_id(&self) -> JobId {
    self.job_id
  }

  /// Non-blocking poll for the blurred buffer.
  pub fn take(&self) -> Option<Vec<u8>> {
    self.sink.take()
  }

  /// Blocks up to `timeout` for the blurred buffer.
  pub fn wait_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
    self.sink.wait_timeout(timeout)
  }
}

impl Drop for BlurTicket {
  fn drop(&mut self) {
    self.registry.deregister(self.job_id);
  }
}
