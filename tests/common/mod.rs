//! Shared harness for element pipeline tests: a mock fetcher with
//! blockable URLs, a manual clock, and queued host capabilities wired
//! into one controller.

// Not every test binary uses every helper.
#![allow(dead_code)]

use respimg::clock::{Clock, ManualClock};
use respimg::dom::{ElementModel, NodeId};
use respimg::element::{ElementDeps, ImageElement};
use respimg::error::{Error, LoadError, Result};
use respimg::host::{CollectedPreconnects, MeasuredLayoutEnv, QueuedMutations};
use respimg::loader::{ImageStore, LoadController};
use respimg::placeholder::worker::BlurWorker;
use respimg::resource::{FetchedResource, ResourceFetcher};
use respimg::Size;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Mock fetcher: URLs map to canned responses, and individual URLs can be
/// blocked to hold a fetch open until the test releases it.
#[derive(Default)]
pub struct MockFetcher {
  responses: Mutex<HashMap<String, FetchedResource>>,
  blocked: Mutex<HashSet<String>>,
  cv: Condvar,
}

impl MockFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a solid-color PNG response for `url`.
  pub fn insert_png(&self, url: &str, width: u32, height: u32) {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([40, 80, 120, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(img)
      .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
      .expect("encode png fixture");
    self
      .responses
      .lock()
      .unwrap()
      .insert(url.to_string(), FetchedResource::new(bytes, Some("image/png".to_string())));
  }

  /// Registers undecodable bytes for `url`.
  pub fn insert_junk(&self, url: &str) {
    self.responses.lock().unwrap().insert(
      url.to_string(),
      FetchedResource::new(b"definitely not an image".to_vec(), Some("image/png".to_string())),
    );
  }

  /// Holds any fetch of `url` open until [`release`] is called.
  ///
  /// [`release`]: MockFetcher::release
  pub fn block(&self, url: &str) {
    self.blocked.lock().unwrap().insert(url.to_string());
  }

  pub fn release(&self, url: &str) {
    self.blocked.lock().unwrap().remove(url);
    self.cv.notify_all();
  }
}

impl ResourceFetcher for MockFetcher {
  fn fetch(&self, url: &str) -> Result<FetchedResource> {
    let mut blocked = self.blocked.lock().unwrap();
    while blocked.contains(url) {
      let (guard, timed_out) = self
        .cv
        .wait_timeout(blocked, Duration::from_secs(10))
        .unwrap();
      blocked = guard;
      if timed_out.timed_out() {
        break;
      }
    }
    drop(blocked);

    self.responses.lock().unwrap().get(url).cloned().ok_or_else(|| {
      Error::Load(LoadError::Fetch {
        url: url.to_string(),
        reason: "no mock response".to_string(),
      })
    })
  }
}

/// One element controller with every host capability under test control.
pub struct Harness {
  pub model: ElementModel,
  pub container: NodeId,
  pub clock: Arc<ManualClock>,
  pub scheduler: Arc<QueuedMutations>,
  pub preconnect: Arc<CollectedPreconnects>,
  pub layout: Arc<MeasuredLayoutEnv>,
  pub fetcher: Arc<MockFetcher>,
  pub element: ImageElement,
}

impl Harness {
  /// Builds a harness for an element carrying `attrs`, with a 300x600
  /// viewport at 1.0 dpr, zero dwell, and a private blur worker.
  pub fn new(attrs: &[(&str, &str)]) -> Self {
    let mut model = ElementModel::new();
    let container = model.create_element("responsive-img");
    for (name, value) in attrs {
      model.set_attribute(container, name, value);
    }

    let clock = Arc::new(ManualClock::new());
    let scheduler = Arc::new(QueuedMutations::new());
    let preconnect = Arc::new(CollectedPreconnects::new());
    let layout = Arc::new(MeasuredLayoutEnv::new(300.0, Size::new(300.0, 600.0), 1.0));
    let fetcher = Arc::new(MockFetcher::new());

    let store = Arc::new(ImageStore::with_fetcher(
      Arc::clone(&fetcher) as Arc<dyn ResourceFetcher>
    ));
    let loader = LoadController::new(store, Arc::clone(&clock) as Arc<dyn Clock>)
      .with_dwell_base(Duration::ZERO);

    let element = ImageElement::new(
      container,
      ElementDeps {
        layout: Arc::clone(&layout) as Arc<dyn respimg::host::LayoutEnv>,
        scheduler: Arc::clone(&scheduler) as Arc<dyn respimg::host::MutationScheduler>,
        preconnect: Arc::clone(&preconnect) as Arc<dyn respimg::host::PreconnectHints>,
        loader,
        worker: Arc::new(BlurWorker::new()),
        clock: Arc::clone(&clock) as Arc<dyn Clock>,
      },
    );

    Self {
      model,
      container,
      clock,
      scheduler,
      preconnect,
      layout,
      fetcher,
      element,
    }
  }

  /// Layout, wait for the network side, pump once, and flush mutations.
  pub fn layout_and_settle(&mut self) -> Vec<respimg::ElementEvent> {
    self.element.layout(&mut self.model).expect("layout");
    assert!(self.element.wait_network(Duration::from_secs(5)));
    let events = self.element.pump();
    self.scheduler.flush(&mut self.model);
    events
  }

  /// Pump and flush without waiting on the network.
  pub fn pump_and_flush(&mut self) -> Vec<respimg::ElementEvent> {
    let events = self.element.pump();
    self.scheduler.flush(&mut self.model);
    events
  }
}
