//! respimg: responsive image source selection and progressive blur-up
//! reveal for embedded document runtimes.
//!
//! The pipeline picks the best resource from a declared candidate set for
//! the current viewport and device pixel ratio, shows a coarse palette
//! mosaic (smoothed by a shared background blur worker) while the real
//! image loads behind a randomized minimum-dwell throttle, and degrades
//! to a one-shot ghost/fallback presentation when the load fails.

pub mod clock;
pub mod debug;
pub mod dom;
pub mod element;
pub mod error;
pub mod geometry;
pub mod host;
pub mod loader;
pub mod placeholder;
pub mod resource;
pub mod srcset;

pub use clock::{Clock, ManualClock, SystemClock};
pub use element::{ElementDeps, ElementEvent, ElementState, ImageElement};
pub use error::{Error, LoadError, PlaceholderError, Result, SrcsetError};
pub use geometry::Size;
pub use loader::{ImageStore, LoadController, LoadSession, SessionState};
pub use resource::{FetchedResource, HttpFetcher, ResourceFetcher};
pub use srcset::{SelectionContext, SourceSet, SrcsetCandidate, SrcsetDescriptor};
