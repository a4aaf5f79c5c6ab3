//! Resource fetching abstraction
//!
//! This module provides a trait-based abstraction for fetching the bytes
//! behind a chosen image URL. The core stays agnostic about how resources
//! are retrieved, enabling:
//!
//! - Custom caching strategies in the embedding host
//! - Offline modes
//! - Mocking for tests
//! - Rate limiting
//!
//! # Example
//!
//! ```rust,ignore
//! use respimg::resource::{ResourceFetcher, HttpFetcher};
//!
//! let fetcher = HttpFetcher::new();
//! let resource = fetcher.fetch("https://example.com/image.png")?;
//! println!("Got {} bytes", resource.bytes.len());
//! ```

use crate::error::{Error, LoadError, Result};
use base64::Engine;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default User-Agent string used by HTTP fetchers
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36 respimg/0.1";

/// Default Accept-Language header value
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

// ============================================================================
// Core types
// ============================================================================

/// Result of fetching an external resource
#[derive(Debug, Clone)]
pub struct FetchedResource {
    /// Raw bytes of the resource
    pub bytes: Vec<u8>,
    /// Content-Type header value, if available (e.g., "image/png")
    pub content_type: Option<String>,
}

impl FetchedResource {
    /// Create a new FetchedResource
    pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
        Self { bytes, content_type }
    }

    /// Check if this resource appears to be an image based on content-type
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_ref()
            .map(|ct| ct.starts_with("image/"))
            .unwrap_or(false)
    }
}

// ============================================================================
// ResourceFetcher trait
// ============================================================================

/// Trait for fetching external resources
///
/// This abstraction allows different fetch implementations:
/// - [`HttpFetcher`]: Default HTTP implementation with timeouts
/// - Custom implementations for caching, mocking, offline mode, etc.
///
/// URLs can be:
/// - `http://` or `https://` - fetch over network
/// - `file://` - read from filesystem
/// - `data:` - decode data URL inline
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; load sessions run the fetch off
/// the caller's thread.
pub trait ResourceFetcher: Send + Sync {
    /// Fetch a resource from the given URL
    fn fetch(&self, url: &str) -> Result<FetchedResource>;
}

// Allow Arc<dyn ResourceFetcher> to be used as ResourceFetcher
impl<T: ResourceFetcher + ?Sized> ResourceFetcher for Arc<T> {
    fn fetch(&self, url: &str) -> Result<FetchedResource> {
        (**self).fetch(url)
    }
}

// ============================================================================
// HttpFetcher - Default implementation
// ============================================================================

/// Default HTTP resource fetcher
///
/// Fetches resources over HTTP/HTTPS with configurable timeouts and user
/// agent. Also handles `file://` URLs and `data:` URLs.
///
/// # Example
///
/// ```rust,ignore
/// use respimg::resource::HttpFetcher;
/// use std::time::Duration;
///
/// let fetcher = HttpFetcher::new()
///     .with_timeout(Duration::from_secs(60))
///     .with_user_agent("MyApp/1.0");
/// ```
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
    user_agent: String,
    accept_language: String,
    max_size: usize,
}

impl HttpFetcher {
    /// Create a new HttpFetcher with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the User-Agent header
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the Accept-Language header
    pub fn with_accept_language(mut self, accept_language: impl Into<String>) -> Self {
        self.accept_language = accept_language.into();
        self
    }

    /// Set the maximum response size in bytes
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Fetch from an HTTP/HTTPS URL, following up to 10 redirects
    fn fetch_http(&self, url: &str) -> Result<FetchedResource> {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build();
        let agent: ureq::Agent = config.into();

        let mut current = url.to_string();
        for _ in 0..10 {
            let request = agent
                .get(&current)
                .header("User-Agent", &self.user_agent)
                .header("Accept-Language", &self.accept_language);

            let mut response = request.call().map_err(|e| {
                Error::Load(LoadError::Fetch {
                    url: current.clone(),
                    reason: e.to_string(),
                })
            })?;

            let status = response.status();
            if (300..400).contains(&status.as_u16()) {
                if let Some(loc) = response.headers().get("location").and_then(|h| h.to_str().ok()) {
                    current = Url::parse(&current)
                        .ok()
                        .and_then(|base| base.join(loc).ok())
                        .map(|u| u.to_string())
                        .unwrap_or_else(|| loc.to_string());
                    continue;
                }
            }
            if !status.is_success() {
                return Err(Error::Load(LoadError::Fetch {
                    url: current.clone(),
                    reason: format!("HTTP status {}", status.as_u16()),
                }));
            }

            let content_type = response
                .headers()
                .get("content-type")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.to_string());

            let bytes = response
                .body_mut()
                .with_config()
                .limit(self.max_size as u64)
                .read_to_vec()
                .map_err(|e| Error::Io(e.into_io().to_string()))?;

            if bytes.is_empty() {
                return Err(Error::Io(
                    io::Error::new(io::ErrorKind::UnexpectedEof, "Empty HTTP response body").to_string(),
                ));
            }
            return Ok(FetchedResource::new(bytes, content_type));
        }

        Err(Error::Load(LoadError::Fetch {
            url: url.to_string(),
            reason: "too many redirects".to_string(),
        }))
    }

    /// Fetch from a file:// URL
    fn fetch_file(&self, url: &str) -> Result<FetchedResource> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        let bytes = std::fs::read(path).map_err(|e| {
            Error::Load(LoadError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })
        })?;

        let content_type = guess_content_type_from_path(path);
        Ok(FetchedResource::new(bytes, content_type))
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            max_size: 50 * 1024 * 1024, // 50MB default limit
        }
    }
}

impl ResourceFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedResource> {
        if url.starts_with("data:") {
            decode_data_url(url)
        } else if url.starts_with("file://") {
            self.fetch_file(url)
        } else if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch_http(url)
        } else {
            // Treat as local file path
            self.fetch_file(&format!("file://{}", url))
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Guess content-type from file path extension
fn guess_content_type_from_path(path: &str) -> Option<String> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())?;

    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => return None,
    };

    Some(mime.to_string())
}

/// Decode a data: URL into bytes and content type following RFC 2397
/// semantics.
pub fn decode_data_url(url: &str) -> Result<FetchedResource> {
    let rest = url.strip_prefix("data:").ok_or_else(|| {
        Error::Load(LoadError::Fetch {
            url: url.to_string(),
            reason: "URL does not start with 'data:'".to_string(),
        })
    })?;

    let (metadata, data) = rest.split_once(',').ok_or_else(|| {
        Error::Load(LoadError::Fetch {
            url: url.to_string(),
            reason: "Missing comma in data URL".to_string(),
        })
    })?;

    let mut is_base64 = false;
    let mut mediatype = "";
    for (i, part) in metadata.split(';').enumerate() {
        let part = part.trim();
        if i == 0 {
            mediatype = part;
        } else if part.eq_ignore_ascii_case("base64") {
            is_base64 = true;
        }
    }

    let bytes = if is_base64 {
        base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| {
                Error::Load(LoadError::Fetch {
                    url: url.to_string(),
                    reason: format!("invalid base64 payload: {e}"),
                })
            })?
    } else {
        percent_decode(data)
    };

    let content_type = if mediatype.is_empty() {
        Some("text/plain".to_string())
    } else {
        Some(mediatype.to_string())
    };

    Ok(FetchedResource::new(bytes, content_type))
}

fn percent_decode(data: &str) -> Vec<u8> {
    let bytes = data.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &data[i + 1..i + 3];
            if let Ok(v) = u8::from_str_radix(hex, 16) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Resolve `reference` against `base`, returning an absolute URL string.
pub fn resolve_against_base(base: &str, reference: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(reference).ok().map(|u| u.to_string())
}

/// Origin (scheme + host + port) of a URL, for preconnect hinting.
///
/// `data:` and other non-network schemes have no origin to warm.
pub fn url_origin(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?;
    let mut origin = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        origin.push_str(&format!(":{port}"));
    }
    Some(origin)
}
