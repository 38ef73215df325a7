//! Typed request/response pair for fetch interception.
//!
//! The worker sees outgoing requests as [`FetchRequest`] values and always
//! answers with a [`FetchResponse`]. Conversions to and from stored
//! [`CacheEntry`] snapshots live here so every strategy stores and replays
//! responses the same way.

use bytes::Bytes;
use hashbrown::HashMap;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use offshore_cache::{CacheEntry, CacheKey};
use url::Url;

// ==================== Requests ====================

/// How a request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document navigation.
    Navigate,
    /// Same-origin subresource.
    SameOrigin,
    /// Cross-origin subresource without CORS.
    NoCors,
    /// Cross-origin subresource with CORS.
    #[default]
    Cors,
}

/// What kind of resource a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestDestination {
    Document,
    Script,
    Style,
    Image,
    Font,
    Worker,
    Audio,
    Video,
    Manifest,
    #[default]
    Other,
}

impl RequestDestination {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestDestination::Document => "document",
            RequestDestination::Script => "script",
            RequestDestination::Style => "style",
            RequestDestination::Image => "image",
            RequestDestination::Font => "font",
            RequestDestination::Worker => "worker",
            RequestDestination::Audio => "audio",
            RequestDestination::Video => "video",
            RequestDestination::Manifest => "manifest",
            RequestDestination::Other => "",
        }
    }
}

/// An intercepted outgoing request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Absolute request URL.
    pub url: Url,

    /// Request method.
    pub method: Method,

    /// Request headers.
    pub headers: HeaderMap,

    /// How the request was initiated.
    pub mode: RequestMode,

    /// What the request is fetching.
    pub destination: RequestDestination,
}

impl FetchRequest {
    /// Create a GET subresource request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            mode: RequestMode::default(),
            destination: RequestDestination::default(),
        }
    }

    /// Create a POST request.
    pub fn post(url: Url) -> Self {
        Self {
            method: Method::POST,
            ..Self::get(url)
        }
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            destination: RequestDestination::Document,
            ..Self::get(url)
        }
    }

    /// Set the destination.
    pub fn with_destination(mut self, destination: RequestDestination) -> Self {
        self.destination = destination;
        self
    }

    /// Set the mode.
    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// The identity this request is cached under.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.method.as_str(), &self.url)
    }

    /// Whether the request targets the given origin.
    pub fn is_same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }
}

// ==================== Responses ====================

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Live network reply.
    Network,
    /// Replayed from a cache partition.
    Cache,
    /// Synthesized offline fallback.
    Fallback,
}

/// A response handed back to the page.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Response status.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,

    /// Where the response came from.
    pub source: ResponseSource,
}

impl FetchResponse {
    /// Build a response from a live network reply.
    pub fn network(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            source: ResponseSource::Network,
        }
    }

    /// Build a synthesized response, used by the offline fallbacks.
    pub fn synthetic(status: StatusCode, content_type: Option<&str>, body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(value) = content_type.and_then(|ct| HeaderValue::from_str(ct).ok()) {
            headers.insert(CONTENT_TYPE, value);
        }
        Self {
            status,
            headers,
            body,
            source: ResponseSource::Fallback,
        }
    }

    /// Rehydrate a response from a stored snapshot.
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            status: StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK),
            headers: headers_from_map(&entry.headers),
            body: entry.body.clone(),
            source: ResponseSource::Cache,
        }
    }

    /// Snapshot the response for storage.
    ///
    /// The body is shared, not copied, so snapshotting a response that is
    /// about to be returned to the page is cheap.
    pub fn to_entry(&self) -> CacheEntry {
        CacheEntry::new(
            self.status.as_u16(),
            headers_to_map(&self.headers),
            self.body.clone(),
        )
    }

    /// Whether the status is 2xx.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Canonical reason phrase for the status.
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    /// Content-Type header, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}

// ==================== Header conversions ====================

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn headers_from_map(map: &HashMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in map {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    headers
}
