//! Synthesized offline responses.
//!
//! When the network fails and the caches come up empty the worker still has
//! to answer something. These are the canned responses it answers with; the
//! page treats them as real replies, so their shapes are part of the
//! contract with the app.

use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;

use crate::request::FetchResponse;

/// Inline placeholder shown where an image could not be served.
const OFFLINE_IMAGE_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="400" height="300"><rect width="100%" height="100%" fill="#f0f0f0"/><text x="50%" y="50%" dominant-baseline="middle" text-anchor="middle" fill="#999" font-family="Arial" font-size="18">Imagen offline</text></svg>"##;

/// Wire shape of the promotions fallback; declaration order is the
/// backend's key order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiFallback<'a> {
    status: &'a str,
    promo_result: Vec<serde_json::Value>,
    offline: bool,
    message: &'a str,
}

/// Safe empty payload for the promotions API.
///
/// Shaped like a real backend reply so the page renders an empty promotion
/// list instead of an error: success status flag, empty result list, an
/// `offline` marker and a human-readable message.
pub fn offline_api(message: &str) -> FetchResponse {
    let payload = ApiFallback {
        status: "SUCCESS",
        promo_result: Vec::new(),
        offline: true,
        message,
    };
    let body = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());
    FetchResponse::synthetic(StatusCode::OK, Some("application/json"), Bytes::from(body))
}

/// Placeholder image for offline cache misses.
pub fn offline_image() -> FetchResponse {
    FetchResponse::synthetic(
        StatusCode::OK,
        Some("image/svg+xml"),
        Bytes::from_static(OFFLINE_IMAGE_SVG.as_bytes()),
    )
}

/// Last resort for a navigation with no cached shell.
pub fn offline_document() -> FetchResponse {
    FetchResponse::synthetic(StatusCode::SERVICE_UNAVAILABLE, None, Bytes::new())
}

/// Last resort for a static asset.
pub fn offline_asset() -> FetchResponse {
    FetchResponse::synthetic(StatusCode::GATEWAY_TIMEOUT, None, Bytes::new())
}

/// Last resort for everything else.
pub fn offline_generic() -> FetchResponse {
    FetchResponse::synthetic(StatusCode::INTERNAL_SERVER_ERROR, None, Bytes::new())
}
