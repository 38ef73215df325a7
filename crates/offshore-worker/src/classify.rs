//! Request classification.
//!
//! Every intercepted GET is assigned exactly one [`ResourceClass`] by an
//! ordered rule list: first match wins, and requests matching no rule fall
//! through to `Other`. Classification is pure; the strategies do the work.

use http::Method;
use tracing::trace;

use crate::request::{FetchRequest, RequestDestination, RequestMode};

// ==================== Classes ====================

/// Resource classes the worker distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Top-level document navigation.
    Navigation,
    /// Backend API call.
    Api,
    /// Image subresource.
    Image,
    /// Script, style, worker or font subresource.
    StaticAsset,
    /// Anything else worth caching opportunistically.
    Other,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Navigation => "navigation",
            ResourceClass::Api => "api",
            ResourceClass::Image => "image",
            ResourceClass::StaticAsset => "static-asset",
            ResourceClass::Other => "other",
        }
    }
}

// ==================== Rules ====================

/// Predicate half of a classification rule.
#[derive(Debug, Clone)]
pub enum RequestMatcher {
    /// Top-level navigations.
    Navigation,
    /// Requests whose URL host is one of the given hosts.
    HostIn(Vec<String>),
    /// Requests with one of the given destinations.
    DestinationIn(Vec<RequestDestination>),
}

impl RequestMatcher {
    /// Test the matcher against a request.
    pub fn matches(&self, request: &FetchRequest) -> bool {
        match self {
            RequestMatcher::Navigation => request.mode == RequestMode::Navigate,
            RequestMatcher::HostIn(hosts) => match request.url.host_str() {
                Some(host) => hosts.iter().any(|h| h.eq_ignore_ascii_case(host)),
                None => false,
            },
            RequestMatcher::DestinationIn(destinations) => {
                destinations.contains(&request.destination)
            }
        }
    }
}

/// One ordered classification rule.
#[derive(Debug, Clone)]
pub struct ClassRule {
    pub matcher: RequestMatcher,
    pub class: ResourceClass,
}

impl ClassRule {
    pub fn new(matcher: RequestMatcher, class: ResourceClass) -> Self {
        Self { matcher, class }
    }
}

// ==================== Classifier ====================

/// Ordered request classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassRule>,
}

impl Classifier {
    /// Create a classifier from an explicit rule list.
    pub fn new(rules: Vec<ClassRule>) -> Self {
        Self { rules }
    }

    /// The standard rule order: navigations first, then API hosts, then
    /// images, then static assets.
    pub fn standard(api_hosts: &[String]) -> Self {
        Self::new(vec![
            ClassRule::new(RequestMatcher::Navigation, ResourceClass::Navigation),
            ClassRule::new(
                RequestMatcher::HostIn(
                    api_hosts.iter().map(|h| h.to_ascii_lowercase()).collect(),
                ),
                ResourceClass::Api,
            ),
            ClassRule::new(
                RequestMatcher::DestinationIn(vec![RequestDestination::Image]),
                ResourceClass::Image,
            ),
            ClassRule::new(
                RequestMatcher::DestinationIn(vec![
                    RequestDestination::Script,
                    RequestDestination::Style,
                    RequestDestination::Worker,
                    RequestDestination::Font,
                ]),
                ResourceClass::StaticAsset,
            ),
        ])
    }

    /// Classify a request. `None` means the request is not intercepted.
    ///
    /// Mutations (POST, PUT, ...) are never intercepted; every GET gets
    /// exactly one class.
    pub fn classify(&self, request: &FetchRequest) -> Option<ResourceClass> {
        if request.method != Method::GET {
            return None;
        }
        let class = self
            .rules
            .iter()
            .find(|rule| rule.matcher.matches(request))
            .map(|rule| rule.class)
            .unwrap_or(ResourceClass::Other);
        trace!(
            url = %request.url,
            destination = request.destination.as_str(),
            class = class.as_str(),
            "classified request"
        );
        Some(class)
    }
}
