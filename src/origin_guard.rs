//! Origin allow-list decisions and CORS response headers for cross-origin form posts.

use axum::http::{header, HeaderMap, HeaderValue};

const ALLOWED_METHODS: &str = "POST, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type";
const PREFLIGHT_MAX_AGE: &str = "86400";

/// Which browser origins may post leads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OriginPolicy {
    pub allow_all: bool,
    pub allow_list: Vec<String>,
}

impl OriginPolicy {
    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            allow_list: Vec::new(),
        }
    }

    pub fn allow_list(origins: Vec<String>) -> Self {
        Self {
            allow_all: false,
            allow_list: origins.iter().map(|o| normalize(o)).collect(),
        }
    }

    /// Parses `ALLOWED_ORIGINS`: a comma-separated list, where `*` anywhere means allow all.
    pub fn parse(raw: &str) -> Self {
        let entries: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if entries.iter().any(|e| e == "*") {
            Self::allow_all()
        } else {
            Self::allow_list(entries)
        }
    }

    /// Exact-match check. A missing `Origin` is only accepted under `allow_all`.
    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        if self.allow_all {
            return true;
        }
        match origin {
            Some(origin) => {
                let origin = normalize(origin);
                self.allow_list.iter().any(|allowed| *allowed == origin)
            }
            None => false,
        }
    }

    /// Headers attached to every response for an allowed origin. Empty when not allowed.
    pub fn cors_headers(&self, origin: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if !self.is_allowed(origin) {
            return headers;
        }

        let allow_origin = if self.allow_all {
            Some(HeaderValue::from_static("*"))
        } else {
            origin.and_then(|o| HeaderValue::from_str(o).ok())
        };
        let Some(allow_origin) = allow_origin else {
            return headers;
        };

        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
        if !self.allow_all {
            headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        }
        headers
    }

    /// Preflight headers: the regular CORS headers plus a cache lifetime.
    pub fn preflight_headers(&self, origin: Option<&str>) -> HeaderMap {
        let mut headers = self.cors_headers(origin);
        if !headers.is_empty() {
            headers.insert(
                header::ACCESS_CONTROL_MAX_AGE,
                HeaderValue::from_static(PREFLIGHT_MAX_AGE),
            );
        }
        headers
    }
}

fn normalize(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_string()
}
