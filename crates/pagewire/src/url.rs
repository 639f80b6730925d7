// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! URL handling: parsing, base-URL stripping, and data-request detection.
//!
//! A request URL is either a path (`/about?x=1`) or an absolute URL
//! (`https://example.org/about`). The parsed pathname has the base URL and
//! the data-request suffix removed; the original pathname is kept alongside.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::UsageError;

/// Suffix marking a request for serialized page data instead of HTML.
pub const DATA_REQUEST_SUFFIX: &str = "/index.pageContext.json";

const FAKE_ORIGIN: &str = "http://fake-origin.example.org";

/// Structured form of a request URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlParsed {
    /// Scheme and host, if the URL was absolute.
    pub origin: Option<String>,
    /// Pathname with the base URL and data suffix removed.
    pub pathname: String,
    /// Pathname as received.
    pub pathname_original: String,
    /// Decoded query parameters (last value wins).
    pub search: BTreeMap<String, String>,
    /// Decoded query parameters with every value.
    pub search_all: BTreeMap<String, Vec<String>>,
    /// Raw query string including `?`.
    pub search_string: Option<String>,
    /// Decoded fragment.
    pub hash: String,
    /// Raw fragment including `#`.
    pub hash_string: Option<String>,
}

/// Result of [`parse_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    /// The structured URL.
    pub url_parsed: UrlParsed,
    /// Whether the pathname lies under the base URL.
    pub has_base_url: bool,
    /// Whether the pathname carried the data-request suffix.
    pub is_data_request: bool,
}

/// Checks that `url` can be parsed as a request URL.
pub fn validate_url(url: &str) -> Result<(), UsageError> {
    if url.is_empty() {
        return Err(UsageError::new("`pageContextInit.url` should not be empty"));
    }
    let candidate = if url.starts_with('/') {
        format!("{}{}", FAKE_ORIGIN, url)
    } else if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        return Err(UsageError::new(format!(
            "`pageContextInit.url` should start with `/` (e.g. `/product/42`) or `http` (e.g. `http://example.org/product/42`) but `pageContextInit.url === {:?}`",
            url
        )));
    };
    ::url::Url::parse(&candidate)
        .map(|_| ())
        .map_err(|e| UsageError::new(format!("`pageContextInit.url` {:?} is not a valid URL: {}", url, e)))
}

/// Checks that a base URL starts with `/`.
pub fn validate_base_url(base_url: &str) -> Result<(), UsageError> {
    if base_url.starts_with('/') {
        Ok(())
    } else {
        Err(UsageError::new(format!(
            "Base URL `{}` should start with `/`",
            base_url
        )))
    }
}

/// Parses a request URL against the given base URL.
pub fn parse_url(url: &str, base_url: &str) -> ParsedUrl {
    let (rest, hash_string) = match url.split_once('#') {
        Some((rest, hash)) => (rest, Some(format!("#{}", hash))),
        None => (url, None),
    };
    let (rest, search_string) = match rest.split_once('?') {
        Some((rest, search)) => (rest, Some(format!("?{}", search))),
        None => (rest, None),
    };
    let (origin, path) = split_origin(rest);
    let pathname_original = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    let (path, is_data_request) = match pathname_original.strip_suffix(DATA_REQUEST_SUFFIX) {
        Some("") => ("/".to_string(), true),
        Some(stripped) => (stripped.to_string(), true),
        None => (pathname_original.clone(), false),
    };

    let (pathname, has_base_url) = strip_base_url(&path, base_url);

    let mut search = BTreeMap::new();
    let mut search_all: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if let Some(query) = &search_string {
        for (key, value) in ::url::form_urlencoded::parse(query[1..].as_bytes()) {
            search.insert(key.to_string(), value.to_string());
            search_all.entry(key.into_owned()).or_default().push(value.into_owned());
        }
    }

    let hash = hash_string
        .as_deref()
        .map(|h| decode_component(&h[1..]))
        .unwrap_or_default();

    ParsedUrl {
        url_parsed: UrlParsed {
            origin,
            pathname,
            pathname_original,
            search,
            search_all,
            search_string,
            hash,
            hash_string,
        },
        has_base_url,
        is_data_request,
    }
}

fn split_origin(url: &str) -> (Option<String>, &str) {
    let Some(scheme_end) = url.find("://") else {
        return (None, url);
    };
    if !url[..scheme_end].chars().all(|c| c.is_ascii_alphabetic()) {
        return (None, url);
    }
    let after = scheme_end + 3;
    match url[after..].find('/') {
        Some(i) => (Some(url[..after + i].to_string()), &url[after + i..]),
        None => (Some(url.to_string()), "/"),
    }
}

fn strip_base_url(pathname: &str, base_url: &str) -> (String, bool) {
    let base = base_url.trim_end_matches('/');
    if base.is_empty() {
        return (pathname.to_string(), true);
    }
    if pathname == base {
        return ("/".to_string(), true);
    }
    match pathname.strip_prefix(base) {
        Some(rest) if rest.starts_with('/') => (rest.to_string(), true),
        _ => (pathname.to_string(), false),
    }
}

fn decode_component(s: &str) -> String {
    ::url::form_urlencoded::parse(format!("h={}", s.replace('+', "%2B")).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// Removes a trailing slash, except for the root pathname.
pub fn normalize_pathname(pathname: &str) -> &str {
    let trimmed = pathname.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Whether the pathname looks like a request for a static file (`/logo.svg`).
pub fn is_file_request(pathname: &str) -> bool {
    let last = pathname.rsplit('/').next().unwrap_or("");
    match last.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty()
                && !ext.is_empty()
                && ext.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        }
        None => false,
    }
}

/// Whether the pathname asks for a favicon, at any depth.
pub fn is_favicon_request(pathname: &str) -> bool {
    pathname.ends_with("/favicon.ico")
}

/// URL at which the serialized page data of `pathname` is served.
pub fn data_request_url(pathname: &str) -> String {
    let trimmed = pathname.trim_end_matches('/');
    format!("{}{}", trimmed, DATA_REQUEST_SUFFIX)
}

/// Output file URL for a pre-rendered HTML document.
///
/// `/` maps to `/index.html`. Other URLs map to `/about/index.html`, or to
/// `/about.html` when `no_extra_dir` is set.
pub fn html_file_url(url: &str, no_extra_dir: bool) -> String {
    let pathname = url.split(['?', '#']).next().unwrap_or("/");
    let trimmed = pathname.trim_end_matches('/');
    if trimmed.is_empty() {
        "/index.html".to_string()
    } else if no_extra_dir {
        format!("{}.html", trimmed)
    } else {
        format!("{}/index.html", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_path() {
        let parsed = parse_url("/about?tab=1&tab=2#top", "/");
        assert_eq!(parsed.url_parsed.pathname, "/about");
        assert_eq!(parsed.url_parsed.origin, None);
        assert_eq!(parsed.url_parsed.search.get("tab").map(String::as_str), Some("2"));
        assert_eq!(parsed.url_parsed.search_all["tab"], vec!["1", "2"]);
        assert_eq!(parsed.url_parsed.search_string.as_deref(), Some("?tab=1&tab=2"));
        assert_eq!(parsed.url_parsed.hash, "top");
        assert!(parsed.has_base_url);
        assert!(!parsed.is_data_request);
    }

    #[test]
    fn test_parse_absolute_url() {
        let parsed = parse_url("https://example.org/product/42", "/");
        assert_eq!(parsed.url_parsed.origin.as_deref(), Some("https://example.org"));
        assert_eq!(parsed.url_parsed.pathname, "/product/42");

        let bare = parse_url("https://example.org", "/");
        assert_eq!(bare.url_parsed.pathname, "/");
    }

    #[test]
    fn test_data_request_suffix() {
        let parsed = parse_url("/about/index.pageContext.json", "/");
        assert!(parsed.is_data_request);
        assert_eq!(parsed.url_parsed.pathname, "/about");
        assert_eq!(parsed.url_parsed.pathname_original, "/about/index.pageContext.json");

        let root = parse_url("/index.pageContext.json", "/");
        assert!(root.is_data_request);
        assert_eq!(root.url_parsed.pathname, "/");
    }

    #[test]
    fn test_base_url() {
        let parsed = parse_url("/app/about", "/app/");
        assert!(parsed.has_base_url);
        assert_eq!(parsed.url_parsed.pathname, "/about");

        let root = parse_url("/app", "/app");
        assert!(root.has_base_url);
        assert_eq!(root.url_parsed.pathname, "/");

        let outside = parse_url("/application", "/app");
        assert!(!outside.has_base_url);
        assert_eq!(outside.url_parsed.pathname, "/application");
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("/about").is_ok());
        assert!(validate_url("https://example.org/x").is_ok());
        assert!(validate_url("").is_err());
        assert!(validate_url("about").is_err());
        assert!(validate_base_url("app").is_err());
        assert!(validate_base_url("/app").is_ok());
    }

    #[test]
    fn test_is_file_request() {
        assert!(is_file_request("/logo.svg"));
        assert!(is_file_request("/assets/app.js"));
        assert!(!is_file_request("/about"));
        assert!(!is_file_request("/v1.2/Docs"));
        assert!(!is_file_request("/.hidden"));
    }

    #[test]
    fn test_file_urls() {
        assert_eq!(html_file_url("/", false), "/index.html");
        assert_eq!(html_file_url("/about", false), "/about/index.html");
        assert_eq!(html_file_url("/about/", true), "/about.html");
        assert_eq!(html_file_url("/404", true), "/404.html");
        assert_eq!(data_request_url("/"), "/index.pageContext.json");
        assert_eq!(data_request_url("/about"), "/about/index.pageContext.json");
    }

    #[test]
    fn test_normalize_pathname() {
        assert_eq!(normalize_pathname("/"), "/");
        assert_eq!(normalize_pathname("/about/"), "/about");
        assert_eq!(normalize_pathname("/about"), "/about");
    }

    #[test]
    fn test_favicon_request() {
        assert!(is_favicon_request("/favicon.ico"));
        assert!(is_favicon_request("/app/favicon.ico"));
        assert!(is_favicon_request("/x/y/favicon.ico"));
        assert!(!is_favicon_request("/favicon.ico.html"));
        assert!(!is_favicon_request("/my-favicon.ico"));
    }
}
