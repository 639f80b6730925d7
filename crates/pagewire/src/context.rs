// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Page and global contexts.
//!
//! A [`PageContext`] accumulates everything known about one URL as it moves
//! through the pipeline. URL-derived values (`url_parsed`, `url_pathname`,
//! `is_data_request`) are methods computed from `url` and the base URL on
//! every call, so they never go stale.
//!
//! A [`GlobalContext`] holds the project-wide state loaded once at startup:
//! page files, page ids, and routes.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::error::{PageError, UsageError};
use crate::page_files::{PageFileRegistry, PageFileSource};
use crate::router::{load_page_routes, PageRoute, RouteOutcome};
use crate::url::{parse_url, validate_base_url, validate_url, UrlParsed};

/// Caller-supplied input of a render call.
#[derive(Debug, Clone)]
pub struct PageContextInit {
    url: String,
    fields: Map<String, Value>,
}

impl PageContextInit {
    /// Creates the input for `url`.
    ///
    /// The URL must start with `/` or `http` and be parseable.
    pub fn new(url: impl Into<String>) -> Result<Self, UsageError> {
        let url = url.into();
        validate_url(&url)?;
        Ok(Self {
            url,
            fields: Map::new(),
        })
    }

    /// Adds a caller field, visible to every hook.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Adds caller fields.
    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// The requested URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The caller fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// State of one URL flowing through the pipeline.
#[derive(Debug, Clone)]
pub struct PageContext {
    url: String,
    base_url: String,
    page_id: Option<String>,
    route_params: BTreeMap<String, String>,
    is_404: bool,
    fields: Map<String, Value>,
    is_prerendering: bool,
    uses_client_router: bool,
    provided_by_prerender_hook: bool,
}

impl PageContext {
    pub(crate) fn new(url: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            base_url: base_url.into(),
            page_id: None,
            route_params: BTreeMap::new(),
            is_404: false,
            fields: Map::new(),
            is_prerendering: false,
            uses_client_router: false,
            provided_by_prerender_hook: false,
        }
    }

    /// The URL as given.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The base URL the application is served under.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The parsed URL.
    pub fn url_parsed(&self) -> UrlParsed {
        parse_url(&self.url, &self.base_url).url_parsed
    }

    /// Pathname with the base URL and data-request suffix removed.
    pub fn url_pathname(&self) -> String {
        parse_url(&self.url, &self.base_url).url_parsed.pathname
    }

    /// Whether the URL requests serialized page data.
    pub fn is_data_request(&self) -> bool {
        parse_url(&self.url, &self.base_url).is_data_request
    }

    /// Whether the URL lies under the base URL.
    pub fn has_base_url(&self) -> bool {
        parse_url(&self.url, &self.base_url).has_base_url
    }

    /// The matched page, once routed.
    pub fn page_id(&self) -> Option<&str> {
        self.page_id.as_deref()
    }

    /// Parameters extracted by the route.
    pub fn route_params(&self) -> &BTreeMap<String, String> {
        &self.route_params
    }

    /// Whether the error page is rendered because no page matched.
    pub fn is_404(&self) -> bool {
        self.is_404
    }

    /// Whether the context is being pre-rendered.
    pub fn is_prerendering(&self) -> bool {
        self.is_prerendering
    }

    /// Whether hooks run for this context were already provided by a
    /// `prerender()` hook.
    pub fn is_provided_by_prerender_hook(&self) -> bool {
        self.provided_by_prerender_hook
    }

    /// A caller or hook field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Every caller or hook field.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Sets a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// JSON view of the context, as handed to script hooks.
    pub fn to_json(&self) -> Value {
        let mut view = self.fields.clone();
        view.insert("url".into(), json!(self.url));
        view.insert("urlPathname".into(), json!(self.url_pathname()));
        view.insert("urlParsed".into(), json!(self.url_parsed()));
        view.insert("routeParams".into(), json!(self.route_params));
        view.insert("pageId".into(), json!(self.page_id));
        view.insert("is404".into(), json!(self.is_404));
        view.insert("isPrerendering".into(), json!(self.is_prerendering));
        Value::Object(view)
    }

    /// The data payload sent to the client: `{"pageContext": {...}}` with
    /// the page id and the `pass_to_client` keys that are set.
    pub fn serialize_for_client(&self, pass_to_client: &[String]) -> Result<String, UsageError> {
        let view = self.to_json();
        let mut payload = Map::new();
        payload.insert("_pageId".into(), json!(self.page_id));
        if self.is_404 {
            payload.insert("is404".into(), json!(true));
        }
        for key in pass_to_client {
            if let Some(value) = view.get(key) {
                payload.insert(key.clone(), value.clone());
            }
        }
        serde_json::to_string(&json!({ "pageContext": payload })).map_err(|e| {
            UsageError::new(format!("Cannot serialize the page context for the client: {}", e))
        })
    }

    pub(crate) fn set_route(&mut self, outcome: RouteOutcome) {
        if self.page_id.is_none() {
            self.page_id = outcome.page_id;
            self.route_params = outcome.route_params;
        }
    }

    /// Substitutes the error page. Only place where an assigned page id is
    /// replaced.
    pub(crate) fn set_error_page(&mut self, error_page_id: &str, is_404: bool) {
        self.page_id = Some(error_page_id.to_string());
        self.is_404 = is_404;
        if !is_404 {
            self.route_params.clear();
        }
    }

    pub(crate) fn set_prerendering(&mut self, uses_client_router: bool) {
        self.is_prerendering = true;
        self.uses_client_router = uses_client_router;
    }

    pub(crate) fn uses_client_router(&self) -> bool {
        self.uses_client_router
    }

    pub(crate) fn mark_provided_by_prerender_hook(&mut self) {
        self.provided_by_prerender_hook = true;
    }

    /// Merges fields, overriding existing keys.
    pub(crate) fn merge_fields(&mut self, fields: Map<String, Value>) {
        self.fields.extend(fields);
    }

    /// Merges fields, keeping existing keys.
    pub(crate) fn merge_missing_fields(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            if !self.fields.contains_key(key) {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Project-wide state, loaded once.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    registry: PageFileRegistry,
    page_ids: Vec<String>,
    page_routes: Vec<PageRoute>,
    base_url: String,
    fields: Map<String, Value>,
    is_prerendering: bool,
    uses_client_router: bool,
}

impl GlobalContext {
    /// Lists the page files of `source` and loads the page routes.
    pub async fn load(source: &dyn PageFileSource, base_url: &str) -> Result<Self, PageError> {
        let registry = PageFileRegistry::load(source).await?;
        Self::new(registry, base_url).await
    }

    /// Builds the global context from a registry.
    pub async fn new(registry: PageFileRegistry, base_url: &str) -> Result<Self, PageError> {
        validate_base_url(base_url)?;
        let page_ids = registry.page_ids();
        let page_routes = load_page_routes(&registry, &page_ids).await?;
        tracing::debug!(pages = page_ids.len(), routes = page_routes.len(), "loaded global context");
        Ok(Self {
            registry,
            page_ids,
            page_routes,
            base_url: base_url.to_string(),
            fields: Map::new(),
            is_prerendering: false,
            uses_client_router: false,
        })
    }

    /// The page-file registry.
    pub fn registry(&self) -> &PageFileRegistry {
        &self.registry
    }

    /// Page ids, sorted.
    pub fn page_ids(&self) -> &[String] {
        &self.page_ids
    }

    /// Routes of every page except the error page.
    pub fn page_routes(&self) -> &[PageRoute] {
        &self.page_routes
    }

    /// The base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Global fields, copied into every page context.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Whether this context drives a pre-render run.
    pub fn is_prerendering(&self) -> bool {
        self.is_prerendering
    }

    /// Id of the error page, if any.
    pub fn error_page_id(&self) -> Option<&str> {
        self.page_ids
            .iter()
            .map(String::as_str)
            .find(|id| crate::page_files::is_error_page(id))
    }

    /// A fresh page context for `url`, seeded with the global fields.
    pub fn page_context(&self, url: impl Into<String>) -> PageContext {
        let mut ctx = PageContext::new(url, self.base_url.clone());
        ctx.fields = self.fields.clone();
        if self.is_prerendering {
            ctx.set_prerendering(self.uses_client_router);
        }
        ctx
    }

    /// JSON view of the context, as handed to `onBeforePrerender()`.
    pub fn to_json(&self) -> Value {
        let mut view = self.fields.clone();
        view.insert("baseUrl".into(), json!(self.base_url));
        view.insert("pageIds".into(), json!(self.page_ids));
        view.insert("isPrerendering".into(), json!(self.is_prerendering));
        Value::Object(view)
    }

    pub(crate) fn set_prerendering(&mut self, uses_client_router: bool) {
        self.is_prerendering = true;
        self.uses_client_router = uses_client_router;
    }

    pub(crate) fn merge_fields(&mut self, fields: Map<String, Value>) {
        self.fields.extend(fields);
    }
}
