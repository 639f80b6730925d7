// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Per-request rendering.
//!
//! [`Renderer::render_page`] drives one URL through
//! `init -> routed -> files loaded -> hooks run -> response built` and never
//! fails: any error, including a panic, ends in the 500 path, which renders
//! the error page with status 500. If that fails too, the result carries no
//! response and the original error.
//!
//! # Example
//!
//! ```rust,no_run
//! use pagewire::{DocumentHtml, FileExports, GlobalContext, MemoryPageFiles, PageContextInit, RenderOptions, Renderer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let files = MemoryPageFiles::new().with_file(
//!     "/pages/index.page.server.lua",
//!     FileExports::new().with_render(|_| async { Ok(DocumentHtml::escape("Hello").into()) }),
//! );
//! let global = GlobalContext::load(&files, "/").await?;
//! let renderer = Renderer::new(global, RenderOptions::default());
//!
//! let page = renderer.render_page(PageContextInit::new("/")?).await;
//! let response = page.http_response.expect("page exists");
//! assert_eq!(response.status_code(), 200);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::concurrency::ConcurrencyLimit;
use crate::context::{GlobalContext, PageContext, PageContextInit};
use crate::error::{HookFailure, PageError};
use crate::hooks::{run_before_render_hooks, run_render_hook};
use crate::page_files::PageFileSource;
use crate::response::HttpResponse;
use crate::router::{describe_routes, route};
use crate::url::{is_favicon_request, is_file_request};

/// Options of a [`Renderer`].
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Suppresses development warnings (unmatched URLs, missing error page).
    pub is_production: bool,
    /// Maximum number of pages rendered at once; unbounded if `None`.
    pub max_concurrent_renders: Option<usize>,
}

/// Terminal result of a render call.
#[derive(Debug)]
pub struct RenderedPage {
    /// The page context as it stood when rendering ended.
    pub page_context: PageContext,
    /// The response; `None` means "emit nothing" (e.g. a static asset).
    pub http_response: Option<HttpResponse>,
    /// The error that led to the 500 path, if any.
    pub error: Option<PageError>,
}

impl RenderedPage {
    fn new(page_context: PageContext, http_response: Option<HttpResponse>) -> Self {
        Self {
            page_context,
            http_response,
            error: None,
        }
    }
}

/// Logs each failure once, keyed by its identity.
#[derive(Debug, Default)]
pub(crate) struct ErrorLog {
    seen: HashSet<usize>,
}

impl ErrorLog {
    /// Logs `err` unless it was already logged. Returns whether it logged.
    pub(crate) fn log_once(&mut self, err: &PageError) -> bool {
        if !self.seen.insert(err.identity()) {
            return false;
        }
        match err {
            PageError::Hook(failure) => error!(
                hook = %failure.hook_name,
                file = %failure.hook_file_path,
                "{}",
                err
            ),
            _ => error!("{}", err),
        }
        true
    }

    pub(crate) fn is_logged(&self, err: &PageError) -> bool {
        self.seen.contains(&err.identity())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.seen.len()
    }
}

enum Initialized {
    NoResponse(PageContext),
    Ready(PageContext),
}

/// Renders pages of one project.
#[derive(Debug)]
pub struct Renderer {
    global: Arc<GlobalContext>,
    options: RenderOptions,
    limit: Option<ConcurrencyLimit>,
    warned_missing_error_page: AtomicBool,
}

impl Renderer {
    /// Creates a renderer over a loaded global context.
    pub fn new(global: impl Into<Arc<GlobalContext>>, options: RenderOptions) -> Self {
        let limit = options.max_concurrent_renders.map(ConcurrencyLimit::new);
        Self {
            global: global.into(),
            options,
            limit,
            warned_missing_error_page: AtomicBool::new(false),
        }
    }

    /// Loads the global context from `source` and creates a renderer.
    pub async fn load(
        source: &dyn PageFileSource,
        base_url: &str,
        options: RenderOptions,
    ) -> Result<Self, PageError> {
        let global = GlobalContext::load(source, base_url).await?;
        Ok(Self::new(global, options))
    }

    /// The global context.
    pub fn global(&self) -> &GlobalContext {
        &self.global
    }

    /// Renders the page for `init`. Never fails.
    pub async fn render_page(&self, init: PageContextInit) -> RenderedPage {
        let mut log = ErrorLog::default();
        match &self.limit {
            Some(limit) => limit.run(self.render_page_logged(&init, &mut log)).await,
            None => self.render_page_logged(&init, &mut log).await,
        }
    }

    async fn render_page_logged(&self, init: &PageContextInit, log: &mut ErrorLog) -> RenderedPage {
        let attempt = AssertUnwindSafe(self.try_render_page(init)).catch_unwind().await;
        let err = match attempt {
            Ok(Ok(page)) => return page,
            Ok(Err(err)) => err,
            Err(panic) => HookFailure::from_panic(panic, "renderPage", "<pagewire>").into(),
        };
        log.log_once(&err);

        let fallback = AssertUnwindSafe(self.render_error_page(init, &err, log))
            .catch_unwind()
            .await;
        match fallback {
            Ok(Ok(mut page)) => {
                page.error = Some(err);
                page
            }
            Ok(Err(fallback_err)) => {
                if !log.is_logged(&fallback_err) {
                    warn!("The error page could not be rendered: {}", fallback_err);
                }
                self.failed_page(init, err)
            }
            Err(_) => {
                warn!("The error page could not be rendered: it panicked");
                self.failed_page(init, err)
            }
        }
    }

    fn failed_page(&self, init: &PageContextInit, err: PageError) -> RenderedPage {
        let page_context = match self.initialize(init) {
            Initialized::NoResponse(ctx) | Initialized::Ready(ctx) => ctx,
        };
        RenderedPage {
            page_context,
            http_response: None,
            error: Some(err),
        }
    }

    fn initialize(&self, init: &PageContextInit) -> Initialized {
        let mut ctx = self.global.page_context(init.url());
        ctx.merge_fields(init.fields().clone());
        if is_favicon_request(&ctx.url_parsed().pathname_original) || !ctx.has_base_url() {
            Initialized::NoResponse(ctx)
        } else {
            Initialized::Ready(ctx)
        }
    }

    async fn try_render_page(&self, init: &PageContextInit) -> Result<RenderedPage, PageError> {
        let mut ctx = match self.initialize(init) {
            Initialized::NoResponse(ctx) => return Ok(RenderedPage::new(ctx, None)),
            Initialized::Ready(ctx) => ctx,
        };

        let outcome = route(&self.global, &ctx).await?;
        ctx.set_route(outcome);

        let status_code = if ctx.page_id().is_some() {
            200
        } else {
            if !ctx.is_data_request() {
                self.warn_unmatched(&ctx);
            }
            match self.global.error_page_id() {
                Some(error_page_id) => {
                    ctx.set_error_page(error_page_id, true);
                    404
                }
                None => {
                    self.warn_missing_error_page();
                    let response = ctx.is_data_request().then(|| {
                        HttpResponse::json(200, json!({ "pageContext404PageDoesNotExist": true }).to_string())
                    });
                    return Ok(RenderedPage::new(ctx, response));
                }
            }
        };

        self.render_loaded(ctx, status_code).await
    }

    async fn render_loaded(&self, mut ctx: PageContext, status_code: u16) -> Result<RenderedPage, PageError> {
        let page_id = ctx.page_id().unwrap_or_default().to_string();
        let page = Arc::new(self.global.registry().load_page(&page_id).await?);

        run_before_render_hooks(&mut ctx, &page).await?;

        if ctx.is_data_request() {
            let body = ctx.serialize_for_client(&page.pass_to_client)?;
            return Ok(RenderedPage::new(ctx, Some(HttpResponse::json(200, body))));
        }

        let rendered = run_render_hook(&mut ctx, &page).await?;
        let response = HttpResponse::from_rendered(rendered, status_code);
        Ok(RenderedPage::new(ctx, response))
    }

    /// The 500 path: renders the error page for a failed request.
    async fn render_error_page(
        &self,
        init: &PageContextInit,
        err: &PageError,
        log: &mut ErrorLog,
    ) -> Result<RenderedPage, PageError> {
        let mut ctx = match self.initialize(init) {
            Initialized::NoResponse(ctx) => return Ok(RenderedPage::new(ctx, None)),
            Initialized::Ready(ctx) => ctx,
        };

        if ctx.is_data_request() {
            let response = HttpResponse::json(500, json!({ "serverSideError": true }).to_string());
            return Ok(RenderedPage::new(ctx, Some(response)));
        }

        let Some(error_page_id) = self.global.error_page_id() else {
            self.warn_missing_error_page();
            return Ok(RenderedPage::new(ctx, None));
        };
        ctx.set_error_page(error_page_id, false);
        ctx.insert("errorWhileRendering", err.to_string());

        let page = Arc::new(self.global.registry().load_page(error_page_id).await?);

        // The error page still renders if its own data hooks fail.
        if let Err(hook_err) = run_before_render_hooks(&mut ctx, &page).await {
            if !log.is_logged(&hook_err) {
                debug!(error = %hook_err, "before-render hook of the error page failed");
            }
        }

        match run_render_hook(&mut ctx, &page).await {
            Ok(rendered) => {
                let response = HttpResponse::from_rendered(rendered, 500);
                Ok(RenderedPage::new(ctx, response))
            }
            Err(render_err) => {
                match render_err.as_hook_failure() {
                    Some(failure) => warn!(
                        "The error page could not be rendered because your `{}()` hook exported by {} threw an error: {}",
                        failure.hook_name, failure.hook_file_path, failure.error
                    ),
                    None => warn!("The error page could not be rendered: {}", render_err),
                }
                Ok(RenderedPage::new(ctx, None))
            }
        }
    }

    fn warn_unmatched(&self, ctx: &PageContext) {
        if self.options.is_production {
            return;
        }
        let pathname = ctx.url_pathname();
        if is_file_request(&pathname) {
            return;
        }
        let routes = describe_routes(self.global.page_routes());
        if routes.is_empty() {
            warn!("No page found. Create a file that ends with the suffix `.page.server`.");
        } else {
            warn!(
                url = %pathname,
                "URL `{}` doesn't match the route of any page. Routes:\n  {}",
                pathname,
                routes.join("\n  ")
            );
        }
    }

    fn warn_missing_error_page(&self) {
        if self.options.is_production {
            return;
        }
        if !self.warned_missing_error_page.swap(true, Ordering::Relaxed) {
            warn!("No `_error.page` found. Create one to show users a 404 / 500 page.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exports::{BeforeRenderCall, FileExports, RenderValue};
    use crate::html::DocumentHtml;
    use crate::page_files::MemoryPageFiles;
    use crate::response::{CONTENT_TYPE_HTML, CONTENT_TYPE_JSON};
    use serde_json::Value;

    fn page(body: &'static str) -> FileExports {
        FileExports::new().with_render(move |_| async move { Ok(DocumentHtml::escape(body).into()) })
    }

    fn error_page() -> FileExports {
        FileExports::new().with_render(|ctx: PageContext| async move {
            let text = if ctx.is_404() { "not found" } else { "server error" };
            Ok(RenderValue::from(DocumentHtml::escape(text)))
        })
    }

    async fn renderer(source: MemoryPageFiles) -> Renderer {
        Renderer::load(&source, "/", RenderOptions::default()).await.unwrap()
    }

    async fn body(page: RenderedPage) -> (u16, String) {
        let response = page.http_response.expect("response");
        (response.status_code(), response.get_body().await.unwrap())
    }

    #[tokio::test]
    async fn test_render_found_page() {
        let renderer = renderer(MemoryPageFiles::new().with_file("/pages/index.page.server.lua", page("home"))).await;
        let rendered = renderer.render_page(PageContextInit::new("/").unwrap()).await;
        assert!(rendered.error.is_none());
        let response = rendered.http_response.as_ref().unwrap();
        assert_eq!(response.content_type(), CONTENT_TYPE_HTML);
        assert_eq!(body(rendered).await, (200, "home".to_string()));
    }

    #[tokio::test]
    async fn test_not_found_without_error_page() {
        let renderer = renderer(MemoryPageFiles::new().with_file("/pages/index.page.server.lua", page("home"))).await;
        let rendered = renderer.render_page(PageContextInit::new("/missing").unwrap()).await;
        assert!(rendered.http_response.is_none());

        let data = renderer
            .render_page(PageContextInit::new("/missing/index.pageContext.json").unwrap())
            .await;
        let response = data.http_response.unwrap();
        assert_eq!(response.content_type(), CONTENT_TYPE_JSON);
        assert_eq!(response.status_code(), 200);
        let payload: Value = serde_json::from_str(response.body().unwrap()).unwrap();
        assert_eq!(payload, json!({ "pageContext404PageDoesNotExist": true }));
    }

    #[tokio::test]
    async fn test_not_found_with_error_page() {
        let renderer = renderer(
            MemoryPageFiles::new()
                .with_file("/pages/index.page.server.lua", page("home"))
                .with_file("/pages/_error.page.server.lua", error_page()),
        )
        .await;
        let rendered = renderer.render_page(PageContextInit::new("/missing").unwrap()).await;
        assert!(rendered.page_context.is_404());
        assert_eq!(body(rendered).await, (404, "not found".to_string()));
    }

    #[tokio::test]
    async fn test_favicon_and_foreign_base_have_no_response() {
        let source = MemoryPageFiles::new().with_file("/pages/index.page.server.lua", page("home"));
        let renderer = Renderer::load(&source, "/app", RenderOptions::default()).await.unwrap();
        let favicon = renderer.render_page(PageContextInit::new("/favicon.ico").unwrap()).await;
        assert!(favicon.http_response.is_none());
        let foreign = renderer.render_page(PageContextInit::new("/other").unwrap()).await;
        assert!(foreign.http_response.is_none());
        let home = renderer.render_page(PageContextInit::new("/app").unwrap()).await;
        assert!(home.http_response.is_some());
    }

    #[tokio::test]
    async fn test_nested_favicon_has_no_response() {
        let source = MemoryPageFiles::new()
            .with_file("/pages/index.page.server.lua", page("home"))
            .with_file("/pages/_error.page.server.lua", error_page());
        let renderer = Renderer::load(&source, "/app", RenderOptions::default()).await.unwrap();
        for url in ["/app/favicon.ico", "/app/x/favicon.ico"] {
            let rendered = renderer.render_page(PageContextInit::new(url).unwrap()).await;
            assert!(rendered.http_response.is_none(), "{}", url);
            assert!(rendered.error.is_none());
        }
    }

    #[tokio::test]
    async fn test_render_error_uses_error_page_and_logs_once() {
        let failing_error_page = error_page().with_on_before_render(|_| async { Err("error page data failed".into()) });
        let renderer = renderer(
            MemoryPageFiles::new()
                .with_file(
                    "/pages/index.page.server.lua",
                    FileExports::new().with_render(|_| async { Err("template crashed".into()) }),
                )
                .with_file("/pages/_error.page.server.lua", failing_error_page),
        )
        .await;

        let init = PageContextInit::new("/").unwrap();
        let mut log = ErrorLog::default();
        let rendered = renderer.render_page_logged(&init, &mut log).await;
        assert_eq!(log.len(), 1);
        let err = rendered.error.as_ref().unwrap();
        assert_eq!(err.as_hook_failure().unwrap().hook_name, "render");
        assert_eq!(body(rendered).await, (500, "server error".to_string()));
    }

    #[tokio::test]
    async fn test_render_error_without_error_page() {
        let renderer = renderer(MemoryPageFiles::new().with_file(
            "/pages/index.page.server.lua",
            FileExports::new().with_render(|_| async { Err("boom".into()) }),
        ))
        .await;
        let rendered = renderer.render_page(PageContextInit::new("/").unwrap()).await;
        assert!(rendered.http_response.is_none());
        assert!(rendered.error.is_some());
    }

    #[tokio::test]
    async fn test_error_page_render_failure_gives_no_response() {
        let renderer = renderer(
            MemoryPageFiles::new()
                .with_file(
                    "/pages/index.page.server.lua",
                    FileExports::new().with_render(|_| async { Err("boom".into()) }),
                )
                .with_file(
                    "/pages/_error.page.server.lua",
                    FileExports::new().with_render(|_| async { Err("also boom".into()) }),
                ),
        )
        .await;
        let rendered = renderer.render_page(PageContextInit::new("/").unwrap()).await;
        assert!(rendered.http_response.is_none());
        assert!(rendered.error.is_some());
    }

    #[tokio::test]
    async fn test_data_request_error_payload() {
        let renderer = renderer(MemoryPageFiles::new().with_file(
            "/pages/index.page.server.lua",
            FileExports::new()
                .with_render(|_| async { Ok(RenderValue::Null) })
                .with_on_before_render(|_| async { Err("db down".into()) }),
        ))
        .await;
        let rendered = renderer
            .render_page(PageContextInit::new("/index.pageContext.json").unwrap())
            .await;
        let response = rendered.http_response.unwrap();
        assert_eq!(response.status_code(), 500);
        let payload: Value = serde_json::from_str(response.body().unwrap()).unwrap();
        assert_eq!(payload, json!({ "serverSideError": true }));
    }

    #[tokio::test]
    async fn test_data_request_serializes_pass_to_client() {
        let renderer = renderer(MemoryPageFiles::new().with_file(
            "/pages/todo.page.server.lua",
            FileExports::new()
                .with_render(|_| async { panic!("render must not run for data requests") })
                .with_pass_to_client(["todos"])
                .with_on_before_render(|call: BeforeRenderCall| async move {
                    assert!(call.page_context.is_data_request());
                    Ok(json!({ "pageContext": { "todos": ["a"], "secret": 1 } }))
                }),
        ))
        .await;
        let rendered = renderer
            .render_page(PageContextInit::new("/todo/index.pageContext.json").unwrap())
            .await;
        let response = rendered.http_response.unwrap();
        assert_eq!(response.content_type(), CONTENT_TYPE_JSON);
        let payload: Value = serde_json::from_str(response.body().unwrap()).unwrap();
        assert_eq!(
            payload,
            json!({ "pageContext": { "_pageId": "/pages/todo", "todos": ["a"] } })
        );
    }

    #[tokio::test]
    async fn test_panicking_hook_is_contained() {
        let renderer = renderer(
            MemoryPageFiles::new()
                .with_file(
                    "/pages/index.page.server.lua",
                    FileExports::new().with_render(|_| async { panic!("unexpected") }),
                )
                .with_file("/pages/_error.page.server.lua", error_page()),
        )
        .await;
        let rendered = renderer.render_page(PageContextInit::new("/").unwrap()).await;
        assert_eq!(body(rendered).await, (500, "server error".to_string()));
    }

    #[tokio::test]
    async fn test_plain_string_render_is_usage_error() {
        let renderer = renderer(MemoryPageFiles::new().with_file(
            "/pages/index.page.server.lua",
            FileExports::new().with_render(|_| async { Ok(RenderValue::String("<html></html>".into())) }),
        ))
        .await;
        let rendered = renderer.render_page(PageContextInit::new("/").unwrap()).await;
        assert!(rendered.error.unwrap().is_usage());
    }

    #[tokio::test]
    async fn test_caller_fields_reach_hooks() {
        let renderer = renderer(MemoryPageFiles::new().with_file(
            "/pages/index.page.server.lua",
            FileExports::new().with_render(|ctx: PageContext| async move {
                let user = ctx.get("user").and_then(Value::as_str).unwrap_or("nobody").to_string();
                Ok(DocumentHtml::escape(&user).into())
            }),
        ))
        .await;
        let init = PageContextInit::new("/").unwrap().with_field("user", "ada");
        let rendered = renderer.render_page(init).await;
        assert_eq!(body(rendered).await, (200, "ada".to_string()));
    }
}
