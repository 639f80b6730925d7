// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! What a page file exports.
//!
//! A loaded page file is a set of optional capability slots ([`FileExports`]).
//! Hooks are async closures; their return values are dynamically shaped
//! ([`serde_json::Value`] or [`RenderValue`]) and validated at run time,
//! since they come from user code.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use crate::context::PageContext;
use crate::error::BoxError;
use crate::hooks::ServerHookControl;
use crate::html::DocumentHtml;

/// Future returned by a hook.
pub type HookFuture<T> = BoxFuture<'static, Result<T, BoxError>>;

/// An async hook taking `A` and producing `R`.
pub struct Hook<A, R> {
    f: Arc<dyn Fn(A) -> HookFuture<R> + Send + Sync>,
}

impl<A: 'static, R: 'static> Hook<A, R> {
    /// Wraps an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |arg| -> HookFuture<R> { Box::pin(f(arg)) }),
        }
    }

    /// Invokes the hook.
    pub fn call(&self, arg: A) -> HookFuture<R> {
        (self.f)(arg)
    }
}

impl<A, R> Clone for Hook<A, R> {
    fn clone(&self) -> Self {
        Self { f: Arc::clone(&self.f) }
    }
}

impl<A, R> fmt::Debug for Hook<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook(..)")
    }
}

/// `render(pageContext)`: produces the document.
pub type RenderHook = Hook<PageContext, RenderValue>;

/// `onBeforeRender(pageContext)`: fetches data before rendering.
///
/// Returns `null` or `{ pageContext: {...} }`.
pub type BeforeRenderHook = Hook<BeforeRenderCall, Value>;

/// `prerender()`: enumerates URLs to pre-render.
///
/// Returns a URL string, `{ url, pageContext? }`, or an array of those.
pub type PrerenderHook = Hook<(), Value>;

/// `onBeforePrerender(globalContext)`: runs once before pre-rendering.
///
/// Returns `null` or `{ globalContext: {...} }`.
pub type BeforePrerenderHook = Hook<Value, Value>;

/// Route function: decides whether a page matches.
///
/// Returns `false`, `true`, or `{ routeParams?, precedence? }`.
pub type RouteFunction = Hook<PageContext, Value>;

/// Argument of a before-render hook.
#[derive(Debug, Clone)]
pub struct BeforeRenderCall {
    /// Snapshot of the page context.
    pub page_context: PageContext,
    /// Control over the server-only hook. Present only when the isomorphic
    /// hook runs on the server and a server-only counterpart may exist.
    pub server_hooks: Option<ServerHookControl>,
}

/// Route declared by a `.page.route` file.
#[derive(Debug, Clone)]
pub enum RouteSource {
    /// A route string such as `/product/:id`.
    String(String),
    /// A route function.
    Function(RouteFunction),
}

/// Value returned by a render hook.
#[derive(Debug)]
pub enum RenderValue {
    /// No document; the caller produces no response.
    Null,
    /// The document.
    Html(DocumentHtml),
    /// `{ documentHtml?, pageContext? }`.
    Object {
        /// The document, validated like a top-level return value.
        document_html: Option<Box<RenderValue>>,
        /// Fields merged into the page context.
        page_context: Option<Value>,
        /// Keys other than the two above. Rejected at validation.
        unknown_keys: Vec<String>,
    },
    /// A plain string. Rejected at validation, since it is ambiguous whether
    /// it was escaped.
    String(String),
    /// Any other value, described by its type name. Rejected at validation.
    Other(String),
}

impl RenderValue {
    /// `{ documentHtml, pageContext }`.
    pub fn with_page_context(html: DocumentHtml, page_context: Map<String, Value>) -> Self {
        Self::Object {
            document_html: Some(Box::new(Self::Html(html))),
            page_context: Some(Value::Object(page_context)),
            unknown_keys: Vec::new(),
        }
    }
}

impl From<DocumentHtml> for RenderValue {
    fn from(html: DocumentHtml) -> Self {
        Self::Html(html)
    }
}

/// Capabilities exported by a page file.
#[derive(Debug, Clone, Default)]
pub struct FileExports {
    /// `render()`.
    pub render: Option<RenderHook>,
    /// `onBeforeRender()`.
    pub on_before_render: Option<BeforeRenderHook>,
    /// `passToClient`: page-context keys serialized for the client.
    pub pass_to_client: Option<Vec<String>>,
    /// `prerender()`.
    pub prerender: Option<PrerenderHook>,
    /// `doNotPrerender`.
    pub do_not_prerender: bool,
    /// `onBeforePrerender()`.
    pub on_before_prerender: Option<BeforePrerenderHook>,
    /// Default export of a `.page.route` file.
    pub route: Option<RouteSource>,
}

impl FileExports {
    /// Creates an empty export set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `render()`.
    pub fn with_render<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RenderValue, BoxError>> + Send + 'static,
    {
        self.render = Some(Hook::new(f));
        self
    }

    /// Sets `onBeforeRender()`.
    pub fn with_on_before_render<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(BeforeRenderCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.on_before_render = Some(Hook::new(f));
        self
    }

    /// Sets `passToClient`.
    pub fn with_pass_to_client<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pass_to_client = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Sets `prerender()`.
    pub fn with_prerender<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(()) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.prerender = Some(Hook::new(f));
        self
    }

    /// Sets `doNotPrerender = true`.
    pub fn with_do_not_prerender(mut self) -> Self {
        self.do_not_prerender = true;
        self
    }

    /// Sets `onBeforePrerender()`.
    pub fn with_on_before_prerender<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.on_before_prerender = Some(Hook::new(f));
        self
    }

    /// Sets a route string.
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(RouteSource::String(route.into()));
        self
    }

    /// Sets a route function.
    pub fn with_route_function<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.route = Some(RouteSource::Function(Hook::new(f)));
        self
    }

    /// Names of the exports that are set.
    pub fn export_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.render.is_some() {
            names.push("render");
        }
        if self.on_before_render.is_some() {
            names.push("onBeforeRender");
        }
        if self.pass_to_client.is_some() {
            names.push("passToClient");
        }
        if self.prerender.is_some() {
            names.push("prerender");
        }
        if self.do_not_prerender {
            names.push("doNotPrerender");
        }
        if self.on_before_prerender.is_some() {
            names.push("onBeforePrerender");
        }
        if self.route.is_some() {
            names.push("default");
        }
        names
    }
}
