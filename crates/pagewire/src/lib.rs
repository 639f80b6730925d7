// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

// Warn on missing documentation for public items
#![warn(missing_docs)]

//! # PAGEWIRE
//!
//! Page-rendering lifecycle engine for server-side rendered sites.
//!
//! Given a URL, pagewire finds the page that handles it, runs the page's
//! hooks in a fixed order, and produces an HTTP response (HTML string,
//! streamed HTML, or serialized page data for client-side navigation).
//! The same pipeline drives static pre-rendering of every known URL.
//!
//! ## Features
//!
//! - Page files by convention (`.page`, `.page.server`, `.page.route`, `.page.client`)
//!   with `_default` fallbacks
//! - Route strings (`/product/:id`, `/docs/*`), route functions, and filesystem routes
//! - `onBeforeRender()` / `render()` hooks with validated return shapes
//! - Error-page fallback: 404 for unmatched URLs, 500 for failures
//! - Static pre-rendering with bounded concurrency
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pagewire::{FileExports, DocumentHtml, MemoryPageFiles, PageContextInit, RenderOptions, Renderer};
//!
//! let files = MemoryPageFiles::new().with_file(
//!     "/pages/index.page.server.lua",
//!     FileExports::new().with_render(|_| async { Ok(DocumentHtml::escape("Hello").into()) }),
//! );
//! let renderer = Renderer::load(&files, "/", RenderOptions::default()).await?;
//! let page = renderer.render_page(PageContextInit::new("/")?).await;
//! ```

/// Bounded concurrency.
pub mod concurrency;
/// Page and global contexts.
pub mod context;
/// Error types.
pub mod error;
/// Page-file exports and hook types.
pub mod exports;
/// Running user hooks.
pub mod hooks;
/// Document HTML values.
pub mod html;
/// Page files and their registry.
pub mod page_files;
/// Static pre-rendering.
pub mod prerender;
/// Per-request rendering.
pub mod render;
/// HTTP response abstraction.
pub mod response;
/// URL-to-page routing.
pub mod router;
/// URL parsing.
pub mod url;

pub use concurrency::ConcurrencyLimit;
pub use context::{GlobalContext, PageContext, PageContextInit};
pub use error::{BoxError, HookFailure, PageError, PrerenderError, ResponseError, Result, UsageError};
pub use exports::{
    BeforePrerenderHook, BeforeRenderCall, BeforeRenderHook, FileExports, Hook, PrerenderHook, RenderHook,
    RenderValue, RouteFunction, RouteSource,
};
pub use hooks::{RenderedHtml, ServerHookControl};
pub use html::{escape_html, DocumentHtml, HtmlReader, HtmlStream};
pub use page_files::{
    AllPageFiles, LoadedFile, LoadedPage, MemoryPageFiles, PageFile, PageFileKind, PageFileRegistry, PageFileSource,
};
pub use prerender::{prerender, OnPagePrerender, PrerenderOptions, PrerenderSummary, PrerenderedFile, PrerenderedFileType};
pub use render::{RenderOptions, RenderedPage, Renderer};
pub use response::HttpResponse;
pub use router::{PageRoute, PageRouteSource, RouteOutcome};
pub use url::UrlParsed;
