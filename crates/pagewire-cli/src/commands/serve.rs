// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Server command.
//!
//! Files under `<out_dir>/client/` are served as they are. Every other
//! request is rendered; requests the renderer answers with no response
//! get a plain 404.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use console::style;
use pagewire::{HttpResponse, PageContextInit, RenderOptions, Renderer};
use tower_http::services::ServeDir;
use tracing::debug;

use crate::project::{load_project, resolve_root};

/// Command-line options; each one overrides `pagewire.toml`.
#[derive(Debug, Clone, Default)]
pub struct ServeArgs {
    /// Project root (default: current directory).
    pub root: Option<PathBuf>,
    /// Host to bind to.
    pub host: Option<String>,
    /// Port to listen on.
    pub port: Option<u16>,
    /// Silence development warnings.
    pub production: bool,
}

/// Shared server state.
pub struct AppState {
    /// Renderer of the project's pages.
    pub renderer: Renderer,
    /// Directory of static and pre-rendered files.
    pub static_dir: PathBuf,
}

/// Runs the server.
pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let root = resolve_root(args.root.as_deref())?;
    let (config, _project, global) = load_project(&root).await?;

    let options = RenderOptions {
        is_production: args.production || config.server.production,
        ..RenderOptions::default()
    };
    let static_dir = root.join(&config.build.out_dir).join("client");
    let state = Arc::new(AppState {
        renderer: Renderer::new(global, options),
        static_dir,
    });

    let addr = format!(
        "{}:{}",
        args.host.unwrap_or(config.server.host),
        args.port.unwrap_or(config.server.port)
    );
    println!(
        "{} {}",
        style("Serving").green().bold(),
        style(format!("http://{}", addr)).cyan().underlined()
    );
    println!("{}", style("Press Ctrl+C to stop").dim());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// The server's router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new().fallback(handler).with_state(state)
}

async fn handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    if request.method() == Method::GET || request.method() == Method::HEAD {
        if let Some(response) = serve_static(&state.static_dir, probe_of(&request)).await {
            return response;
        }
    }

    let url = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let mut init = match PageContextInit::new(url) {
        Ok(init) => init,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    if let Some(user_agent) = request.headers().get(header::USER_AGENT).and_then(|v| v.to_str().ok()) {
        init = init.with_field("userAgent", user_agent);
    }

    let page = state.renderer.render_page(init).await;
    debug!(
        url = %page.page_context.url(),
        page = ?page.page_context.page_id(),
        status = ?page.http_response.as_ref().map(HttpResponse::status_code),
        "rendered"
    );
    match page.http_response {
        Some(response) => to_http(response),
        None => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

/// Copy of a request without its body.
fn probe_of(request: &Request) -> Request {
    let mut probe = Request::new(Body::empty());
    *probe.method_mut() = request.method().clone();
    *probe.uri_mut() = request.uri().clone();
    *probe.headers_mut() = request.headers().clone();
    probe
}

/// Serves a file from `dir`, or `None` if there is none for the request.
async fn serve_static(dir: &Path, probe: Request) -> Option<Response> {
    let response = ServeDir::new(dir).try_call(probe).await.ok()?;
    if response.status() == StatusCode::NOT_FOUND {
        return None;
    }
    Some(response.map(Body::new))
}

fn to_http(response: HttpResponse) -> Response {
    let status = StatusCode::from_u16(response.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let content_type = format!("{}; charset=utf-8", response.content_type());
    let body = if response.is_stream() {
        Body::from_stream(response.into_byte_stream())
    } else {
        Body::from(response.body().unwrap_or_default().to_string())
    };
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(body)
        .unwrap_or_else(|_| (StatusCode::INTERNAL_SERVER_ERROR, "Failed to build response").into_response())
}
