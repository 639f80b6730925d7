// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Integration tests for static pre-rendering.
//!
//! These tests run full pre-render passes over in-memory projects and check
//! the files written to a temporary directory.

use std::fs;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tempfile::tempdir;

use pagewire::{
    prerender, BeforeRenderCall, BoxError, DocumentHtml, FileExports, GlobalContext, MemoryPageFiles, PageContext, PageError,
    PrerenderError, PrerenderOptions, PrerenderedFileType, RenderValue,
};

/// A server file whose `render()` prints the URL and the `title` field.
fn page() -> FileExports {
    FileExports::new().with_render(|ctx: PageContext| async move {
        let title = ctx.get("title").and_then(Value::as_str).unwrap_or("").to_string();
        Ok(RenderValue::from(DocumentHtml::escape(&format!("{} {}", ctx.url(), title))))
    })
}

/// Project with `/`, `/about`, and `/blog/:slug`.
fn blog_project() -> MemoryPageFiles {
    MemoryPageFiles::new()
        .with_file("/pages/index.page.server.lua", page())
        .with_file("/pages/about.page.server.lua", page())
        .with_file("/pages/blog.page.server.lua", page())
        .with_file("/pages/blog.page.route.lua", FileExports::new().with_route("/blog/:slug"))
}

async fn global(files: &MemoryPageFiles) -> GlobalContext {
    GlobalContext::load(files, "/").await.unwrap()
}

#[tokio::test]
async fn test_static_routes_are_written() {
    let dir = tempdir().unwrap();
    let files = blog_project();
    let summary = prerender(global(&files).await, PrerenderOptions::new(dir.path()))
        .await
        .unwrap();

    let client = dir.path().join("dist/client");
    assert_eq!(fs::read_to_string(client.join("index.html")).unwrap(), "/ ");
    assert_eq!(fs::read_to_string(client.join("about/index.html")).unwrap(), "/about ");
    assert_eq!(summary.urls, vec!["/", "/about"]);
    assert_eq!(summary.pages_without_url, vec!["/pages/blog"]);
    assert!(summary.excluded_pages.is_empty());
}

#[tokio::test]
async fn test_no_extra_dir() {
    let dir = tempdir().unwrap();
    let files = blog_project();
    let mut options = PrerenderOptions::new(dir.path());
    options.no_extra_dir = true;
    options.partial = true;
    prerender(global(&files).await, options).await.unwrap();

    let client = dir.path().join("dist/client");
    assert!(client.join("index.html").exists());
    assert!(client.join("about.html").exists());
    assert!(!client.join("about/index.html").exists());
}

#[tokio::test]
async fn test_prerender_hook_urls_are_deduplicated() {
    let dir = tempdir().unwrap();
    let blog = page().with_prerender(|()| async {
        Ok(json!([
            "/blog/hello",
            { "url": "/blog/hello", "pageContext": { "title": "Hello" } },
            { "url": "/blog/bye" }
        ]))
    });
    let files = MemoryPageFiles::new()
        .with_file("/pages/blog.page.server.lua", blog)
        .with_file("/pages/blog.page.route.lua", FileExports::new().with_route("/blog/:slug"));

    let summary = prerender(global(&files).await, PrerenderOptions::new(dir.path()))
        .await
        .unwrap();

    let client = dir.path().join("dist/client");
    assert_eq!(summary.urls, vec!["/blog/bye", "/blog/hello"]);
    assert_eq!(
        fs::read_to_string(client.join("blog/hello/index.html")).unwrap(),
        "/blog/hello Hello"
    );
    assert!(summary.pages_without_url.is_empty());
}

#[tokio::test]
async fn test_prerender_hook_context_overrides_init_fields() {
    let dir = tempdir().unwrap();
    let first = page().with_prerender(|()| async {
        Ok(json!([
            { "url": "/p", "pageContext": { "title": "from-hook" } },
            "/q"
        ]))
    });
    let second = page().with_prerender(|()| async {
        Ok(json!({ "url": "/p", "pageContext": { "title": "later", "lang": "en" } }))
    });
    let files = MemoryPageFiles::new()
        .with_file("/pages/a.page.server.lua", first)
        .with_file("/pages/a.page.route.lua", FileExports::new().with_route("/:slug"))
        .with_file("/pages/b.page.server.lua", second)
        .with_file("/pages/b.page.route.lua", FileExports::new().with_route("/b/:other"));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut options = PrerenderOptions::new(dir.path()).with_on_page_prerender(move |file| {
        sink.lock().unwrap().push((file.url.clone(), file.file_content.clone(), file.page_context.get("lang").cloned()));
        async { Ok::<_, BoxError>(()) }
    });
    options.page_context_init.insert("title".into(), json!("from-init"));
    options.partial = true;
    prerender(global(&files).await, options).await.unwrap();

    let mut seen = seen.lock().unwrap().clone();
    seen.sort_by(|a, b| a.0.cmp(&b.0));
    // The first declaration wins for its own fields; later ones only add.
    assert_eq!(seen[0], ("/p".to_string(), "/p from-hook".to_string(), Some(json!("en"))));
    // Without an override the init value stays.
    assert_eq!(seen[1], ("/q".to_string(), "/q from-init".to_string(), None));
}

#[tokio::test]
async fn test_prerender_provided_context_skips_before_render() {
    let dir = tempdir().unwrap();
    let product = page()
        .with_prerender(|()| async { Ok(json!({ "url": "/product", "pageContext": { "title": "from prerender" } })) })
        .with_on_before_render(|_: BeforeRenderCall| async {
            Ok(json!({ "pageContext": { "title": "from onBeforeRender" } }))
        });
    let files = MemoryPageFiles::new().with_file("/pages/product.page.server.lua", product);
    prerender(global(&files).await, PrerenderOptions::new(dir.path()))
        .await
        .unwrap();
    assert_eq!(
        fs::read_to_string(dir.path().join("dist/client/product/index.html")).unwrap(),
        "/product from prerender"
    );
}

#[tokio::test]
async fn test_unmatched_prerender_url_is_fatal() {
    let dir = tempdir().unwrap();
    let index = page().with_prerender(|()| async { Ok(json!("/does-not-exist")) });
    let files = MemoryPageFiles::new().with_file("/pages/index.page.server.lua", index);
    let err = prerender(global(&files).await, PrerenderOptions::new(dir.path()))
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("/pages/index.page.server.lua"));
    assert!(message.contains("/does-not-exist"));
    assert!(!dir.path().join("dist").exists());
}

#[tokio::test]
async fn test_do_not_prerender_contradiction() {
    let dir = tempdir().unwrap();
    let files = MemoryPageFiles::new()
        .with_file("/pages/secret.page.server.lua", page().with_do_not_prerender())
        .with_file(
            "/pages/index.page.server.lua",
            page().with_prerender(|()| async { Ok(json!(["/", "/secret"])) }),
        );
    let err = prerender(global(&files).await, PrerenderOptions::new(dir.path()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("doNotPrerender"));
}

#[tokio::test]
async fn test_excluded_page_is_not_written() {
    let dir = tempdir().unwrap();
    let files = MemoryPageFiles::new()
        .with_file("/pages/index.page.server.lua", page())
        .with_file("/pages/secret.page.server.lua", page().with_do_not_prerender());
    let summary = prerender(global(&files).await, PrerenderOptions::new(dir.path()))
        .await
        .unwrap();
    assert_eq!(summary.excluded_pages, vec!["/pages/secret"]);
    assert!(summary.pages_without_url.is_empty());
    assert!(!dir.path().join("dist/client/secret/index.html").exists());
}

#[tokio::test]
async fn test_error_page_is_written_as_404() {
    let dir = tempdir().unwrap();
    let error_page = FileExports::new().with_render(|ctx: PageContext| async move {
        assert!(ctx.is_404());
        Ok(RenderValue::from(DocumentHtml::dangerously_skip_escape("<h1>404</h1>")))
    });
    let files = MemoryPageFiles::new()
        .with_file("/pages/index.page.server.lua", page())
        .with_file("/pages/_error.page.server.lua", error_page);
    prerender(global(&files).await, PrerenderOptions::new(dir.path()))
        .await
        .unwrap();
    assert_eq!(
        fs::read_to_string(dir.path().join("dist/client/404.html")).unwrap(),
        "<h1>404</h1>"
    );
}

#[tokio::test]
async fn test_client_router_writes_page_context() {
    let dir = tempdir().unwrap();
    let about = page()
        .with_pass_to_client(["title"])
        .with_on_before_render(|_| async { Ok(json!({ "pageContext": { "title": "About" } })) });
    let files = MemoryPageFiles::new().with_file("/pages/about.page.server.lua", about);
    let mut options = PrerenderOptions::new(dir.path());
    options.uses_client_router = true;
    prerender(global(&files).await, options).await.unwrap();

    let json = fs::read_to_string(dir.path().join("dist/client/about/index.pageContext.json")).unwrap();
    let payload: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(
        payload,
        json!({ "pageContext": { "_pageId": "/pages/about", "title": "About" } })
    );
}

#[tokio::test]
async fn test_callback_replaces_disk_writes() {
    let dir = tempdir().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let options = PrerenderOptions::new(dir.path()).with_on_page_prerender(move |file| {
        sink.lock().unwrap().push((file.url.clone(), file.file_type, file.file_content.clone()));
        async { Ok::<_, BoxError>(()) }
    });
    let files = blog_project();
    let summary = prerender(global(&files).await, options).await.unwrap();

    assert_eq!(summary.files.len(), 2);
    let mut seen = seen.lock().unwrap().clone();
    seen.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(seen[0], ("/".to_string(), PrerenderedFileType::Html, "/ ".to_string()));
    assert!(!dir.path().join("dist").exists());
}

#[tokio::test]
async fn test_stream_render_is_rejected() {
    let dir = tempdir().unwrap();
    let streaming = FileExports::new().with_render(|_| async {
        let reader: &'static [u8] = b"<html/>";
        Ok(RenderValue::from(DocumentHtml::from_reader(reader)))
    });
    let files = MemoryPageFiles::new().with_file("/pages/index.page.server.lua", streaming);
    let err = prerender(global(&files).await, PrerenderOptions::new(dir.path()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("stream"));
}

#[tokio::test]
async fn test_before_prerender_hook() {
    let dir = tempdir().unwrap();
    let default = FileExports::new().with_on_before_prerender(|global: Value| async move {
        let count = global["prerenderPageContexts"].as_array().map(Vec::len).unwrap_or(0);
        Ok(json!({ "globalContext": { "title": format!("{} pages", count) } }))
    });
    let files = MemoryPageFiles::new()
        .with_file("/pages/_default/_default.page.server.lua", default)
        .with_file("/pages/index.page.server.lua", page())
        .with_file("/pages/about.page.server.lua", page());
    prerender(global(&files).await, PrerenderOptions::new(dir.path()))
        .await
        .unwrap();
    assert_eq!(
        fs::read_to_string(dir.path().join("dist/client/index.html")).unwrap(),
        "/ 2 pages"
    );
}

#[tokio::test]
async fn test_before_prerender_page_list_is_not_a_field() {
    let dir = tempdir().unwrap();
    let default = FileExports::new().with_on_before_prerender(|global: Value| async move {
        Ok(json!({ "globalContext": {
            "prerenderPageContexts": global["prerenderPageContexts"].clone(),
            "title": "kept"
        } }))
    });
    let files = MemoryPageFiles::new()
        .with_file("/pages/_default/_default.page.server.lua", default)
        .with_file("/pages/index.page.server.lua", page());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let options = PrerenderOptions::new(dir.path()).with_on_page_prerender(move |file| {
        sink.lock().unwrap().push((file.file_content.clone(), file.page_context.get("prerenderPageContexts").is_some()));
        async { Ok::<_, BoxError>(()) }
    });
    prerender(global(&files).await, options).await.unwrap();

    assert_eq!(seen.lock().unwrap().clone(), vec![("/ kept".to_string(), false)]);
}

#[tokio::test]
async fn test_two_before_prerender_hooks_are_rejected() {
    let dir = tempdir().unwrap();
    let hook = || FileExports::new().with_on_before_prerender(|_| async { Ok(Value::Null) });
    let files = MemoryPageFiles::new()
        .with_file("/pages/_default/_default.page.server.lua", hook())
        .with_file("/pages/admin/_default/_default.page.server.lua", hook())
        .with_file("/pages/index.page.server.lua", page());
    let err = prerender(global(&files).await, PrerenderOptions::new(dir.path()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("only one `onBeforePrerender()`"));
}

#[tokio::test]
async fn test_prerender_hook_error_is_fatal() {
    let dir = tempdir().unwrap();
    let index = page().with_prerender(|()| async { Err(BoxError::from("cms offline")) });
    let files = MemoryPageFiles::new().with_file("/pages/index.page.server.lua", index);
    let err = prerender(global(&files).await, PrerenderOptions::new(dir.path()))
        .await
        .unwrap_err();
    match err {
        PrerenderError::Page(PageError::Hook(failure)) => {
            assert_eq!(failure.hook_name, "prerender");
            assert_eq!(failure.hook_file_path, "/pages/index.page.server.lua");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_options_are_validated() {
    let files = blog_project();
    let err = prerender(global(&files).await, PrerenderOptions::new("relative/root"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("absolute"));

    let dir = tempdir().unwrap();
    let mut options = PrerenderOptions::new(dir.path());
    options.parallel = 0;
    assert!(options.validate().is_err());
}
