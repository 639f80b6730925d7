// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Static pre-rendering.
//!
//! [`prerender`] renders every page it can find a URL for and writes the
//! results under `<root>/<out_dir>/client/`. URLs come from:
//!
//! 1. `prerender()` hooks of page server files (pages marked
//!    `doNotPrerender` are excluded),
//! 2. pages with a static route,
//!
//! after which the single `onBeforePrerender()` hook may adjust the global
//! context. Every URL is then routed and rendered under a concurrency limit,
//! the error page is rendered to `404.html`, and the files are written.
//!
//! Unlike request rendering, any hook or usage error aborts the run.
//! Files are written to a temporary sibling and renamed into place, so an
//! aborted run never leaves a partially written file.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::{try_join_all, BoxFuture};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::concurrency::ConcurrencyLimit;
use crate::context::{GlobalContext, PageContext};
use crate::error::{BoxError, HookFailure, PageError, PrerenderError, UsageError};
use crate::hooks::{invoke_hook, run_before_render_hooks, run_render_hook};
use crate::page_files::{is_error_page, PageFileKind};
use crate::router::route;
use crate::url::{data_request_url, html_file_url};

/// Key under which `onBeforePrerender()` sees the pages about to be rendered.
const PRERENDER_PAGE_CONTEXTS: &str = "prerenderPageContexts";

/// Callback receiving each pre-rendered file instead of writing it to disk.
pub type OnPagePrerender = Arc<dyn Fn(PrerenderedFile) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Options of a pre-render run.
#[derive(Clone)]
pub struct PrerenderOptions {
    /// Called for each file instead of writing it.
    pub on_page_prerender: Option<OnPagePrerender>,
    /// Fields added to the global context, and so to every page context.
    pub page_context_init: Map<String, Value>,
    /// Suppresses warnings about pages that got no URL.
    pub partial: bool,
    /// Writes `/about` to `about.html` instead of `about/index.html`.
    pub no_extra_dir: bool,
    /// Project root; must be absolute.
    pub root: PathBuf,
    /// Build directory, relative to the root.
    pub out_dir: String,
    /// Maximum number of pages processed at once.
    pub parallel: usize,
    /// Also writes the serialized page context of every page.
    pub uses_client_router: bool,
}

impl PrerenderOptions {
    /// Default options for a project root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            on_page_prerender: None,
            page_context_init: Map::new(),
            partial: false,
            no_extra_dir: false,
            root: root.into(),
            out_dir: "dist".to_string(),
            parallel: ConcurrencyLimit::default_parallelism(),
            uses_client_router: false,
        }
    }

    /// Sets the per-file callback.
    pub fn with_on_page_prerender<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PrerenderedFile) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_page_prerender = Some(Arc::new(move |file| -> BoxFuture<'static, Result<(), BoxError>> {
            Box::pin(f(file))
        }));
        self
    }

    /// Checks the options.
    pub fn validate(&self) -> Result<(), UsageError> {
        if !self.root.is_absolute() {
            return Err(UsageError::new(format!(
                "The pre-render option `root` should be an absolute path, but it is `{}`",
                self.root.display()
            )));
        }
        if self.parallel < 1 {
            return Err(UsageError::new(
                "The pre-render option `parallel` should be an integer of at least 1",
            ));
        }
        if self.out_dir.is_empty() || Path::new(&self.out_dir).is_absolute() {
            return Err(UsageError::new(format!(
                "The pre-render option `out_dir` should be a relative directory, but it is `{}`",
                self.out_dir
            )));
        }
        Ok(())
    }

    /// Directory the files are written to.
    pub fn client_dir(&self) -> PathBuf {
        self.root.join(&self.out_dir).join("client")
    }
}

impl fmt::Debug for PrerenderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrerenderOptions")
            .field("on_page_prerender", &self.on_page_prerender.is_some())
            .field("partial", &self.partial)
            .field("no_extra_dir", &self.no_extra_dir)
            .field("root", &self.root)
            .field("out_dir", &self.out_dir)
            .field("parallel", &self.parallel)
            .field("uses_client_router", &self.uses_client_router)
            .finish()
    }
}

/// Kind of pre-rendered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrerenderedFileType {
    /// The HTML document.
    Html,
    /// The serialized page context.
    PageContextJson,
}

/// One pre-rendered file.
#[derive(Debug, Clone)]
pub struct PrerenderedFile {
    /// URL of the page.
    pub url: String,
    /// The rendered page.
    pub page_id: String,
    /// Target path.
    pub file_path: PathBuf,
    /// Kind of file.
    pub file_type: PrerenderedFileType,
    /// Content.
    pub file_content: String,
    /// Final page context of the render.
    pub page_context: PageContext,
}

/// Outcome of a pre-render run.
#[derive(Debug, Default)]
pub struct PrerenderSummary {
    /// Files written or handed to the callback.
    pub files: Vec<PathBuf>,
    /// URLs rendered, sorted.
    pub urls: Vec<String>,
    /// Pages marked `doNotPrerender`.
    pub excluded_pages: Vec<String>,
    /// Pages that got no URL.
    pub pages_without_url: Vec<String>,
}

struct Entry {
    page_context: PageContext,
    source_file: Option<String>,
    /// Fields set by a `prerender()` hook; later declarations can't change them.
    hook_fields: HashSet<String>,
}

impl Entry {
    /// Hook fields override global fields, but not those of an earlier
    /// declaration of the same URL.
    fn apply_hook_fields(&mut self, fields: Map<String, Value>) {
        for (key, value) in fields {
            if self.hook_fields.insert(key.clone()) {
                self.page_context.insert(key, value);
            }
        }
        self.page_context.mark_provided_by_prerender_hook();
    }
}

struct Excluded {
    page_id: String,
    file_path: String,
}

enum Declaration {
    Excluded(Excluded),
    Urls {
        file_path: String,
        urls: Vec<(String, Option<Map<String, Value>>)>,
    },
}

struct Unit {
    url: String,
    page_id: String,
    page_context: PageContext,
    html: String,
    page_context_json: Option<String>,
    no_extra_dir: bool,
    source_file: Option<String>,
}

fn fatal(err: PageError) -> PrerenderError {
    if let PageError::Hook(failure) = &err {
        error!(hook = %failure.hook_name, file = %failure.hook_file_path, "{}", failure);
    }
    PrerenderError::Page(err)
}

/// Pre-renders the project.
pub async fn prerender(
    mut global: GlobalContext,
    options: PrerenderOptions,
) -> Result<PrerenderSummary, PrerenderError> {
    options.validate()?;
    global.set_prerendering(options.uses_client_router);
    global.merge_fields(options.page_context_init.clone());
    let limit = ConcurrencyLimit::new(options.parallel);

    info!(pages = global.page_ids().len(), parallel = limit.limit(), "pre-rendering");

    let (mut entries, excluded) = collect_declared_urls(&global, &limit).await.map_err(fatal)?;
    collect_static_routes(&global, &excluded, &mut entries);
    run_before_prerender_hook(&mut global, &limit, &mut entries)
        .await
        .map_err(fatal)?;

    let mut units = try_join_all(
        entries
            .iter()
            .map(|(url, entry)| limit.run(prerender_entry(&global, url, entry))),
    )
    .await
    .map_err(fatal)?;

    check_contradictions(&units, &excluded)?;

    if let Some(unit) = prerender_not_found_page(&global, &units).await.map_err(fatal)? {
        units.push(unit);
    }

    let pages_without_url = find_pages_without_url(&global, &units, &excluded);
    if !options.partial {
        for page_id in &pages_without_url {
            warn!(
                page = %page_id,
                "Could not pre-render page `{}` because it has a non-static route and no `prerender()` hook returned a URL matching it. Set `partial` to suppress this warning.",
                page_id
            );
        }
    }

    let mut urls: Vec<String> = units.iter().map(|u| u.url.clone()).collect();
    urls.sort();

    let documents = units.len();
    let files = write_units(&options, &limit, units).await?;
    info!(files = files.len(), "{} HTML documents pre-rendered.", documents);

    Ok(PrerenderSummary {
        files,
        urls,
        excluded_pages: excluded.into_iter().map(|e| e.page_id).collect(),
        pages_without_url,
    })
}

async fn collect_declared_urls(
    global: &GlobalContext,
    limit: &ConcurrencyLimit,
) -> Result<(BTreeMap<String, Entry>, Vec<Excluded>), PageError> {
    let page_ids = global.page_ids().iter().filter(|id| !is_error_page(id));
    let declarations = try_join_all(page_ids.map(|page_id| limit.run(declared_urls(global, page_id)))).await?;

    let mut entries: BTreeMap<String, Entry> = BTreeMap::new();
    let mut excluded = Vec::new();
    // Page ids are sorted, so the first declaration of a URL is deterministic.
    for declaration in declarations.into_iter().flatten() {
        match declaration {
            Declaration::Excluded(e) => excluded.push(e),
            Declaration::Urls { file_path, urls } => {
                for (url, overrides) in urls {
                    let entry = entries.entry(url.clone()).or_insert_with(|| Entry {
                        page_context: global.page_context(url.clone()),
                        source_file: Some(file_path.clone()),
                        hook_fields: HashSet::new(),
                    });
                    if let Some(overrides) = overrides {
                        entry.apply_hook_fields(overrides);
                    }
                }
            }
        }
    }
    Ok((entries, excluded))
}

async fn declared_urls(global: &GlobalContext, page_id: &str) -> Result<Option<Declaration>, PageError> {
    let Some(file) = global.registry().find_page_file(PageFileKind::PageServer, page_id)? else {
        return Ok(None);
    };
    let exports = file.load().await?;
    if exports.do_not_prerender {
        return Ok(Some(Declaration::Excluded(Excluded {
            page_id: page_id.to_string(),
            file_path: file.file_path().to_string(),
        })));
    }
    let Some(hook) = &exports.prerender else {
        return Ok(None);
    };
    let value = invoke_hook(hook.call(()), "prerender", file.file_path()).await?;
    let urls = normalize_prerender_result(value, file.file_path())?;
    debug!(page = %page_id, urls = urls.len(), "prerender() hook");
    Ok(Some(Declaration::Urls {
        file_path: file.file_path().to_string(),
        urls,
    }))
}

fn normalize_prerender_result(
    value: Value,
    file_path: &str,
) -> Result<Vec<(String, Option<Map<String, Value>>)>, UsageError> {
    let items = match value {
        Value::Array(items) => items,
        single => vec![single],
    };
    items
        .into_iter()
        .map(|item| normalize_prerender_item(item, file_path))
        .collect()
}

fn normalize_prerender_item(
    item: Value,
    file_path: &str,
) -> Result<(String, Option<Map<String, Value>>), UsageError> {
    let invalid = |what: String| {
        UsageError::new(format!(
            "The `prerender()` hook exported by {} should return a URL string, `{{ url, pageContext }}`, or an array of those, but {}",
            file_path, what
        ))
    };
    let check_url = |url: String| {
        if url.starts_with('/') {
            Ok(url)
        } else {
            Err(invalid(format!("the URL `{}` doesn't start with `/`", url)))
        }
    };
    match item {
        Value::String(url) => Ok((check_url(url)?, None)),
        Value::Object(mut obj) => {
            if let Some(key) = obj.keys().find(|k| *k != "url" && *k != "pageContext") {
                return Err(invalid(format!("it returned an object with an unknown key `{}`", key)));
            }
            let url = match obj.remove("url") {
                Some(Value::String(url)) => check_url(url)?,
                Some(other) => return Err(invalid(format!("`url` is `{}`", other))),
                None => return Err(invalid("an object is missing `url`".to_string())),
            };
            match obj.remove("pageContext") {
                None | Some(Value::Null) => Ok((url, None)),
                Some(Value::Object(fields)) => Ok((url, Some(fields))),
                Some(other) => Err(invalid(format!("`pageContext` is `{}`", other))),
            }
        }
        other => Err(invalid(format!("it returned `{}`", other))),
    }
}

fn collect_static_routes(global: &GlobalContext, excluded: &[Excluded], entries: &mut BTreeMap<String, Entry>) {
    for page_route in global.page_routes() {
        if excluded.iter().any(|e| e.page_id == page_route.page_id) {
            continue;
        }
        let Some(url) = page_route.static_url() else {
            continue;
        };
        entries.entry(url.to_string()).or_insert_with(|| Entry {
            page_context: global.page_context(url),
            source_file: None,
            hook_fields: HashSet::new(),
        });
    }
}

async fn run_before_prerender_hook(
    global: &mut GlobalContext,
    limit: &ConcurrencyLimit,
    entries: &mut BTreeMap<String, Entry>,
) -> Result<(), PageError> {
    let defaults: Vec<_> = global.registry().default_files(PageFileKind::PageServer).cloned().collect();
    let loaded = try_join_all(defaults.iter().map(|file| {
        limit.run(async move { file.load().await.map(|exports| (file.file_path().to_string(), exports)) })
    }))
    .await?;
    let hooks: Vec<_> = loaded
        .into_iter()
        .filter_map(|(file_path, exports)| exports.on_before_prerender.clone().map(|hook| (file_path, hook)))
        .collect();

    let (file_path, hook) = match hooks.as_slice() {
        [] => return Ok(()),
        [single] => single.clone(),
        several => {
            let files: Vec<&str> = several.iter().map(|(path, _)| path.as_str()).collect();
            return Err(UsageError::new(format!(
                "There can be only one `onBeforePrerender()` hook, but it is defined in {}",
                files.join(" and ")
            ))
            .into());
        }
    };

    let mut view = global.to_json();
    if let Value::Object(map) = &mut view {
        let contexts: Vec<Value> = entries.values().map(|e| e.page_context.to_json()).collect();
        map.insert(PRERENDER_PAGE_CONTEXTS.into(), Value::Array(contexts));
    }
    let value = invoke_hook(hook.call(view), "onBeforePrerender", &file_path).await?;

    let invalid = |what: String| {
        UsageError::new(format!(
            "The `onBeforePrerender()` hook exported by {} should return `null` or `{{ globalContext }}`, but {}",
            file_path, what
        ))
    };
    let mut additions = match value {
        Value::Null => return Ok(()),
        Value::Object(mut obj) => {
            if let Some(key) = obj.keys().find(|k| *k != "globalContext") {
                return Err(invalid(format!("it returned an unknown key `{}`", key)).into());
            }
            match obj.remove("globalContext") {
                None | Some(Value::Null) => return Ok(()),
                Some(Value::Object(fields)) => fields,
                Some(other) => return Err(invalid(format!("`globalContext` is `{}`", other)).into()),
            }
        }
        other => return Err(invalid(format!("it returned `{}`", other)).into()),
    };
    // The page list is an input of the hook, not a field.
    if additions.remove(PRERENDER_PAGE_CONTEXTS).is_some() {
        debug!(file = %file_path, "ignoring `{}` returned by onBeforePrerender()", PRERENDER_PAGE_CONTEXTS);
    }
    for entry in entries.values_mut() {
        entry.page_context.merge_missing_fields(&additions);
    }
    global.merge_fields(additions);
    Ok(())
}

async fn prerender_entry(global: &GlobalContext, url: &str, entry: &Entry) -> Result<Unit, PageError> {
    let mut ctx = entry.page_context.clone();
    let outcome = route(global, &ctx).await?;
    ctx.set_route(outcome);

    let Some(page_id) = ctx.page_id().map(str::to_string) else {
        let message = match &entry.source_file {
            Some(file) => format!(
                "Your `prerender()` hook exported by {} returns the URL `{}` which doesn't match the route of any page. Make sure the URLs returned by `prerender()` match a page route.",
                file, url
            ),
            None => format!("The URL `{}` doesn't match the route of any page", url),
        };
        return Err(UsageError::new(message).into());
    };

    let (html, page_context_json) = render_to_string(global, &mut ctx, &page_id).await?;
    Ok(Unit {
        url: url.to_string(),
        page_id,
        page_context: ctx,
        html,
        page_context_json,
        no_extra_dir: false,
        source_file: entry.source_file.clone(),
    })
}

async fn render_to_string(
    global: &GlobalContext,
    ctx: &mut PageContext,
    page_id: &str,
) -> Result<(String, Option<String>), PageError> {
    let page = Arc::new(global.registry().load_page(page_id).await?);
    run_before_render_hooks(ctx, &page).await?;
    let rendered = run_render_hook(ctx, &page).await?;
    let Some(html) = rendered.html else {
        return Err(UsageError::new(format!(
            "The `render()` hook exported by {} didn't return any HTML for page `{}`. Pre-rendering requires `render()` to return HTML.",
            rendered.render_file_path, page_id
        ))
        .into());
    };
    let Some(html) = html.as_str().map(str::to_string) else {
        return Err(UsageError::new(format!(
            "The `render()` hook exported by {} returned a stream, which is not allowed while pre-rendering",
            rendered.render_file_path
        ))
        .into());
    };
    let page_context_json = if ctx.uses_client_router() {
        Some(ctx.serialize_for_client(&page.pass_to_client)?)
    } else {
        None
    };
    Ok((html, page_context_json))
}

fn check_contradictions(units: &[Unit], excluded: &[Excluded]) -> Result<(), UsageError> {
    for unit in units {
        let Some(ex) = excluded.iter().find(|e| e.page_id == unit.page_id) else {
            continue;
        };
        return Err(UsageError::new(format!(
            "The page {} is marked `doNotPrerender`, but the `prerender()` hook exported by {} returns the URL `{}` which matches it. Remove `doNotPrerender` or stop returning that URL.",
            ex.file_path,
            unit.source_file.as_deref().unwrap_or("?"),
            unit.url
        )));
    }
    Ok(())
}

async fn prerender_not_found_page(global: &GlobalContext, units: &[Unit]) -> Result<Option<Unit>, PageError> {
    if units.iter().any(|u| u.url == "/404") {
        return Ok(None);
    }
    let Some(error_page_id) = global.error_page_id() else {
        return Ok(None);
    };
    let mut ctx = global.page_context("/fake-404-url");
    ctx.set_error_page(error_page_id, true);
    ctx.set_prerendering(false);
    let (html, _) = render_to_string(global, &mut ctx, error_page_id).await?;
    Ok(Some(Unit {
        url: "/404".to_string(),
        page_id: error_page_id.to_string(),
        page_context: ctx,
        html,
        page_context_json: None,
        no_extra_dir: true,
        source_file: None,
    }))
}

fn find_pages_without_url(global: &GlobalContext, units: &[Unit], excluded: &[Excluded]) -> Vec<String> {
    let rendered: HashSet<&str> = units.iter().map(|u| u.page_id.as_str()).collect();
    global
        .page_ids()
        .iter()
        .filter(|id| !is_error_page(id))
        .filter(|id| !rendered.contains(id.as_str()))
        .filter(|id| !excluded.iter().any(|e| &e.page_id == *id))
        .cloned()
        .collect()
}

fn files_of_unit(unit: Unit, client_dir: &Path, no_extra_dir: bool) -> Vec<PrerenderedFile> {
    let no_extra_dir = unit.no_extra_dir || no_extra_dir;
    let html_path = client_dir.join(html_file_url(&unit.url, no_extra_dir).trim_start_matches('/'));
    let mut files = Vec::with_capacity(2);
    if let Some(json) = unit.page_context_json {
        let pathname = unit.url.split(['?', '#']).next().unwrap_or("/");
        files.push(PrerenderedFile {
            url: unit.url.clone(),
            page_id: unit.page_id.clone(),
            file_path: client_dir.join(data_request_url(pathname).trim_start_matches('/')),
            file_type: PrerenderedFileType::PageContextJson,
            file_content: json,
            page_context: unit.page_context.clone(),
        });
    }
    files.push(PrerenderedFile {
        url: unit.url,
        page_id: unit.page_id,
        file_path: html_path,
        file_type: PrerenderedFileType::Html,
        file_content: unit.html,
        page_context: unit.page_context,
    });
    files
}

async fn write_units(
    options: &PrerenderOptions,
    limit: &ConcurrencyLimit,
    units: Vec<Unit>,
) -> Result<Vec<PathBuf>, PrerenderError> {
    let client_dir = options.client_dir();
    let files: Vec<PrerenderedFile> = units
        .into_iter()
        .flat_map(|unit| files_of_unit(unit, &client_dir, options.no_extra_dir))
        .collect();
    let mut written = try_join_all(files.into_iter().map(|file| limit.run(emit_file(options, file)))).await?;
    written.sort();
    Ok(written)
}

async fn emit_file(options: &PrerenderOptions, file: PrerenderedFile) -> Result<PathBuf, PrerenderError> {
    let path = file.file_path.clone();
    match &options.on_page_prerender {
        Some(callback) => {
            callback(file).await.map_err(|e| {
                PrerenderError::from(HookFailure::new(e, "onPagePrerender", "<prerender options>"))
            })?;
        }
        None => write_atomic(&path, &file.file_content).await?,
    }
    Ok(path)
}

async fn write_atomic(path: &Path, content: &str) -> Result<(), PrerenderError> {
    let io_err = |source: std::io::Error| PrerenderError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    tokio::fs::write(&tmp, content).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    debug!(file = %path.display(), "wrote pre-rendered file");
    Ok(())
}
