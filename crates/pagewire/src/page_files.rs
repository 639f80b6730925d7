// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Page files and the registry resolving them per page.
//!
//! Page files follow a naming convention:
//!
//! | File | Kind |
//! |------|------|
//! | `/pages/about.page.lua` | [`PageFileKind::Page`] (isomorphic) |
//! | `/pages/about.page.server.lua` | [`PageFileKind::PageServer`] |
//! | `/pages/about.page.route.lua` | [`PageFileKind::PageRoute`] |
//! | `/pages/about.page.client.lua` | [`PageFileKind::PageClient`] |
//!
//! The page id is the path up to `.page` (`/pages/about`). Files under a
//! `_default` directory apply to every page that has no file of the same
//! kind; the closest one (by directory distance) wins.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{try_join4, BoxFuture};
use tokio::sync::OnceCell;

use crate::error::{BoxError, PageError, UsageError};
use crate::exports::FileExports;

/// Kind of page file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PageFileKind {
    /// `.page`: isomorphic file.
    Page,
    /// `.page.server`: server-only file.
    PageServer,
    /// `.page.route`: route declaration.
    PageRoute,
    /// `.page.client`: client entry.
    PageClient,
}

impl PageFileKind {
    /// Every kind.
    pub const ALL: [PageFileKind; 4] = [
        PageFileKind::Page,
        PageFileKind::PageServer,
        PageFileKind::PageRoute,
        PageFileKind::PageClient,
    ];

    /// The suffix identifying this kind.
    pub fn suffix(&self) -> &'static str {
        match self {
            PageFileKind::Page => ".page",
            PageFileKind::PageServer => ".page.server",
            PageFileKind::PageRoute => ".page.route",
            PageFileKind::PageClient => ".page.client",
        }
    }

    /// Determines the kind from a file path, if it is a page file.
    pub fn from_file_path(file_path: &str) -> Option<Self> {
        let name = file_path.rsplit('/').next().unwrap_or(file_path);
        let idx = name.find(".page")?;
        let after = &name[idx + ".page".len()..];
        let qualified = |tag: &str| {
            after
                .strip_prefix(tag)
                .map(|rest| rest.is_empty() || rest.starts_with('.'))
                .unwrap_or(false)
        };
        if qualified(".server") {
            Some(PageFileKind::PageServer)
        } else if qualified(".route") {
            Some(PageFileKind::PageRoute)
        } else if qualified(".client") {
            Some(PageFileKind::PageClient)
        } else if after.is_empty() || after.starts_with('.') {
            Some(PageFileKind::Page)
        } else {
            None
        }
    }
}

impl fmt::Display for PageFileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

type LoadFn = Arc<dyn Fn() -> BoxFuture<'static, Result<FileExports, BoxError>> + Send + Sync>;

/// A page file and its lazy loader.
///
/// Loading is performed at most once; concurrent first loads share the result.
#[derive(Clone)]
pub struct PageFile {
    file_path: String,
    load_file: LoadFn,
    loaded: Arc<OnceCell<Arc<FileExports>>>,
}

impl PageFile {
    /// Creates a page file with an async loader.
    pub fn new<F, Fut>(file_path: impl Into<String>, load_file: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FileExports, BoxError>> + Send + 'static,
    {
        Self {
            file_path: file_path.into(),
            load_file: Arc::new(move || -> BoxFuture<'static, Result<FileExports, BoxError>> {
                Box::pin(load_file())
            }),
            loaded: Arc::new(OnceCell::new()),
        }
    }

    /// Creates a page file whose exports are already known.
    pub fn with_exports(file_path: impl Into<String>, exports: FileExports) -> Self {
        let exports = Arc::new(exports);
        Self::new(file_path, move || {
            let exports = (*exports).clone();
            async move { Ok(exports) }
        })
    }

    /// Path of the file, relative to the project root.
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Whether this is a `_default` file.
    pub fn is_default(&self) -> bool {
        is_default_file(&self.file_path)
    }

    /// Loads the file's exports.
    pub async fn load(&self) -> Result<Arc<FileExports>, PageError> {
        self.loaded
            .get_or_try_init(|| async {
                (self.load_file)()
                    .await
                    .map(Arc::new)
                    .map_err(|e| PageError::load(self.file_path.clone(), e))
            })
            .await
            .cloned()
    }
}

impl fmt::Debug for PageFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageFile")
            .field("file_path", &self.file_path)
            .field("loaded", &self.loaded.initialized())
            .finish()
    }
}

/// Page files grouped by kind.
pub type AllPageFiles = BTreeMap<PageFileKind, Vec<PageFile>>;

/// Supplier of the project's page files.
pub trait PageFileSource: Send + Sync {
    /// Lists every page file, grouped by kind.
    fn get_all_page_files(&self) -> BoxFuture<'_, Result<AllPageFiles, BoxError>>;
}

/// In-memory page-file source.
#[derive(Debug, Clone, Default)]
pub struct MemoryPageFiles {
    files: AllPageFiles,
}

impl MemoryPageFiles {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file; its kind is derived from the path.
    ///
    /// Paths that are not page files are ignored.
    pub fn with_file(mut self, file_path: &str, exports: FileExports) -> Self {
        if let Some(kind) = PageFileKind::from_file_path(file_path) {
            self.files
                .entry(kind)
                .or_default()
                .push(PageFile::with_exports(file_path, exports));
        }
        self
    }

    /// Adds a file with a custom loader.
    pub fn with_page_file(mut self, kind: PageFileKind, file: PageFile) -> Self {
        self.files.entry(kind).or_default().push(file);
        self
    }
}

impl PageFileSource for MemoryPageFiles {
    fn get_all_page_files(&self) -> BoxFuture<'_, Result<AllPageFiles, BoxError>> {
        let files = self.files.clone();
        Box::pin(async move { Ok(files) })
    }
}

/// Page id of a page file (`/pages/about.page.server.lua` -> `/pages/about`).
pub fn page_id_of(file_path: &str) -> Option<String> {
    let name_start = file_path.rfind('/').map(|i| i + 1).unwrap_or(0);
    let idx = file_path[name_start..].find(".page")?;
    Some(file_path[..name_start + idx].to_string())
}

/// Whether a file is a `_default` file (named `_default` or inside a `_default` directory).
pub fn is_default_file(file_path: &str) -> bool {
    file_path.contains("/_default")
}

/// Whether the page id designates the error page (last segment `_error`).
pub fn is_error_page(page_id: &str) -> bool {
    page_id.rsplit('/').next() == Some("_error")
}

/// Number of directory steps between two paths.
fn path_distance(a: &str, b: &str) -> usize {
    let dir = |p: &str| -> Vec<String> {
        let mut segments: Vec<String> = p.split('/').map(str::to_string).collect();
        segments.pop();
        segments
    };
    let dir_a = dir(a);
    let dir_b = dir(b);
    let common = dir_a
        .iter()
        .zip(dir_b.iter())
        .take_while(|(x, y)| x == y)
        .count();
    (dir_a.len() - common) + (dir_b.len() - common)
}

/// Resolves page files per page id.
#[derive(Debug, Clone, Default)]
pub struct PageFileRegistry {
    files: AllPageFiles,
}

impl PageFileRegistry {
    /// Lists the page files of `source`.
    pub async fn load(source: &dyn PageFileSource) -> Result<Self, PageError> {
        let files = source
            .get_all_page_files()
            .await
            .map_err(|e| PageError::load("<page files>", e))?;
        Ok(Self::from_files(files))
    }

    /// Creates a registry from already-listed files.
    pub fn from_files(mut files: AllPageFiles) -> Self {
        for list in files.values_mut() {
            list.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        }
        Self { files }
    }

    /// Files of the given kind, sorted by path.
    pub fn files(&self, kind: PageFileKind) -> &[PageFile] {
        self.files.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `_default` files of the given kind.
    pub fn default_files(&self, kind: PageFileKind) -> impl Iterator<Item = &PageFile> {
        self.files(kind).iter().filter(|f| f.is_default())
    }

    /// Page ids of the project, sorted.
    ///
    /// Every non-default `.page` or `.page.server` file designates a page.
    pub fn page_ids(&self) -> Vec<String> {
        let ids: BTreeSet<String> = [PageFileKind::Page, PageFileKind::PageServer]
            .iter()
            .flat_map(|kind| self.files(*kind))
            .filter(|f| !f.is_default())
            .filter_map(|f| page_id_of(&f.file_path))
            .collect();
        ids.into_iter().collect()
    }

    /// The file of the given kind belonging to `page_id`.
    ///
    /// Two files of one kind for the same page is an error.
    pub fn find_page_file(&self, kind: PageFileKind, page_id: &str) -> Result<Option<&PageFile>, UsageError> {
        let matches: Vec<&PageFile> = self
            .files(kind)
            .iter()
            .filter(|f| page_id_of(&f.file_path).as_deref() == Some(page_id))
            .collect();
        match matches.as_slice() {
            [] => Ok(None),
            [file] => Ok(Some(file)),
            _ => Err(UsageError::new(format!(
                "Conflicting {} files: {}. Keep only one {} file per page.",
                kind,
                matches.iter().map(|f| f.file_path.as_str()).collect::<Vec<_>>().join(", "),
                kind
            ))),
        }
    }

    /// The `_default` file of the given kind closest to `page_id`.
    pub fn find_default_file(&self, kind: PageFileKind, page_id: &str) -> Option<&PageFile> {
        self.default_files(kind).min_by(|a, b| {
            default_rank(page_id, &a.file_path)
                .cmp(&default_rank(page_id, &b.file_path))
                .then_with(|| a.file_path.cmp(&b.file_path))
        })
    }

    /// Id of the error page, if the project has one.
    pub fn error_page_id(&self) -> Option<String> {
        self.page_ids().into_iter().find(|id| is_error_page(id))
    }

    /// Loads every file applying to `page_id`.
    pub async fn load_page(&self, page_id: &str) -> Result<LoadedPage, PageError> {
        if self.files(PageFileKind::PageServer).is_empty() {
            return Err(UsageError::new(
                "No `.page.server` file found. Create a `_default.page.server` file in a `_default` directory.",
            )
            .into());
        }
        let server_file = self.find_page_file(PageFileKind::PageServer, page_id)?;
        let server_default = self.find_default_file(PageFileKind::PageServer, page_id);
        if server_file.is_none() && server_default.is_none() {
            return Err(UsageError::new(format!(
                "No `.page.server` file applies to page `{}`. Create `{}.page.server` or a `_default.page.server` file.",
                page_id, page_id
            ))
            .into());
        }
        let page_file = self.find_page_file(PageFileKind::Page, page_id)?;
        let page_default = self.find_default_file(PageFileKind::Page, page_id);
        let client_entry = self
            .find_page_file(PageFileKind::PageClient, page_id)?
            .or_else(|| self.find_default_file(PageFileKind::PageClient, page_id))
            .map(|f| f.file_path.clone());

        let (server_file, server_default, isomorphic_file, isomorphic_default) = try_join4(
            load_optional(server_file),
            load_optional(server_default),
            load_optional(page_file),
            load_optional(page_default),
        )
        .await?;

        let pass_to_client = [&server_file, &server_default]
            .into_iter()
            .flatten()
            .filter_map(|f| f.exports.pass_to_client.clone())
            .flatten()
            .fold(Vec::new(), |mut keys, key| {
                if !keys.contains(&key) {
                    keys.push(key);
                }
                keys
            });

        Ok(LoadedPage {
            page_id: page_id.to_string(),
            server_file,
            server_default,
            isomorphic_file,
            isomorphic_default,
            client_entry,
            pass_to_client,
        })
    }
}

fn default_rank(page_id: &str, file_path: &str) -> usize {
    if file_path.starts_with(page_id) {
        0
    } else {
        path_distance(page_id, file_path) + 1
    }
}

async fn load_optional(file: Option<&PageFile>) -> Result<Option<LoadedFile>, PageError> {
    match file {
        Some(file) => Ok(Some(LoadedFile {
            file_path: file.file_path.clone(),
            exports: file.load().await?,
        })),
        None => Ok(None),
    }
}

/// A loaded page file.
#[derive(Debug, Clone)]
pub struct LoadedFile {
    /// Path of the file.
    pub file_path: String,
    /// Its exports.
    pub exports: Arc<FileExports>,
}

/// Every file applying to one page, loaded.
#[derive(Debug, Clone)]
pub struct LoadedPage {
    /// The page.
    pub page_id: String,
    /// The page's own `.page.server` file.
    pub server_file: Option<LoadedFile>,
    /// The closest `_default` `.page.server` file.
    pub server_default: Option<LoadedFile>,
    /// The page's own `.page` file.
    pub isomorphic_file: Option<LoadedFile>,
    /// The closest `_default` `.page` file.
    pub isomorphic_default: Option<LoadedFile>,
    /// Path of the client entry, if any.
    pub client_entry: Option<String>,
    /// Union of `passToClient` declared by the server files.
    pub pass_to_client: Vec<String>,
}

impl LoadedPage {
    fn first_export<'a, T>(
        files: [&'a Option<LoadedFile>; 2],
        pick: impl Fn(&'a FileExports) -> Option<&'a T>,
    ) -> Option<(&'a T, &'a str)> {
        files
            .into_iter()
            .flatten()
            .find_map(|f| pick(f.exports.as_ref()).map(|v| (v, f.file_path.as_str())))
    }

    /// `render()` and its file: the page's server file, else the default.
    pub fn render_hook(&self) -> Option<(&crate::exports::RenderHook, &str)> {
        Self::first_export([&self.server_file, &self.server_default], |e| e.render.as_ref())
    }

    /// Server-only `onBeforeRender()` and its file.
    pub fn server_before_render(&self) -> Option<(&crate::exports::BeforeRenderHook, &str)> {
        Self::first_export([&self.server_file, &self.server_default], |e| {
            e.on_before_render.as_ref()
        })
    }

    /// Isomorphic `onBeforeRender()` and its file.
    pub fn isomorphic_before_render(&self) -> Option<(&crate::exports::BeforeRenderHook, &str)> {
        Self::first_export([&self.isomorphic_file, &self.isomorphic_default], |e| {
            e.on_before_render.as_ref()
        })
    }
}
