// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Page files found on disk.
//!
//! Every `*.page*` file under the pages directory is a page file. Server,
//! isomorphic, and route files must be Lua; client entries may be anything
//! and are never executed.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use futures_util::future::BoxFuture;
use pagewire::{AllPageFiles, BoxError, FileExports, GlobalContext, PageFile, PageFileKind, PageFileSource};

use crate::config::Config;
use crate::lua::LuaRuntime;

/// A page file found on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiscoveredFile {
    /// Kind of page file.
    pub kind: PageFileKind,
    /// Root-relative path with a leading `/`.
    pub file_path: String,
    /// Absolute path.
    pub path: PathBuf,
}

/// The page files of a project directory.
#[derive(Clone)]
pub struct ProjectFiles {
    root: PathBuf,
    pages_dir: PathBuf,
    runtime: LuaRuntime,
}

impl ProjectFiles {
    /// Page files under `root/pages_dir`.
    pub fn new(root: impl Into<PathBuf>, pages_dir: &str) -> anyhow::Result<Self> {
        let root = root.into();
        let pages_dir = root.join(pages_dir);
        let runtime = LuaRuntime::new().map_err(|e| anyhow::anyhow!("Failed to create Lua runtime: {}", e))?;
        Ok(Self {
            root,
            pages_dir,
            runtime,
        })
    }

    /// Project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists the page files, sorted by kind and path.
    pub fn discover(&self) -> anyhow::Result<Vec<DiscoveredFile>> {
        let pattern = format!(
            "{}/**/*.page*",
            glob::Pattern::escape(&self.pages_dir.to_string_lossy())
        );
        let mut files = Vec::new();
        for entry in glob::glob(&pattern)? {
            let path = entry?;
            if !path.is_file() {
                continue;
            }
            let Some(file_path) = root_relative(&self.root, &path) else {
                continue;
            };
            let Some(kind) = PageFileKind::from_file_path(&file_path) else {
                continue;
            };
            let is_lua = path.extension().and_then(|e| e.to_str()) == Some("lua");
            if kind != PageFileKind::PageClient && !is_lua {
                continue;
            }
            files.push(DiscoveredFile { kind, file_path, path });
        }
        files.sort();
        Ok(files)
    }

    fn lua_page_file(&self, file: DiscoveredFile) -> PageFile {
        let runtime = self.runtime.clone();
        let file_path = file.file_path.clone();
        let path = file.path;
        PageFile::new(file.file_path, move || {
            let runtime = runtime.clone();
            let file_path = file_path.clone();
            let path = path.clone();
            async move {
                let source = tokio::fs::read_to_string(&path).await?;
                runtime.load_exports(&file_path, &source)
            }
        })
    }
}

impl PageFileSource for ProjectFiles {
    fn get_all_page_files(&self) -> BoxFuture<'_, Result<AllPageFiles, BoxError>> {
        Box::pin(async move {
            let mut all = AllPageFiles::new();
            for file in self.discover()? {
                let kind = file.kind;
                let page_file = match kind {
                    PageFileKind::PageClient => PageFile::with_exports(file.file_path, FileExports::new()),
                    _ => self.lua_page_file(file),
                };
                all.entry(kind).or_default().push(page_file);
            }
            Ok::<_, BoxError>(all)
        })
    }
}

impl fmt::Debug for ProjectFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectFiles")
            .field("root", &self.root)
            .field("pages_dir", &self.pages_dir)
            .finish()
    }
}

/// `root/pages/about.page.lua` -> `/pages/about.page.lua`.
fn root_relative(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(format!("/{}", segments.join("/")))
}

/// Makes `root` (default: the current directory) absolute.
pub fn resolve_root(root: Option<&Path>) -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let root = match root {
        Some(root) => cwd.join(root),
        None => cwd,
    };
    root.canonicalize()
        .with_context(|| format!("Project root {} not found", root.display()))
}

/// Loads the configuration, page files and global context of a project.
pub async fn load_project(root: &Path) -> anyhow::Result<(Config, ProjectFiles, GlobalContext)> {
    let config = Config::load_from(root)?;
    let project = ProjectFiles::new(root, &config.pages.pages_dir)?;
    let global = GlobalContext::load(&project, &config.build.base_url).await?;
    Ok((config, project, global))
}
