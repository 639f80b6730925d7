// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Pre-render command.
//!
//! Renders every page with a known URL into `<out_dir>/client/`.

use std::path::PathBuf;

use console::style;
use pagewire::{prerender, PrerenderOptions, PrerenderSummary};

use crate::project::{load_project, resolve_root};

/// Command-line options; each one overrides `pagewire.toml`.
#[derive(Debug, Clone, Default)]
pub struct PrerenderArgs {
    /// Project root (default: current directory).
    pub root: Option<PathBuf>,
    /// Build directory.
    pub out_dir: Option<String>,
    /// Pages processed at once.
    pub parallel: Option<usize>,
    /// Don't warn about pages without a URL.
    pub partial: bool,
    /// Write `about.html` instead of `about/index.html`.
    pub no_extra_dir: bool,
    /// Also write `index.pageContext.json` files.
    pub client_routing: bool,
}

/// Runs the pre-render command.
pub async fn run(args: PrerenderArgs) -> anyhow::Result<PrerenderSummary> {
    let root = resolve_root(args.root.as_deref())?;
    let (config, _project, global) = load_project(&root).await?;

    let mut options = PrerenderOptions::new(&root);
    options.out_dir = args.out_dir.unwrap_or(config.build.out_dir);
    if let Some(parallel) = args.parallel.or(config.build.parallel) {
        options.parallel = parallel;
    }
    options.partial = args.partial || config.build.partial;
    options.no_extra_dir = args.no_extra_dir || config.build.no_extra_dir;
    options.uses_client_router = args.client_routing || config.build.client_routing;

    println!(
        "{} {} ({} pages)",
        style("Pre-rendering").cyan().bold(),
        config.project.name,
        global.page_ids().len()
    );

    let summary = prerender(global, options).await?;

    for file in &summary.files {
        let shown = file.strip_prefix(&root).unwrap_or(file);
        println!("  {} {}", style("✓").green(), shown.display());
    }
    for page_id in &summary.excluded_pages {
        println!("  {} {} (doNotPrerender)", style("-").dim(), page_id);
    }
    for page_id in &summary.pages_without_url {
        println!("  {} {} (no URL)", style("!").yellow(), page_id);
    }
    println!(
        "{} {} URL(s), {} file(s)",
        style("Done:").green().bold(),
        summary.urls.len(),
        summary.files.len()
    );

    Ok(summary)
}
