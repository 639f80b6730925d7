// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Route listing command.

use std::path::PathBuf;

use console::style;
use pagewire::router::describe_routes;

use crate::project::{load_project, resolve_root};

/// Prints the route of every page, and the error page if there is one.
pub async fn run(root: Option<PathBuf>) -> anyhow::Result<Vec<String>> {
    let root = resolve_root(root.as_deref())?;
    let (_config, _project, global) = load_project(&root).await?;

    let lines = describe_routes(global.page_routes());
    if lines.is_empty() {
        println!("{}", style("No pages found").yellow());
    } else {
        println!("{}", style("Routes").cyan().bold());
        for line in &lines {
            println!("  {}", line);
        }
    }
    match global.error_page_id() {
        Some(page_id) => println!("{} {}", style("Error page:").dim(), page_id),
        None => println!("{}", style("No error page").yellow()),
    }
    Ok(lines)
}
