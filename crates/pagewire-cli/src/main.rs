// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pagewire_cli::commands;
use pagewire_cli::commands::prerender::PrerenderArgs;
use pagewire_cli::commands::serve::ServeArgs;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pagewire")]
#[command(author = "Maravilla Labs")]
#[command(version)]
#[command(about = "Render and pre-render Lua-scripted pages", long_about = None)]
struct Cli {
    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pre-render every page to static files
    Prerender {
        /// Build directory, relative to the root
        #[arg(long)]
        out_dir: Option<String>,
        /// Number of pages processed at once
        #[arg(long)]
        parallel: Option<usize>,
        /// Don't warn about pages that got no URL
        #[arg(long)]
        partial: bool,
        /// Write about.html instead of about/index.html
        #[arg(long)]
        no_extra_dir: bool,
        /// Also write index.pageContext.json files
        #[arg(long)]
        client_routing: bool,
    },
    /// Serve pages, rendering each request
    Serve {
        /// Port to run the server on
        #[arg(short, long)]
        port: Option<u16>,
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Silence development warnings
        #[arg(long)]
        production: bool,
    },
    /// List the route of every page
    Routes,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with the specified log level
    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    match cli.command {
        Commands::Prerender {
            out_dir,
            parallel,
            partial,
            no_extra_dir,
            client_routing,
        } => {
            let args = PrerenderArgs {
                root: cli.root,
                out_dir,
                parallel,
                partial,
                no_extra_dir,
                client_routing,
            };
            commands::prerender::run(args).await.map(|_| ())
        }
        Commands::Serve { port, host, production } => {
            let args = ServeArgs {
                root: cli.root,
                host,
                port,
                production,
            };
            commands::serve::run(args).await
        }
        Commands::Routes => commands::routes::run(cli.root).await.map(|_| ()),
    }
}
