// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

// Warn on missing documentation for public items
#![warn(missing_docs)]

//! PAGEWIRE CLI library.
//!
//! This crate provides the command-line interface for the pagewire rendering
//! engine: page files written in Lua, discovered on disk, pre-rendered to
//! static HTML or rendered on request.
//!
//! # Usage
//!
//! This crate is primarily used through the `pagewire` binary:
//!
//! ```bash
//! pagewire prerender   # Write every page to dist/client/
//! pagewire serve       # Render pages on request
//! pagewire routes      # List page routes
//! ```
//!
//! # Configuration
//!
//! Projects are configured via `pagewire.toml` at the project root.

/// CLI commands (prerender, serve, routes).
pub mod commands;
/// Project configuration from `pagewire.toml`.
pub mod config;
/// Lua page files.
pub mod lua;
/// Page-file discovery on disk.
pub mod project;
