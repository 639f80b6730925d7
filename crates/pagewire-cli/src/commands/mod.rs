// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! CLI command implementations.
//!
//! - `prerender`: Render every page to static files
//! - `routes`: List the route of every page
//! - `serve`: Render pages on request

/// Pre-render command.
pub mod prerender;
/// Route listing command.
pub mod routes;
/// Server command.
pub mod serve;
