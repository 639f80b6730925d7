// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! PAGEWIRE project configuration.
//!
//! Configuration is loaded from `pagewire.toml` at the project root.
//!
//! # Example Configuration
//!
//! ```toml
//! [project]
//! name = "my-site"
//!
//! [pages]
//! pages_dir = "pages"
//!
//! [build]
//! out_dir = "dist"
//! parallel = 8
//! partial = false
//! no_extra_dir = false
//! client_routing = false
//! base_url = "/"
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3000
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Name of the configuration file.
pub const CONFIG_FILE: &str = "pagewire.toml";

/// Main configuration structure loaded from `pagewire.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Project metadata.
    #[serde(default)]
    pub project: ProjectConfig,
    /// Where page files live.
    #[serde(default)]
    pub pages: PagesConfig,
    /// Pre-render settings.
    #[serde(default)]
    pub build: BuildConfig,
    /// Server settings.
    #[serde(default)]
    pub server: ServerConfig,
}

/// Project metadata configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Project name (default: "unnamed").
    #[serde(default = "default_name")]
    pub name: String,
}

/// Page-file discovery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PagesConfig {
    /// Directory searched for `*.page*` files, relative to the root (default: "pages").
    #[serde(default = "default_pages_dir")]
    pub pages_dir: String,
}

/// Pre-render configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    /// Build directory, relative to the root (default: "dist").
    #[serde(default = "default_out_dir")]
    pub out_dir: String,
    /// Pages processed at once (default: number of CPUs).
    #[serde(default)]
    pub parallel: Option<usize>,
    /// Don't warn about pages that got no URL.
    #[serde(default)]
    pub partial: bool,
    /// Write `/about` to `about.html` instead of `about/index.html`.
    #[serde(default)]
    pub no_extra_dir: bool,
    /// Also write `index.pageContext.json` files for client-side routing.
    #[serde(default)]
    pub client_routing: bool,
    /// Base URL the site is served under (default: "/").
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server host (default: "127.0.0.1").
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port (default: 3000).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Production mode silences development warnings.
    #[serde(default)]
    pub production: bool,
}

fn default_name() -> String {
    "unnamed".to_string()
}

fn default_pages_dir() -> String {
    "pages".to_string()
}

fn default_out_dir() -> String {
    "dist".to_string()
}

fn default_base_url() -> String {
    "/".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self { name: default_name() }
    }
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            pages_dir: default_pages_dir(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            out_dir: default_out_dir(),
            parallel: None,
            partial: false,
            no_extra_dir: false,
            client_routing: false,
            base_url: default_base_url(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            production: false,
        }
    }
}

impl Config {
    /// Loads configuration from `pagewire.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be parsed.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Loads configuration from `pagewire.toml` in `root`.
    ///
    /// If no configuration file exists, returns default configuration.
    pub fn load_from(root: &Path) -> anyhow::Result<Self> {
        let config_path = root.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", config_path.display(), e))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.pages.pages_dir, "pages");
        assert_eq!(config.build.out_dir, "dist");
        assert_eq!(config.build.base_url, "/");
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_partial_sections() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[project]\nname = \"blog\"\n\n[build]\nparallel = 2\nno_extra_dir = true\n",
        )
        .unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.project.name, "blog");
        assert_eq!(config.build.parallel, Some(2));
        assert!(config.build.no_extra_dir);
        assert_eq!(config.build.out_dir, "dist");
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[build]\nparallel = \"many\"\n").unwrap();
        let err = Config::load_from(dir.path()).unwrap_err();
        assert!(err.to_string().contains(CONFIG_FILE));
    }
}
