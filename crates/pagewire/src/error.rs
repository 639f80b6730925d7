// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Error types for the page-rendering pipeline.
//!
//! # Error Categories
//!
//! - **Usage errors** ([`UsageError`]): misuse by the caller or by the author
//!   of a page file (bad hook return shape, conflicting declarations,
//!   out-of-range option). Always carry the offending file and a hint.
//! - **Hook failures** ([`HookFailure`]): an error raised inside user hook
//!   code, tagged with the hook name and the file exporting it.
//! - **Load failures**: a page-file loader could not produce the file's exports.
//!
//! [`PageError`] is the union passed between pipeline layers. Every variant is
//! cheap to clone and has a stable [`PageError::identity`], which the request
//! pipeline uses to log each failure exactly once.

use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error returned by user hooks and page-file loaders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared, cloneable error value.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Misuse of the API or of the page-file conventions.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct UsageError {
    message: Arc<str>,
}

impl UsageError {
    /// Creates a usage error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Arc::from(message.into()),
        }
    }

    /// Returns the message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An error raised inside a user hook.
#[derive(Debug, Clone)]
pub struct HookFailure {
    /// The error returned (or panic raised) by the hook.
    pub error: SharedError,
    /// Name of the hook, without parentheses (e.g. `render`).
    pub hook_name: String,
    /// Path of the file exporting the hook.
    pub hook_file_path: String,
}

impl HookFailure {
    /// Wraps an error returned by a hook.
    pub fn new(error: BoxError, hook_name: impl Into<String>, hook_file_path: impl Into<String>) -> Self {
        Self {
            error: Arc::from(error),
            hook_name: hook_name.into(),
            hook_file_path: hook_file_path.into(),
        }
    }

    /// Wraps a panic payload caught while running a hook.
    pub fn from_panic(
        payload: Box<dyn Any + Send>,
        hook_name: impl Into<String>,
        hook_file_path: impl Into<String>,
    ) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "hook panicked".to_string()
        };
        Self::new(format!("panic: {}", message).into(), hook_name, hook_file_path)
    }
}

impl fmt::Display for HookFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "The `{}()` hook exported by {} threw an error: {}",
            self.hook_name, self.hook_file_path, self.error
        )
    }
}

impl std::error::Error for HookFailure {}

/// Errors produced while routing, loading, or rendering a single page.
#[derive(Debug, Clone, Error)]
pub enum PageError {
    /// Misuse of the API or the page conventions.
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// A user hook failed.
    #[error(transparent)]
    Hook(#[from] HookFailure),

    /// A page-file loader failed.
    #[error("Could not load {file_path}: {cause}")]
    Load {
        /// The file that failed to load.
        file_path: String,
        /// The loader's error.
        cause: SharedError,
    },
}

impl PageError {
    /// Creates a load failure for the given file.
    pub fn load(file_path: impl Into<String>, cause: BoxError) -> Self {
        Self::Load {
            file_path: file_path.into(),
            cause: Arc::from(cause),
        }
    }

    /// A value identifying this failure across clones.
    ///
    /// Two clones of the same failure share an identity; distinct failures
    /// never do while both are alive.
    pub fn identity(&self) -> usize {
        match self {
            Self::Usage(e) => Arc::as_ptr(&e.message) as *const u8 as usize,
            Self::Hook(e) => Arc::as_ptr(&e.error) as *const () as usize,
            Self::Load { cause, .. } => Arc::as_ptr(cause) as *const () as usize,
        }
    }

    /// Returns true if this is a usage error.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    /// Returns the hook failure, if this is one.
    pub fn as_hook_failure(&self) -> Option<&HookFailure> {
        match self {
            Self::Hook(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors from the streaming accessors of an HTTP response.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The accessor is not compatible with the response body.
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// Reading or writing the body failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal errors of a pre-render run.
#[derive(Debug, Error)]
pub enum PrerenderError {
    /// Routing, loading, or rendering a page failed.
    #[error(transparent)]
    Page(#[from] PageError),

    /// Writing a pre-rendered file failed.
    #[error("Could not write {}: {source}", path.display())]
    Io {
        /// The file being written.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl From<UsageError> for PrerenderError {
    fn from(err: UsageError) -> Self {
        Self::Page(PageError::Usage(err))
    }
}

impl From<HookFailure> for PrerenderError {
    fn from(err: HookFailure) -> Self {
        Self::Page(PageError::Hook(err))
    }
}

/// Convenience type alias for Results with [`PageError`].
pub type Result<T> = std::result::Result<T, PageError>;
