// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Running user hooks.
//!
//! Every hook call goes through [`invoke_hook`], which turns both returned
//! errors and panics into a [`HookFailure`] tagged with the hook's name and
//! file. Return values are validated here; a malformed value is a usage
//! error naming the file.
//!
//! # Before-render resolution
//!
//! A page may define `onBeforeRender()` in its isomorphic file and in its
//! server file. The isomorphic hook runs first and receives a
//! [`ServerHookControl`], through which it either skips the server hook or
//! runs it and reads its result. If it does neither, the server hook runs
//! after it. Fields returned by the server hook are merged first; fields
//! returned by the isomorphic hook are merged last and win.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use serde_json::{Map, Value};

use crate::context::PageContext;
use crate::error::{HookFailure, PageError, UsageError};
use crate::exports::{BeforeRenderCall, HookFuture, RenderValue};
use crate::html::DocumentHtml;
use crate::page_files::LoadedPage;

/// Awaits a hook, converting errors and panics into a [`HookFailure`].
pub(crate) async fn invoke_hook<T>(
    fut: HookFuture<T>,
    hook_name: &str,
    hook_file_path: &str,
) -> Result<T, PageError> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(HookFailure::new(error, hook_name, hook_file_path).into()),
        Err(panic) => Err(HookFailure::from_panic(panic, hook_name, hook_file_path).into()),
    }
}

#[derive(Default)]
struct ControlState {
    skipped: bool,
    ran: bool,
    fields: Option<Map<String, Value>>,
    violation: Option<UsageError>,
    failure: Option<PageError>,
}

struct ControlInner {
    page_context: PageContext,
    page: Arc<LoadedPage>,
    isomorphic_file_path: String,
    state: Mutex<ControlState>,
}

/// Lets an isomorphic `onBeforeRender()` hook control the server-only one.
///
/// Call at most one of [`skip`](Self::skip) and [`run`](Self::run), once.
#[derive(Clone)]
pub struct ServerHookControl {
    inner: Arc<ControlInner>,
}

impl ServerHookControl {
    fn new(page_context: PageContext, page: Arc<LoadedPage>, isomorphic_file_path: &str) -> Self {
        Self {
            inner: Arc::new(ControlInner {
                page_context,
                page,
                isomorphic_file_path: isomorphic_file_path.to_string(),
                state: Mutex::new(ControlState::default()),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControlState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn violation(&self, state: &mut ControlState, what: &str) -> UsageError {
        let err = UsageError::new(format!(
            "The `onBeforeRender()` hook defined in {} {}",
            self.inner.isomorphic_file_path, what
        ));
        state.violation.get_or_insert_with(|| err.clone());
        err
    }

    /// Prevents the server-only hook from running.
    pub fn skip(&self) -> Result<(), UsageError> {
        let mut state = self.lock();
        if state.ran {
            return Err(self.violation(&mut state, "calls `skip()` after `run()`"));
        }
        if state.skipped {
            return Err(self.violation(&mut state, "calls `skip()` twice"));
        }
        state.skipped = true;
        Ok(())
    }

    /// Runs the server-only hook now and returns the fields it provides.
    pub async fn run(&self) -> Result<Map<String, Value>, PageError> {
        {
            let mut state = self.lock();
            if state.skipped {
                return Err(self.violation(&mut state, "calls `run()` after `skip()`").into());
            }
            if state.ran {
                return Err(self.violation(&mut state, "calls `run()` twice").into());
            }
            state.ran = true;
        }
        let result = run_server_before_render(self.inner.page_context.clone(), &self.inner.page).await;
        match result {
            Ok(fields) => {
                self.lock().fields = Some(fields.clone());
                Ok(fields)
            }
            Err(err) => {
                self.lock().failure.get_or_insert_with(|| err.clone());
                Err(err)
            }
        }
    }

    fn finish(&self) -> ControlState {
        std::mem::take(&mut *self.lock())
    }
}

impl fmt::Debug for ServerHookControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ServerHookControl")
            .field("skipped", &state.skipped)
            .field("ran", &state.ran)
            .finish()
    }
}

async fn run_server_before_render(
    page_context: PageContext,
    page: &LoadedPage,
) -> Result<Map<String, Value>, PageError> {
    let Some((hook, file_path)) = page.server_before_render() else {
        return Ok(Map::new());
    };
    let call = BeforeRenderCall {
        page_context,
        server_hooks: None,
    };
    let value = invoke_hook(hook.call(call), "onBeforeRender", file_path).await?;
    Ok(validate_before_render_result(value, file_path)?)
}

/// Runs the before-render hooks of `page`, merging their fields into `ctx`.
///
/// Nothing runs if the context was already provided by a `prerender()` hook.
/// Data requests only run the server-only hook; the isomorphic one runs on
/// the client.
pub(crate) async fn run_before_render_hooks(
    ctx: &mut PageContext,
    page: &Arc<LoadedPage>,
) -> Result<(), PageError> {
    if ctx.is_provided_by_prerender_hook() {
        return Ok(());
    }

    let isomorphic = page
        .isomorphic_before_render()
        .filter(|_| !ctx.is_data_request())
        .map(|(hook, file_path)| (hook.clone(), file_path.to_string()));

    let Some((hook, file_path)) = isomorphic else {
        let fields = run_server_before_render(ctx.clone(), page).await?;
        ctx.merge_fields(fields);
        return Ok(());
    };

    let control = ServerHookControl::new(ctx.clone(), Arc::clone(page), &file_path);
    let call = BeforeRenderCall {
        page_context: ctx.clone(),
        server_hooks: Some(control.clone()),
    };
    let result = invoke_hook(hook.call(call), "onBeforeRender", &file_path).await;

    let state = control.finish();
    if let Some(violation) = state.violation {
        return Err(violation.into());
    }
    if let Some(failure) = state.failure {
        return Err(failure);
    }
    let value = result?;

    let server_fields = if state.ran {
        state.fields.unwrap_or_default()
    } else if state.skipped {
        Map::new()
    } else {
        run_server_before_render(ctx.clone(), page).await?
    };
    ctx.merge_fields(server_fields);
    ctx.merge_fields(validate_before_render_result(value, &file_path)?);
    Ok(())
}

fn validate_before_render_result(value: Value, file_path: &str) -> Result<Map<String, Value>, UsageError> {
    let invalid = |what: String| {
        UsageError::new(format!(
            "The `onBeforeRender()` hook defined in {} should return `null` or `{{ pageContext: {{ /* ... */ }} }}` but {}",
            file_path, what
        ))
    };
    match value {
        Value::Null => Ok(Map::new()),
        Value::Object(mut obj) => {
            if let Some(key) = obj.keys().find(|k| *k != "pageContext") {
                return Err(invalid(format!("it returned an unknown key `{}`", key)));
            }
            match obj.remove("pageContext") {
                None | Some(Value::Null) => Ok(Map::new()),
                Some(Value::Object(fields)) => Ok(fields),
                Some(other) => Err(invalid(format!("`pageContext` is `{}`", other))),
            }
        }
        other => Err(invalid(format!("it returned `{}`", other))),
    }
}

/// The output of the render phase.
#[derive(Debug)]
pub struct RenderedHtml {
    /// The document; `None` if the hook returned null.
    pub html: Option<DocumentHtml>,
    /// The file whose `render()` hook produced it.
    pub render_file_path: String,
}

/// Runs the `render()` hook of `page`, merging returned fields into `ctx`.
pub(crate) async fn run_render_hook(ctx: &mut PageContext, page: &LoadedPage) -> Result<RenderedHtml, PageError> {
    let Some((hook, file_path)) = page.render_hook() else {
        let mut searched: Vec<&str> = [&page.server_file, &page.server_default]
            .into_iter()
            .flatten()
            .map(|f| f.file_path.as_str())
            .collect();
        searched.dedup();
        return Err(UsageError::new(format!(
            "No `render()` hook found for page `{}`. Define one in {}.",
            page.page_id,
            searched.join(" or ")
        ))
        .into());
    };
    let value = invoke_hook(hook.call(ctx.clone()), "render", file_path).await?;
    let (html, fields) = validate_render_value(value, file_path)?;
    if let Some(fields) = fields {
        ctx.merge_fields(fields);
    }
    Ok(RenderedHtml {
        html,
        render_file_path: file_path.to_string(),
    })
}

type ValidatedRender = (Option<DocumentHtml>, Option<Map<String, Value>>);

fn validate_render_value(value: RenderValue, file_path: &str) -> Result<ValidatedRender, UsageError> {
    let invalid = |what: String| {
        UsageError::new(format!(
            "The `render()` hook defined in {} {}",
            file_path, what
        ))
    };
    let plain_string = || {
        invalid(
            "returned a plain string, which is forbidden. Use `DocumentHtml::escape()` or `DocumentHtml::dangerously_skip_escape()` instead."
                .to_string(),
        )
    };
    match value {
        RenderValue::Null => Ok((None, None)),
        RenderValue::Html(html) => Ok((Some(html), None)),
        RenderValue::String(_) => Err(plain_string()),
        RenderValue::Other(kind) => Err(invalid(format!(
            "should return `null`, a `DocumentHtml`, or `{{ documentHtml, pageContext }}` but returned a {}",
            kind
        ))),
        RenderValue::Object {
            document_html,
            page_context,
            unknown_keys,
        } => {
            if let Some(key) = unknown_keys.first() {
                return Err(invalid(format!(
                    "returned an object with an unknown key `{}`. Only `documentHtml` and `pageContext` are allowed.",
                    key
                )));
            }
            let html = match document_html.map(|b| *b) {
                None | Some(RenderValue::Null) => None,
                Some(RenderValue::Html(html)) => Some(html),
                Some(RenderValue::String(_)) => return Err(plain_string()),
                Some(_) => {
                    return Err(invalid(
                        "returned a `documentHtml` that is not a `DocumentHtml`".to_string(),
                    ))
                }
            };
            let fields = match page_context {
                None | Some(Value::Null) => None,
                Some(Value::Object(fields)) => Some(fields),
                Some(other) => {
                    return Err(invalid(format!(
                        "returned a `pageContext` that is not an object: `{}`",
                        other
                    )))
                }
            };
            Ok((html, fields))
        }
    }
}
