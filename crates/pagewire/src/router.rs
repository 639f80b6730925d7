// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! URL-to-page routing.
//!
//! Every page gets a route from its `.page.route` file, or a filesystem
//! route derived from its page id:
//!
//! | Page id | Filesystem route |
//! |---------|------------------|
//! | `/pages/index` | `/` |
//! | `/pages/about` | `/about` |
//! | `/pages/blog/index` | `/blog` |
//!
//! Route strings support parameters (`/product/:id`) and a trailing
//! wildcard (`/docs/*`); they are compiled to [`matchit`] patterns.
//!
//! When several routes match, the winner is chosen by rank:
//! route functions (by returned precedence), then exact static routes,
//! then parameterized routes with the fewest dynamic segments. Two
//! matches of equal rank are an error.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::try_join_all;
use serde_json::Value;

use crate::context::{GlobalContext, PageContext};
use crate::error::{PageError, UsageError};
use crate::exports::{RouteFunction, RouteSource};
use crate::hooks::invoke_hook;
use crate::page_files::{is_error_page, PageFileKind, PageFileRegistry};
use crate::url::normalize_pathname;

const WILDCARD_PARAM: &str = "_wildcard";

/// A route string compiled to a matcher.
#[derive(Clone)]
pub struct CompiledRoute {
    route: String,
    matcher: Arc<matchit::Router<()>>,
    param_names: Vec<String>,
    dynamic_segments: usize,
}

impl CompiledRoute {
    /// Compiles a route string such as `/product/:id` or `/docs/*`.
    pub fn compile(route: &str) -> Result<Self, UsageError> {
        if !route.starts_with('/') {
            return Err(UsageError::new(format!(
                "Route `{}` should start with `/`",
                route
            )));
        }
        let segments: Vec<&str> = route.split('/').skip(1).collect();
        let mut pattern = String::new();
        let mut param_names = Vec::new();
        let mut dynamic_segments = 0;

        for (i, segment) in segments.iter().enumerate() {
            pattern.push('/');
            if let Some(name) = segment.strip_prefix(':') {
                if name.is_empty() {
                    return Err(UsageError::new(format!(
                        "Route `{}` has a parameter without a name",
                        route
                    )));
                }
                pattern.push_str(&format!("{{{}}}", name));
                param_names.push(name.to_string());
                dynamic_segments += 1;
            } else if *segment == "*" {
                if i != segments.len() - 1 {
                    return Err(UsageError::new(format!(
                        "Route `{}`: the wildcard `*` is only allowed as the last segment",
                        route
                    )));
                }
                pattern.push_str(&format!("{{*{}}}", WILDCARD_PARAM));
                param_names.push("*".to_string());
                dynamic_segments += 1;
            } else {
                pattern.push_str(&segment.replace('{', "{{").replace('}', "}}"));
            }
        }

        let pattern = normalize_pathname(&pattern).to_string();
        let mut matcher = matchit::Router::new();
        matcher
            .insert(pattern, ())
            .map_err(|e| UsageError::new(format!("Invalid route `{}`: {}", route, e)))?;

        Ok(Self {
            route: route.to_string(),
            matcher: Arc::new(matcher),
            param_names,
            dynamic_segments,
        })
    }

    /// The route string.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Number of parameter and wildcard segments.
    pub fn dynamic_segments(&self) -> usize {
        self.dynamic_segments
    }

    /// Matches a pathname, returning the parameters.
    pub fn match_pathname(&self, pathname: &str) -> Option<BTreeMap<String, String>> {
        let matched = self.matcher.at(pathname).ok()?;
        let params = matched
            .params
            .iter()
            .map(|(k, v)| {
                let key = if k == WILDCARD_PARAM { "*" } else { k };
                (key.to_string(), v.to_string())
            })
            .collect();
        Some(params)
    }
}

impl fmt::Debug for CompiledRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRoute")
            .field("route", &self.route)
            .field("param_names", &self.param_names)
            .finish()
    }
}

/// How a page is routed.
#[derive(Debug, Clone)]
pub enum PageRouteSource {
    /// A route string without parameters.
    StaticString(String),
    /// A route string with parameters or a wildcard.
    ParamString(CompiledRoute),
    /// A route function.
    Function(RouteFunction),
    /// A route derived from the page id.
    Filesystem(String),
}

/// The route of one page.
#[derive(Debug, Clone)]
pub struct PageRoute {
    /// The page.
    pub page_id: String,
    /// How it is routed.
    pub source: PageRouteSource,
    /// The `.page.route` file, if the route was declared.
    pub route_file_path: Option<String>,
}

impl PageRoute {
    /// Kind of route, as shown in diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.source {
            PageRouteSource::StaticString(_) | PageRouteSource::ParamString(_) => "Route String",
            PageRouteSource::Function(_) => "Route Function",
            PageRouteSource::Filesystem(_) => "Filesystem Route",
        }
    }

    /// Human-readable description of the route.
    pub fn describe(&self) -> String {
        match &self.source {
            PageRouteSource::StaticString(route) | PageRouteSource::Filesystem(route) => route.clone(),
            PageRouteSource::ParamString(compiled) => compiled.route().to_string(),
            PageRouteSource::Function(_) => format!(
                "route() defined in {}",
                self.route_file_path.as_deref().unwrap_or("?")
            ),
        }
    }

    /// The URL of the page, if its route has no parameters.
    pub fn static_url(&self) -> Option<&str> {
        match &self.source {
            PageRouteSource::StaticString(route) | PageRouteSource::Filesystem(route) => Some(route),
            _ => None,
        }
    }
}

/// Result of routing a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    /// The matched page.
    pub page_id: Option<String>,
    /// Extracted parameters.
    pub route_params: BTreeMap<String, String>,
}

/// Filesystem route of a page id.
///
/// `pages` segments are dropped, as is a trailing `index`.
pub fn filesystem_route(page_id: &str) -> String {
    let mut segments: Vec<&str> = page_id
        .split('/')
        .filter(|s| !s.is_empty() && *s != "pages")
        .collect();
    if segments.last() == Some(&"index") {
        segments.pop();
    }
    format!("/{}", segments.join("/"))
}

/// Loads the route of every page except the error page.
pub async fn load_page_routes(
    registry: &PageFileRegistry,
    page_ids: &[String],
) -> Result<Vec<PageRoute>, PageError> {
    let routable = page_ids.iter().filter(|id| !is_error_page(id));
    let routes = try_join_all(routable.map(|page_id| load_page_route(registry, page_id))).await?;
    Ok(routes)
}

async fn load_page_route(registry: &PageFileRegistry, page_id: &str) -> Result<PageRoute, PageError> {
    let Some(route_file) = registry.find_page_file(PageFileKind::PageRoute, page_id)? else {
        return Ok(PageRoute {
            page_id: page_id.to_string(),
            source: PageRouteSource::Filesystem(filesystem_route(page_id)),
            route_file_path: None,
        });
    };
    let exports = route_file.load().await?;
    let source = match &exports.route {
        None => {
            return Err(UsageError::new(format!(
                "{} should export a route string or a route function",
                route_file.file_path()
            ))
            .into())
        }
        Some(RouteSource::Function(f)) => PageRouteSource::Function(f.clone()),
        Some(RouteSource::String(route)) => {
            let compiled = CompiledRoute::compile(route).map_err(|e| {
                UsageError::new(format!("{} (defined in {})", e, route_file.file_path()))
            })?;
            if compiled.dynamic_segments() == 0 {
                PageRouteSource::StaticString(route.clone())
            } else {
                PageRouteSource::ParamString(compiled)
            }
        }
    };
    Ok(PageRoute {
        page_id: page_id.to_string(),
        source,
        route_file_path: Some(route_file.file_path().to_string()),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Param { fewest_dynamic: std::cmp::Reverse<usize> },
    Static,
    Function { precedence: i64 },
}

struct Candidate {
    page_id: String,
    route_params: BTreeMap<String, String>,
    rank: Rank,
}

/// Routes the context's URL to a page.
pub async fn route(global: &GlobalContext, ctx: &PageContext) -> Result<RouteOutcome, PageError> {
    let pathname = ctx.url_pathname();
    let pathname = normalize_pathname(&pathname);

    let evaluated = try_join_all(
        global
            .page_routes()
            .iter()
            .map(|page_route| match_page_route(page_route, pathname, ctx)),
    )
    .await?;

    let mut candidates: Vec<Candidate> = evaluated.into_iter().flatten().collect();
    let Some(best) = candidates.iter().map(|c| c.rank).max() else {
        return Ok(RouteOutcome::default());
    };
    candidates.retain(|c| c.rank == best);
    if candidates.len() > 1 {
        let pages: Vec<&str> = candidates.iter().map(|c| c.page_id.as_str()).collect();
        return Err(UsageError::new(format!(
            "The URL `{}` matches several pages with the same priority: {}. Make the routes more specific or use route-function precedence.",
            pathname,
            pages.join(", ")
        ))
        .into());
    }
    let winner = candidates.remove(0);
    Ok(RouteOutcome {
        page_id: Some(winner.page_id),
        route_params: winner.route_params,
    })
}

async fn match_page_route(
    page_route: &PageRoute,
    pathname: &str,
    ctx: &PageContext,
) -> Result<Option<Candidate>, PageError> {
    let candidate = |route_params, rank| Candidate {
        page_id: page_route.page_id.clone(),
        route_params,
        rank,
    };
    match &page_route.source {
        PageRouteSource::StaticString(route) | PageRouteSource::Filesystem(route) => {
            Ok((normalize_pathname(route) == pathname).then(|| candidate(BTreeMap::new(), Rank::Static)))
        }
        PageRouteSource::ParamString(compiled) => Ok(compiled.match_pathname(pathname).map(|params| {
            candidate(
                params,
                Rank::Param {
                    fewest_dynamic: std::cmp::Reverse(compiled.dynamic_segments()),
                },
            )
        })),
        PageRouteSource::Function(f) => {
            let file_path = page_route.route_file_path.as_deref().unwrap_or("?");
            let value = invoke_hook(f.call(ctx.clone()), "route", file_path).await?;
            let matched = parse_route_function_result(value, file_path)?;
            Ok(matched.map(|(params, precedence)| candidate(params, Rank::Function { precedence })))
        }
    }
}

fn parse_route_function_result(
    value: Value,
    file_path: &str,
) -> Result<Option<(BTreeMap<String, String>, i64)>, UsageError> {
    let invalid = |what: &str| {
        UsageError::new(format!(
            "The route function defined in {} should return a boolean or an object `{{ routeParams?, precedence? }}`, but {}",
            file_path, what
        ))
    };
    match value {
        Value::Bool(false) => Ok(None),
        Value::Bool(true) => Ok(Some((BTreeMap::new(), 0))),
        Value::Object(obj) => {
            if let Some(key) = obj.keys().find(|k| *k != "routeParams" && *k != "precedence") {
                return Err(invalid(&format!("it returned an unknown key `{}`", key)));
            }
            let precedence = match obj.get("precedence") {
                None | Some(Value::Null) => 0,
                Some(Value::Number(n)) => n
                    .as_i64()
                    .ok_or_else(|| invalid("`precedence` is not an integer"))?,
                Some(_) => return Err(invalid("`precedence` is not an integer")),
            };
            let mut params = BTreeMap::new();
            match obj.get("routeParams") {
                None | Some(Value::Null) => {}
                Some(Value::Object(map)) => {
                    for (k, v) in map {
                        match v {
                            Value::String(s) => {
                                params.insert(k.clone(), s.clone());
                            }
                            _ => return Err(invalid(&format!("`routeParams.{}` is not a string", k))),
                        }
                    }
                }
                Some(_) => return Err(invalid("`routeParams` is not an object")),
            }
            Ok(Some((params, precedence)))
        }
        other => Err(invalid(&format!("it returned `{}`", other))),
    }
}

/// One numbered line per route, sorted, for diagnostics.
pub fn describe_routes(routes: &[PageRoute]) -> Vec<String> {
    let mut lines: Vec<(String, &str, &str)> = routes
        .iter()
        .map(|r| (r.describe(), r.kind(), r.page_id.as_str()))
        .collect();
    lines.sort();
    lines
        .into_iter()
        .enumerate()
        .map(|(i, (route, kind, page_id))| format!("{}. {} [{}] {}", i + 1, route, kind, page_id))
        .collect()
}
