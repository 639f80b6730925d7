// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Lua page files.
//!
//! Each `*.page*.lua` file runs in its own environment table that falls back
//! to the shared globals. The globals a file defines are its exports:
//!
//! ```lua
//! -- pages/about.page.server.lua
//! passToClient = { "title" }
//!
//! function onBeforeRender(pageContext)
//!   return { pageContext = { title = "About" } }
//! end
//!
//! function render(pageContext)
//!   return escape_inject("<h1>${title}</h1>", { title = pageContext.title })
//! end
//! ```
//!
//! HTML helpers available to every file:
//!
//! - `escape_inject(template, values)`: the template is trusted, every
//!   `${name}` is replaced by `values[name]`, escaped unless it is already HTML
//! - `dangerously_skip_escape(html)`: HTML inserted as is
//! - `escape_html(text)`: escaped string
//!
//! HTML values concatenate with `..`; plain strings are escaped when joined.
//!
//! An isomorphic `onBeforeRender(pageContext, hooks)` receives
//! `hooks.skip_server_hooks()` when a server-only counterpart may run.

use std::sync::Arc;

use mlua::{Function, Lua, LuaSerdeExt, MetaMethod, SerializeOptions, Table, UserData, UserDataMethods, Value};
use pagewire::{
    escape_html, BeforeRenderCall, BeforeRenderHook, BeforePrerenderHook, BoxError, DocumentHtml, FileExports, Hook,
    PageContext, PageFileKind, PrerenderHook, RenderHook, RenderValue, RouteFunction, RouteSource, UsageError,
};
use serde_json::Value as JsonValue;

/// Exports allowed in `.page.server` files.
pub const SERVER_EXPORTS: [&str; 6] = [
    "render",
    "onBeforeRender",
    "passToClient",
    "prerender",
    "doNotPrerender",
    "onBeforePrerender",
];

/// HTML produced by the helpers.
#[derive(Debug, Clone)]
struct LuaHtml(String);

impl UserData for LuaHtml {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.0.clone()));
        methods.add_meta_function(MetaMethod::Concat, |lua, (a, b): (Value, Value)| {
            let joined = html_part(&a)? + &html_part(&b)?;
            lua.create_userdata(LuaHtml(joined))
        });
    }
}

/// Renders one value for insertion into HTML.
fn html_part(value: &Value) -> mlua::Result<String> {
    match value {
        Value::UserData(ud) => Ok(ud.borrow::<LuaHtml>()?.0.clone()),
        Value::String(s) => Ok(escape_html(&s.to_str()?)),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        other => Err(mlua::Error::runtime(format!(
            "cannot insert a {} into HTML",
            other.type_name()
        ))),
    }
}

/// Fills the `${name}` placeholders of a trusted template.
fn fill_template(template: &str, values: Option<&Table>) -> mlua::Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| mlua::Error::runtime("escape_inject(): unclosed `${` in template"))?;
        let name = after[..end].trim();
        let value = match values {
            Some(values) => values.get::<Value>(name)?,
            None => Value::Nil,
        };
        if value.is_nil() {
            return Err(mlua::Error::runtime(format!(
                "escape_inject(): no value for `${{{}}}`",
                name
            )));
        }
        out.push_str(&html_part(&value)?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn register_html_functions(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    globals.set(
        "escape_html",
        lua.create_function(|_, text: String| Ok(escape_html(&text)))?,
    )?;
    globals.set(
        "dangerously_skip_escape",
        lua.create_function(|lua, html: String| lua.create_userdata(LuaHtml(html)))?,
    )?;
    globals.set(
        "escape_inject",
        lua.create_function(|lua, (template, values): (String, Option<Table>)| {
            lua.create_userdata(LuaHtml(fill_template(&template, values.as_ref())?))
        })?,
    )?;
    Ok(())
}

/// Converts what a Lua `render()` returned.
fn to_render_value(lua: &Lua, value: Value) -> Result<RenderValue, BoxError> {
    Ok(match value {
        Value::Nil => RenderValue::Null,
        Value::UserData(ud) => match ud.borrow::<LuaHtml>() {
            Ok(html) => RenderValue::Html(DocumentHtml::dangerously_skip_escape(html.0.clone())),
            Err(_) => RenderValue::Other("userdata".to_string()),
        },
        Value::String(s) => RenderValue::String(s.to_str()?.to_string()),
        Value::Table(table) => {
            let mut document_html = None;
            let mut page_context = None;
            let mut unknown_keys = Vec::new();
            for pair in table.pairs::<Value, Value>() {
                let (key, value) = pair?;
                let key = match &key {
                    Value::String(s) => s.to_str()?.to_string(),
                    other => other.type_name().to_string(),
                };
                match key.as_str() {
                    "documentHtml" => document_html = Some(Box::new(to_render_value(lua, value)?)),
                    "pageContext" => page_context = Some(lua.from_value::<JsonValue>(value)?),
                    _ => unknown_keys.push(key),
                }
            }
            RenderValue::Object {
                document_html,
                page_context,
                unknown_keys,
            }
        }
        other => RenderValue::Other(other.type_name().to_string()),
    })
}

/// JSON to Lua; `null` becomes `nil`.
fn json_to_lua(lua: &Lua, value: &JsonValue) -> mlua::Result<Value> {
    let options = SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false);
    lua.to_value_with(value, options)
}

/// A Lua state shared by every page file of a project.
#[derive(Clone)]
pub struct LuaRuntime {
    lua: Arc<Lua>,
}

impl LuaRuntime {
    /// Creates a Lua state with the HTML helpers registered.
    pub fn new() -> mlua::Result<Self> {
        let lua = Lua::new();
        register_html_functions(&lua)?;
        Ok(Self { lua: Arc::new(lua) })
    }

    /// Runs a page file and collects its exports.
    pub fn load_exports(&self, file_path: &str, source: &str) -> Result<FileExports, BoxError> {
        let lua = &self.lua;
        let env = lua.create_table()?;
        let meta = lua.create_table()?;
        meta.set("__index", lua.globals())?;
        env.set_metatable(Some(meta));
        lua.load(source)
            .set_name(format!("@{}", file_path))
            .set_environment(env.clone())
            .exec()?;

        if PageFileKind::from_file_path(file_path) == Some(PageFileKind::PageServer) {
            check_export_names(&env, file_path)?;
        }

        let mut exports = FileExports::new();
        if let Some(f) = env.raw_get::<Option<Function>>("render")? {
            exports.render = Some(self.render_hook(f));
        }
        if let Some(f) = env.raw_get::<Option<Function>>("onBeforeRender")? {
            exports.on_before_render = Some(self.before_render_hook(f));
        }
        exports.pass_to_client = env.raw_get::<Option<Vec<String>>>("passToClient")?;
        if let Some(f) = env.raw_get::<Option<Function>>("prerender")? {
            exports.prerender = Some(self.prerender_hook(f));
        }
        exports.do_not_prerender = env.raw_get::<Option<bool>>("doNotPrerender")?.unwrap_or(false);
        if let Some(f) = env.raw_get::<Option<Function>>("onBeforePrerender")? {
            exports.on_before_prerender = Some(self.before_prerender_hook(f));
        }
        exports.route = match env.raw_get::<Value>("route")? {
            Value::Nil => None,
            Value::String(s) => Some(RouteSource::String(s.to_str()?.to_string())),
            Value::Function(f) => Some(RouteSource::Function(self.route_function(f))),
            other => {
                return Err(UsageError::new(format!(
                    "The `route` exported by {} should be a string or a function, but it is a {}",
                    file_path,
                    other.type_name()
                ))
                .into())
            }
        };
        Ok(exports)
    }

    fn render_hook(&self, func: Function) -> RenderHook {
        let lua = self.lua.clone();
        Hook::new(move |ctx: PageContext| {
            let lua = lua.clone();
            let func = func.clone();
            async move {
                let arg = json_to_lua(&lua, &ctx.to_json())?;
                let ret = func.call::<Value>(arg)?;
                to_render_value(&lua, ret)
            }
        })
    }

    fn before_render_hook(&self, func: Function) -> BeforeRenderHook {
        let lua = self.lua.clone();
        Hook::new(move |call: BeforeRenderCall| {
            let lua = lua.clone();
            let func = func.clone();
            async move {
                let ctx = json_to_lua(&lua, &call.page_context.to_json())?;
                let hooks = match call.server_hooks {
                    Some(control) => {
                        let table = lua.create_table()?;
                        let skip = lua.create_function(move |_, ()| control.skip().map_err(mlua::Error::external))?;
                        table.set("skip_server_hooks", skip)?;
                        Value::Table(table)
                    }
                    None => Value::Nil,
                };
                let ret = func.call::<Value>((ctx, hooks))?;
                Ok(lua.from_value::<JsonValue>(ret)?)
            }
        })
    }

    fn prerender_hook(&self, func: Function) -> PrerenderHook {
        let lua = self.lua.clone();
        Hook::new(move |()| {
            let lua = lua.clone();
            let func = func.clone();
            async move {
                let ret = func.call::<Value>(())?;
                Ok(lua.from_value::<JsonValue>(ret)?)
            }
        })
    }

    fn before_prerender_hook(&self, func: Function) -> BeforePrerenderHook {
        let lua = self.lua.clone();
        Hook::new(move |global: JsonValue| {
            let lua = lua.clone();
            let func = func.clone();
            async move {
                let ret = func.call::<Value>(json_to_lua(&lua, &global)?)?;
                Ok(lua.from_value::<JsonValue>(ret)?)
            }
        })
    }

    fn route_function(&self, func: Function) -> RouteFunction {
        let lua = self.lua.clone();
        Hook::new(move |ctx: PageContext| {
            let lua = lua.clone();
            let func = func.clone();
            async move {
                let ret = func.call::<Value>(json_to_lua(&lua, &ctx.to_json())?)?;
                Ok(lua.from_value::<JsonValue>(ret)?)
            }
        })
    }
}

fn check_export_names(env: &Table, file_path: &str) -> Result<(), BoxError> {
    for pair in env.clone().pairs::<String, Value>() {
        let (name, _) = pair?;
        if !SERVER_EXPORTS.contains(&name.as_str()) {
            return Err(UsageError::new(format!(
                "{} exports `{}` which is unknown. The known exports are: {}. Use `local` for helpers.",
                file_path,
                name,
                SERVER_EXPORTS.map(|n| format!("`{}`", n)).join(", ")
            ))
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagewire::{GlobalContext, MemoryPageFiles};
    use serde_json::json;

    async fn page_context(url: &str) -> PageContext {
        let source = MemoryPageFiles::new();
        GlobalContext::load(&source, "/").await.unwrap().page_context(url)
    }

    fn html_of(value: RenderValue) -> String {
        match value {
            RenderValue::Html(html) => html.as_str().unwrap().to_string(),
            other => panic!("expected HTML, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_render_escapes_values() {
        let runtime = LuaRuntime::new().unwrap();
        let exports = runtime
            .load_exports(
                "/pages/a.page.server.lua",
                r#"
                function render(pageContext)
                  return escape_inject("<p>${url}</p>", { url = pageContext.url .. "<b>" })
                end
                "#,
            )
            .unwrap();
        let render = exports.render.unwrap();
        let value = render.call(page_context("/a").await).await.unwrap();
        assert_eq!(html_of(value), "<p>/a&lt;b&gt;</p>");
    }

    #[tokio::test]
    async fn test_html_concatenation() {
        let runtime = LuaRuntime::new().unwrap();
        let exports = runtime
            .load_exports(
                "/pages/a.page.lua",
                r#"
                function render()
                  local head = dangerously_skip_escape("<h1>")
                  return head .. "Tom & Jerry" .. dangerously_skip_escape("</h1>")
                end
                "#,
            )
            .unwrap();
        let value = exports.render.unwrap().call(page_context("/a").await).await.unwrap();
        assert_eq!(html_of(value), "<h1>Tom &amp; Jerry</h1>");
    }

    #[tokio::test]
    async fn test_render_object_and_plain_string() {
        let runtime = LuaRuntime::new().unwrap();
        let exports = runtime
            .load_exports(
                "/pages/a.page.server.lua",
                r#"
                function render(pageContext)
                  if pageContext.url == "/plain" then
                    return "<p>plain</p>"
                  end
                  return { documentHtml = escape_inject("<p/>"), pageContext = { answer = 42 } }
                end
                "#,
            )
            .unwrap();
        let render = exports.render.unwrap();

        match render.call(page_context("/a").await).await.unwrap() {
            RenderValue::Object {
                document_html,
                page_context,
                unknown_keys,
            } => {
                assert!(matches!(document_html.as_deref(), Some(RenderValue::Html(_))));
                assert_eq!(page_context, Some(json!({ "answer": 42 })));
                assert!(unknown_keys.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            render.call(page_context("/plain").await).await.unwrap(),
            RenderValue::String(_)
        ));
    }

    #[test]
    fn test_data_exports() {
        let runtime = LuaRuntime::new().unwrap();
        let exports = runtime
            .load_exports(
                "/pages/a.page.server.lua",
                r#"
                passToClient = { "title", "user" }
                doNotPrerender = true
                "#,
            )
            .unwrap();
        assert_eq!(exports.pass_to_client, Some(vec!["title".to_string(), "user".to_string()]));
        assert!(exports.do_not_prerender);
        assert!(exports.render.is_none());
    }

    #[test]
    fn test_unknown_server_export() {
        let runtime = LuaRuntime::new().unwrap();
        let err = runtime
            .load_exports("/pages/a.page.server.lua", "function helper() end")
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("`helper`"));
        assert!(message.contains("`onBeforePrerender`"));

        // Only server files are checked; locals are never exports.
        assert!(runtime.load_exports("/pages/a.page.lua", "function helper() end").is_ok());
        assert!(runtime
            .load_exports("/pages/b.page.server.lua", "local function helper() end")
            .is_ok());
    }

    #[tokio::test]
    async fn test_route_exports() {
        let runtime = LuaRuntime::new().unwrap();
        let exports = runtime
            .load_exports("/pages/a.page.route.lua", r#"route = "/product/:id""#)
            .unwrap();
        assert!(matches!(exports.route, Some(RouteSource::String(ref r)) if r == "/product/:id"));

        let exports = runtime
            .load_exports(
                "/pages/b.page.route.lua",
                r#"
                function route(pageContext)
                  return { routeParams = { path = pageContext.urlPathname }, precedence = 2 }
                end
                "#,
            )
            .unwrap();
        let Some(RouteSource::Function(f)) = exports.route else {
            panic!("expected a route function");
        };
        let value = f.call(page_context("/x/y").await).await.unwrap();
        assert_eq!(value, json!({ "routeParams": { "path": "/x/y" }, "precedence": 2 }));

        let err = runtime
            .load_exports("/pages/c.page.route.lua", "route = 42")
            .unwrap_err();
        assert!(err.to_string().contains("string or a function"));
    }

    #[tokio::test]
    async fn test_prerender_hooks() {
        let runtime = LuaRuntime::new().unwrap();
        let exports = runtime
            .load_exports(
                "/pages/_default/_default.page.server.lua",
                r#"
                function prerender()
                  return { "/a", { url = "/b", pageContext = { title = "B" } } }
                end

                function onBeforePrerender(globalContext)
                  return { globalContext = { count = #globalContext.prerenderPageContexts } }
                end
                "#,
            )
            .unwrap();
        let urls = exports.prerender.unwrap().call(()).await.unwrap();
        assert_eq!(urls, json!(["/a", { "url": "/b", "pageContext": { "title": "B" } }]));

        let view = json!({ "prerenderPageContexts": [{}, {}, {}] });
        let value = exports.on_before_prerender.unwrap().call(view).await.unwrap();
        assert_eq!(value, json!({ "globalContext": { "count": 3 } }));
    }

    #[tokio::test]
    async fn test_lua_error_is_hook_error() {
        let runtime = LuaRuntime::new().unwrap();
        let exports = runtime
            .load_exports(
                "/pages/a.page.server.lua",
                r#"function render() error("boom") end"#,
            )
            .unwrap();
        let err = exports.render.unwrap().call(page_context("/a").await).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_template_errors() {
        assert!(fill_template("<p>${missing}</p>", None).is_err());
        assert!(fill_template("<p>${open</p>", None).is_err());
        assert_eq!(fill_template("<p>static</p>", None).unwrap(), "<p>static</p>");
    }

    #[tokio::test]
    async fn test_json_null_is_nil() {
        let runtime = LuaRuntime::new().unwrap();
        let exports = runtime
            .load_exports(
                "/pages/a.page.route.lua",
                r#"
                function route(pageContext)
                  return pageContext.pageId == nil and type(pageContext.pageId) == "nil"
                end
                "#,
            )
            .unwrap();
        let Some(RouteSource::Function(f)) = exports.route else {
            panic!("expected a route function");
        };
        assert_eq!(f.call(page_context("/a").await).await.unwrap(), json!(true));
    }
}
