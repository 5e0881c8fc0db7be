//! Handler traits and the per-request context.
//!
//! A handler type embeds a [`BaseHandler`] and implements one of the
//! capability traits: [`HttpHandler`] for verb-dispatched requests,
//! [`WsServeHandler`]/[`WsJsonHandler`]/[`WsTextHandler`] for WebSocket
//! styles, or [`ErrorHandler`] for custom error pages. Instances are built
//! ahead of time by a pool from the factory registered for the type; the
//! dispatcher binds a fresh [`RequestContext`], runs `init`, the
//! capability-specific hooks, then `destroy`, and the instance is dropped.
//!
//! ```no_run
//! use grackle::{BaseHandler, HttpHandler, WebHandler};
//!
//! #[derive(Default)]
//! struct HelloHandler {
//!     base: BaseHandler,
//! }
//!
//! impl WebHandler for HelloHandler {
//!     fn base(&self) -> &BaseHandler {
//!         &self.base
//!     }
//!     fn base_mut(&mut self) -> &mut BaseHandler {
//!         &mut self.base
//!     }
//! }
//!
//! impl HttpHandler for HelloHandler {
//!     fn get(&mut self) {
//!         self.write_string("Hello!");
//!     }
//! }
//! ```

use crate::app::AppInner;
use crate::error::Result;
use crate::router::RouteHandle;
use crate::server::{Request, ResponseWriter};
use crate::ws::WsConnection;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Outcome of the `init` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Init {
    /// Continue with the verb or WebSocket hooks.
    Proceed,
    /// The handler already wrote the full response; skip the remaining
    /// hooks.
    Handled,
    /// Refuse the request with an error status; the reason goes through
    /// the error reporter.
    Reject { status: u16, reason: String },
}

/// Everything a handler can see about the request being served.
pub struct RequestContext {
    pub request: Request,
    pub response: ResponseWriter,
    /// Variables captured by the matched route, in pattern order.
    pub vars: HashMap<String, String>,
    pub(crate) route: Option<RouteHandle>,
    pub(crate) app: Arc<AppInner>,
    pub(crate) session_id: Option<String>,
}

/// State embedded in every handler type.
#[derive(Default)]
pub struct BaseHandler {
    pub(crate) ctx: Option<RequestContext>,
    pub(crate) ws: Option<WsConnection>,
}

/// Common surface of all handler capabilities. Implementors only provide
/// the two base accessors; everything else has a default.
pub trait WebHandler: Send {
    fn base(&self) -> &BaseHandler;
    fn base_mut(&mut self) -> &mut BaseHandler;

    /// Runs before any other hook. The default proceeds.
    fn init(&mut self) -> Init {
        Init::Proceed
    }

    /// Runs after the capability hooks once `init` has proceeded, even
    /// when a hook panicked. Skipped when `init` short-circuited or
    /// rejected.
    fn destroy(&mut self) {}

    // -- context plumbing, called by the dispatcher --

    fn bind(&mut self, ctx: RequestContext) {
        self.base_mut().ctx = Some(ctx);
    }

    fn unbind(&mut self) -> Option<RequestContext> {
        self.base_mut().ctx.take()
    }

    // -- request helpers --

    /// Only present between `bind` and `unbind`; hooks always run inside
    /// that window.
    #[allow(clippy::expect_used)]
    fn context(&self) -> &RequestContext {
        self.base()
            .ctx
            .as_ref()
            .expect("handler used outside a request lifecycle")
    }

    #[allow(clippy::expect_used)]
    fn context_mut(&mut self) -> &mut RequestContext {
        self.base_mut()
            .ctx
            .as_mut()
            .expect("handler used outside a request lifecycle")
    }

    fn request(&self) -> &Request {
        &self.context().request
    }

    fn response(&mut self) -> &mut ResponseWriter {
        &mut self.context_mut().response
    }

    /// Route variable captured from the URL, e.g. `id` for `/user/{id}`.
    fn var(&self, name: &str) -> Option<&str> {
        self.context().vars.get(name).map(String::as_str)
    }

    /// Query string parameter.
    fn query(&self, name: &str) -> Option<&str> {
        self.context().request.query.get(name).map(String::as_str)
    }

    /// The route that dispatched this request. `None` for error handlers
    /// serving an unmatched path.
    fn route(&self) -> Option<&RouteHandle> {
        self.context().route.as_ref()
    }

    fn status(&mut self, code: u16) {
        self.response().set_status(code);
    }

    fn header(&mut self, name: &str, value: &str) {
        self.response().set_header(name, value);
    }

    /// Write a string to the response body. Write failures are logged,
    /// not propagated: the client is usually gone.
    fn write_string(&mut self, text: &str) {
        use std::io::Write;
        if let Err(e) = self.response().write_all(text.as_bytes()) {
            warn!(error = %e, "response write failed");
        }
    }

    /// Serialize a value as the JSON response body.
    fn write_json<T: Serialize>(&mut self, value: &T) -> Result<()>
    where
        Self: Sized,
    {
        use std::io::Write;
        let body = serde_json::to_vec(value).map_err(|e| {
            crate::error::Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        self.header("Content-Type", "application/json");
        self.response().write_all(&body)?;
        Ok(())
    }

    /// Render a template from the application's engine into the response.
    fn render(&mut self, name: &str, ctx: &serde_json::Value) -> Result<()> {
        let engine = self.context().app.template_engine();
        engine.render(&mut self.context_mut().response, name, ctx)
    }

    /// Reverse a named route into a URL.
    fn url_for(&self, alias: &str, vars: &[(&str, &str)]) -> Result<String> {
        self.context().app.url_for(alias, vars)
    }

    // -- sessions --

    fn session_get(&self, key: &str) -> Option<serde_json::Value> {
        let store = self.context().app.session_store();
        store.get(self.context(), key)
    }

    fn session_set(&mut self, key: &str, value: serde_json::Value) {
        let store = self.context().app.session_store();
        store.set(self.context_mut(), key, value);
    }

    fn session_remove(&mut self, key: &str) {
        let store = self.context().app.session_store();
        store.remove(self.context_mut(), key);
    }

    /// Drop the whole session.
    fn session_clean(&mut self) {
        let store = self.context().app.session_store();
        store.clean(self.context_mut());
    }

    // -- websocket --

    /// The upgraded connection. Only present in WebSocket hooks.
    #[allow(clippy::expect_used)]
    fn ws(&mut self) -> &mut WsConnection {
        self.base_mut()
            .ws
            .as_mut()
            .expect("no websocket connection bound")
    }
}

/// Verb-dispatched HTTP handler. Unimplemented verbs answer 404, matching
/// the behavior of a route that exists but has nothing to say for that
/// method.
pub trait HttpHandler: WebHandler {
    fn get(&mut self) {
        reply_not_found(self.response());
    }
    fn post(&mut self) {
        reply_not_found(self.response());
    }
    fn put(&mut self) {
        reply_not_found(self.response());
    }
    fn delete(&mut self) {
        reply_not_found(self.response());
    }
    fn patch(&mut self) {
        reply_not_found(self.response());
    }
    fn options(&mut self) {
        reply_not_found(self.response());
    }
    fn trace(&mut self) {
        reply_not_found(self.response());
    }
}

fn reply_not_found(response: &mut ResponseWriter) {
    crate::error_page::write_default(response, 404, "Not Found", &[]);
}

/// WebSocket handler with full control: `serve` owns the connection and
/// returns when it is done with it.
pub trait WsServeHandler: WebHandler {
    /// Runs right after the upgrade, before `serve`.
    fn on_connect(&mut self) {}
    fn serve(&mut self);
    fn on_close(&mut self) {}
}

/// WebSocket handler fed decoded JSON values, one per text or binary
/// frame. Frames that fail to parse are reported to `on_error`.
pub trait WsJsonHandler: WebHandler {
    /// Runs right after the upgrade, before the read loop.
    fn on_connect(&mut self) {}
    fn on_json(&mut self, value: serde_json::Value);
    fn on_error(&mut self, _error: serde_json::Error) {}
    fn on_close(&mut self) {}
}

/// WebSocket handler fed text frames.
pub trait WsTextHandler: WebHandler {
    /// Runs right after the upgrade, before the read loop.
    fn on_connect(&mut self) {}
    fn on_message(&mut self, message: &str);
    fn on_close(&mut self) {}
}

/// Renders error responses for the whole application. Unlike the other
/// capabilities this one gets the sink directly instead of a bound
/// context: the reporter runs at points where no route matched and no
/// context exists.
pub trait ErrorHandler: WebHandler {
    fn render_error(
        &mut self,
        response: &mut ResponseWriter,
        status: u16,
        message: &str,
        details: &[String],
    );
}

/// A pooled, ready-to-bind handler instance.
pub enum HandlerInstance {
    Http(Box<dyn HttpHandler>),
    WsServe(Box<dyn WsServeHandler>),
    WsJson(Box<dyn WsJsonHandler>),
    WsText(Box<dyn WsTextHandler>),
    ErrorPage(Box<dyn ErrorHandler>),
}

impl std::fmt::Debug for HandlerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Http(_) => "Http",
            Self::WsServe(_) => "WsServe",
            Self::WsJson(_) => "WsJson",
            Self::WsText(_) => "WsText",
            Self::ErrorPage(_) => "ErrorPage",
        };
        f.debug_tuple(name).finish_non_exhaustive()
    }
}

/// Capability of a handler type, decided at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Http,
    WsServe,
    WsJson,
    WsText,
    ErrorPage,
}

impl HandlerInstance {
    #[must_use]
    pub fn kind(&self) -> HandlerKind {
        match self {
            HandlerInstance::Http(_) => HandlerKind::Http,
            HandlerInstance::WsServe(_) => HandlerKind::WsServe,
            HandlerInstance::WsJson(_) => HandlerKind::WsJson,
            HandlerInstance::WsText(_) => HandlerKind::WsText,
            HandlerInstance::ErrorPage(_) => HandlerKind::ErrorPage,
        }
    }

    pub(crate) fn as_web_mut(&mut self) -> &mut dyn WebHandler {
        match self {
            HandlerInstance::Http(h) => &mut **h,
            HandlerInstance::WsServe(h) => &mut **h,
            HandlerInstance::WsJson(h) => &mut **h,
            HandlerInstance::WsText(h) => &mut **h,
            HandlerInstance::ErrorPage(h) => &mut **h,
        }
    }
}

/// Builds fresh handler instances for the pool producer.
pub type HandlerFactory = Arc<dyn Fn() -> HandlerInstance + Send + Sync>;

/// Everything the application needs to pool a handler type: its identity,
/// its capability, and a closure producing fresh instances.
pub struct Registration {
    pub(crate) type_id: std::any::TypeId,
    pub(crate) name: &'static str,
    pub(crate) kind: HandlerKind,
    pub(crate) factory: HandlerFactory,
}

impl Registration {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }
}

/// Register an HTTP handler type.
#[must_use]
pub fn http<H>() -> Registration
where
    H: HttpHandler + Default + 'static,
{
    Registration {
        type_id: std::any::TypeId::of::<H>(),
        name: short_type_name::<H>(),
        kind: HandlerKind::Http,
        factory: Arc::new(|| HandlerInstance::Http(Box::new(H::default()))),
    }
}

/// Register a `serve`-style WebSocket handler type.
#[must_use]
pub fn ws_serve<H>() -> Registration
where
    H: WsServeHandler + Default + 'static,
{
    Registration {
        type_id: std::any::TypeId::of::<H>(),
        name: short_type_name::<H>(),
        kind: HandlerKind::WsServe,
        factory: Arc::new(|| HandlerInstance::WsServe(Box::new(H::default()))),
    }
}

/// Register a JSON WebSocket handler type.
#[must_use]
pub fn ws_json<H>() -> Registration
where
    H: WsJsonHandler + Default + 'static,
{
    Registration {
        type_id: std::any::TypeId::of::<H>(),
        name: short_type_name::<H>(),
        kind: HandlerKind::WsJson,
        factory: Arc::new(|| HandlerInstance::WsJson(Box::new(H::default()))),
    }
}

/// Register a text WebSocket handler type.
#[must_use]
pub fn ws_text<H>() -> Registration
where
    H: WsTextHandler + Default + 'static,
{
    Registration {
        type_id: std::any::TypeId::of::<H>(),
        name: short_type_name::<H>(),
        kind: HandlerKind::WsText,
        factory: Arc::new(|| HandlerInstance::WsText(Box::new(H::default()))),
    }
}

/// Register an error page handler type.
#[must_use]
pub fn error_page<H>() -> Registration
where
    H: ErrorHandler + Default + 'static,
{
    Registration {
        type_id: std::any::TypeId::of::<H>(),
        name: short_type_name::<H>(),
        kind: HandlerKind::ErrorPage,
        factory: Arc::new(|| HandlerInstance::ErrorPage(Box::new(H::default()))),
    }
}

/// `my_app::handlers::UserHandler` -> `UserHandler`. Registration and the
/// config route table both use the short form.
#[must_use]
pub(crate) fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_drop_module_paths() {
        assert_eq!(short_type_name::<BaseHandler>(), "BaseHandler");
        assert_eq!(short_type_name::<u32>(), "u32");
    }
}
