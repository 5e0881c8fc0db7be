//! Application assembly and request dispatch.
//!
//! [`App`] owns the route table, the handler pools, the session store, the
//! template engine and the WebSocket rooms. It is a cheap clone over shared
//! state: registration happens while the app is still exclusively owned,
//! serving clones it into connection coroutines. Dispatch runs the handler
//! lifecycle: checkout from the pool, bind the request context, `init`, the
//! capability hooks, `destroy`, report. A panic anywhere in the hooks is
//! caught at the request boundary and turned into a 500; the connection
//! coroutine never unwinds.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::error_page;
use crate::handler::{
    ErrorHandler as _, HandlerInstance, HandlerKind, HttpHandler as _, Init, Registration,
    RequestContext, WebHandler, WsJsonHandler, WsServeHandler as _, WsTextHandler,
};
use crate::pool::PoolRegistry;
use crate::router::{RouteHandle, RouteTable};
use crate::runtime::RuntimeConfig;
use crate::server::{self, request::read_request, Request, ResponseWriter, ServerHandle};
use crate::session::{MemorySessionStore, SessionStore};
use crate::static_files::StaticFiles;
use crate::template::{JinjaEngine, TemplateEngine};
use crate::ws::{self, Message, RoomSet, WsConnection};
use may::net::TcpStream;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn};

const SUPPORTED_METHODS: [&str; 8] =
    ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS", "TRACE", "HEAD"];

/// The application. Clones share the same routes, pools and stores.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

pub(crate) struct AppInner {
    config: Config,
    runtime: RuntimeConfig,
    routes: RouteTable,
    pools: PoolRegistry,
    sessions: Arc<dyn SessionStore>,
    templates: Arc<dyn TemplateEngine>,
    statics: Option<StaticFiles>,
    rooms: Arc<RoomSet>,
    error_handler: Option<&'static str>,
}

impl App {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let runtime = RuntimeConfig::from_env();
        let statics = config.static_dir.as_deref().map(StaticFiles::new);
        let sessions: Arc<dyn SessionStore> =
            Arc::new(MemorySessionStore::new(config.session.name.clone()));
        sessions.init();
        let templates: Arc<dyn TemplateEngine> =
            Arc::new(JinjaEngine::new(&config.template.dir));
        App {
            inner: Arc::new(AppInner {
                routes: RouteTable::new(config.strict_slash),
                pools: PoolRegistry::default(),
                sessions,
                templates,
                statics,
                rooms: Arc::new(RoomSet::default()),
                error_handler: None,
                runtime,
                config,
            }),
        }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Registration requires exclusive ownership; once the app has been
    /// cloned into a server it is frozen.
    fn inner_mut(&mut self) -> Result<&mut AppInner> {
        Arc::get_mut(&mut self.inner).ok_or_else(|| {
            Error::Config("app is already shared; register handlers before serving".to_string())
        })
    }

    // -- registration --

    /// Register a handler type without routing to it. Needed before
    /// [`bind_config_routes`](Self::bind_config_routes) can reference the
    /// type by name.
    pub fn handler(&mut self, registration: Registration) -> Result<()> {
        if registration.kind() == HandlerKind::ErrorPage {
            return Err(Error::Config(format!(
                "`{}` is an error handler; register it with error_handler()",
                registration.name()
            )));
        }
        self.inner_mut()?.register_pool(&registration)
    }

    /// Register a handler type and route a pattern to it.
    pub fn route(&mut self, pattern: &str, registration: Registration) -> Result<RouteHandle> {
        self.add_route(pattern, None, registration)
    }

    /// Like [`route`](Self::route), with an alias for reverse URL lookups.
    pub fn named_route(
        &mut self,
        pattern: &str,
        alias: &str,
        registration: Registration,
    ) -> Result<RouteHandle> {
        self.add_route(pattern, Some(alias.to_string()), registration)
    }

    fn add_route(
        &mut self,
        pattern: &str,
        alias: Option<String>,
        registration: Registration,
    ) -> Result<RouteHandle> {
        if registration.kind() == HandlerKind::ErrorPage {
            return Err(Error::Config(format!(
                "error handler `{}` cannot serve routes",
                registration.name()
            )));
        }
        let inner = self.inner_mut()?;
        inner.register_pool(&registration)?;
        inner.routes.add(pattern, registration.name(), alias)
    }

    /// Install the application-wide error page handler.
    pub fn error_handler(&mut self, registration: Registration) -> Result<()> {
        if registration.kind() != HandlerKind::ErrorPage {
            return Err(Error::Config(format!(
                "`{}` is not an error handler",
                registration.name()
            )));
        }
        let name = registration.name();
        let inner = self.inner_mut()?;
        inner.register_pool(&registration)?;
        inner.error_handler = Some(name);
        Ok(())
    }

    /// Add the routes declared in the configuration file. Every referenced
    /// handler type must have been registered already.
    pub fn bind_config_routes(&mut self) -> Result<()> {
        let inner = self.inner_mut()?;
        let bindings: Vec<_> = inner
            .config
            .routes
            .iter()
            .map(|(p, s)| (p.clone(), s.clone()))
            .collect();
        for (pattern, spec) in bindings {
            if !inner.pools.contains(&spec.handler) {
                return Err(Error::UnknownHandler(spec.handler));
            }
            inner.routes.add(&pattern, spec.handler, spec.alias)?;
        }
        Ok(())
    }

    /// Replace the session store. Call before serving.
    pub fn set_session_store(&mut self, store: Arc<dyn SessionStore>) -> Result<()> {
        store.init();
        self.inner_mut()?.sessions = store;
        Ok(())
    }

    /// Replace the template engine. Call before serving.
    pub fn set_template_engine(&mut self, engine: Arc<dyn TemplateEngine>) -> Result<()> {
        self.inner_mut()?.templates = engine;
        Ok(())
    }

    // -- lookups --

    /// The route registered under `alias`; the earliest one when several
    /// share the name.
    pub fn get_route(&self, alias: &str) -> Result<RouteHandle> {
        self.inner.routes.by_alias(alias)
    }

    /// Every route registered under `alias`. Several routes may share one
    /// logical name.
    #[must_use]
    pub fn get_routes(&self, alias: &str) -> Vec<RouteHandle> {
        self.inner.routes.by_alias_all(alias)
    }

    /// Reverse a named route into a URL.
    pub fn url_for(&self, alias: &str, vars: &[(&str, &str)]) -> Result<String> {
        self.inner.url_for(alias, vars)
    }

    #[must_use]
    pub fn pools(&self) -> &PoolRegistry {
        &self.inner.pools
    }

    /// Push a text frame to every member of a room.
    pub fn broadcast(&self, room: &str, text: &str) {
        ws::broadcast_text(&self.inner.rooms, room, text);
    }

    // -- serving --

    /// Bind the listener and serve until the handle is stopped. `addr`
    /// overrides the configured listen address.
    pub fn serve(&self, addr: Option<&str>) -> std::io::Result<ServerHandle> {
        let addr = addr.unwrap_or(&self.inner.config.listen).to_string();
        let inner = Arc::clone(&self.inner);
        server::start(&addr, self.inner.runtime, move |stream| {
            AppInner::handle_connection(&inner, stream);
        })
    }

    /// Stop all handler pool producers and wait for them. Requests in
    /// flight finish; new checkouts drain the remaining stock and then
    /// fail.
    pub fn soft_stop(&self) {
        info!("soft stop: closing handler pools");
        self.inner.pools.soft_stop();
    }

    /// Run one request through the full lifecycle and return the writer,
    /// which buffer-backed callers can inspect.
    pub fn dispatch(&self, request: Request, response: ResponseWriter) -> ResponseWriter {
        AppInner::dispatch(&self.inner, request, response)
    }

    /// Write an error response, through the registered error handler when
    /// there is one. Does nothing if the response head already went out.
    pub fn report(
        &self,
        status: u16,
        response: &mut ResponseWriter,
        message: &str,
        details: &[String],
    ) {
        self.inner.report(status, response, message, details);
    }
}

impl AppInner {
    fn register_pool(&mut self, registration: &Registration) -> Result<()> {
        self.pools.register(
            registration,
            self.config.handler_cache,
            self.runtime.stack_size,
        )
    }

    pub(crate) fn session_store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.sessions)
    }

    pub(crate) fn template_engine(&self) -> Arc<dyn TemplateEngine> {
        Arc::clone(&self.templates)
    }

    pub(crate) fn url_for(&self, alias: &str, vars: &[(&str, &str)]) -> Result<String> {
        self.routes.by_alias(alias)?.url(vars)
    }

    fn handle_connection(inner: &Arc<AppInner>, mut stream: TcpStream) {
        match read_request(&mut stream) {
            Ok(Some(request)) => {
                let response = ResponseWriter::stream(stream);
                let _ = AppInner::dispatch(inner, request, response);
            }
            Ok(None) => {}
            Err(e) => {
                debug!(error = %e, "unreadable request");
                let mut response = ResponseWriter::stream(stream);
                error_page::write_default(&mut response, 400, "Bad Request", &[]);
                let _ = response.finish();
            }
        }
    }

    fn dispatch(
        inner: &Arc<AppInner>,
        request: Request,
        mut response: ResponseWriter,
    ) -> ResponseWriter {
        let span = info_span!(
            "request",
            id = %request.id,
            method = %request.method,
            path = %request.path,
        );
        let _guard = span.enter();

        if request.method == http::Method::GET {
            if let Some(statics) = &inner.statics {
                if statics.matches(&request.path) {
                    return inner.serve_static(statics, &request, response);
                }
            }
        }

        let Some(resolution) = inner.routes.resolve(&request.path) else {
            debug!("no matching route");
            inner.report(404, &mut response, "Not Found", &[request.path.clone()]);
            let _ = response.finish();
            return response;
        };
        let route = resolution.route;
        debug!(
            route = route.pattern(),
            handler = route.handler(),
            score = resolution.score,
            "route resolved"
        );

        let kind = match inner.pools.pool(route.handler()) {
            Ok(pool) => pool.kind(),
            Err(e) => {
                error!(error = %e, "route bound to unknown handler");
                inner.report(500, &mut response, "Internal Server Error", &[]);
                let _ = response.finish();
                return response;
            }
        };
        if kind == HandlerKind::Http
            && !SUPPORTED_METHODS.contains(&request.method.as_str())
        {
            inner.report(501, &mut response, "Not Implemented", &[]);
            let _ = response.finish();
            return response;
        }

        let instance = match inner.pools.checkout(route.handler()) {
            Ok(instance) => instance,
            Err(Error::PoolClosed) => {
                inner.report(503, &mut response, "shutting down", &[]);
                let _ = response.finish();
                return response;
            }
            Err(e) => {
                error!(error = %e, "checkout failed");
                inner.report(500, &mut response, "Internal Server Error", &[]);
                let _ = response.finish();
                return response;
            }
        };

        let ctx = RequestContext {
            vars: resolution.vars.into_iter().collect(),
            route: Some(route),
            app: Arc::clone(inner),
            session_id: None,
            request,
            response,
        };
        match kind {
            HandlerKind::Http => inner.run_http(instance, ctx),
            HandlerKind::WsServe | HandlerKind::WsJson | HandlerKind::WsText => {
                inner.run_ws(instance, ctx)
            }
            HandlerKind::ErrorPage => {
                // add_route refuses these, so a pool of this kind can
                // never be routed to.
                let detail = match &ctx.route {
                    Some(route) => format!(
                        "handler `{}` has kind {kind:?}, which cannot serve routes",
                        route.handler()
                    ),
                    None => format!("kind {kind:?} cannot serve routes"),
                };
                let mut response = ctx.response;
                inner.report(500, &mut response, "Internal Server Error", &[detail]);
                let _ = response.finish();
                response
            }
        }
    }

    fn serve_static(
        &self,
        statics: &StaticFiles,
        request: &Request,
        mut response: ResponseWriter,
    ) -> ResponseWriter {
        match statics.serve(&request.path, &mut response) {
            Ok(true) => {}
            Ok(false) => {
                self.report(404, &mut response, "Not Found", &[request.path.clone()]);
            }
            Err(e) => {
                error!(error = %e, path = %request.path, "static file error");
                self.report(500, &mut response, "Internal Server Error", &[]);
            }
        }
        let _ = response.finish();
        response
    }

    fn run_http(&self, mut instance: HandlerInstance, ctx: RequestContext) -> ResponseWriter {
        let method = ctx.request.method.clone();
        let mut proceeded = false;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let web = instance.as_web_mut();
            web.bind(ctx);
            match web.init() {
                Init::Proceed => proceeded = true,
                Init::Handled => return Ok(()),
                Init::Reject { status, reason } => return Err((status, reason)),
            }
            if let HandlerInstance::Http(h) = &mut instance {
                match method.as_str() {
                    "GET" => h.get(),
                    "POST" => h.post(),
                    "PUT" => h.put(),
                    "DELETE" => h.delete(),
                    "PATCH" => h.patch(),
                    "OPTIONS" => h.options(),
                    "TRACE" => h.trace(),
                    // HEAD has always been served by the post hook.
                    // TODO: map HEAD to get and suppress the body; needs a
                    // changelog entry for apps relying on post side effects.
                    "HEAD" => h.post(),
                    _ => {}
                }
            }
            Ok(())
        }));
        // destroy is owed only once init proceeded.
        let destroyed = if proceeded {
            catch_unwind(AssertUnwindSafe(|| instance.as_web_mut().destroy()))
        } else {
            Ok(())
        };
        let mut response = match instance.as_web_mut().unbind() {
            Some(ctx) => ctx.response,
            None => {
                error!("handler dropped its context");
                ResponseWriter::buffer()
            }
        };
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err((status, reason))) => {
                self.report(status, &mut response, &reason, &[]);
            }
            Err(_) => {
                error!("handler panicked");
                self.report(500, &mut response, "Internal Server Error", &[]);
            }
        }
        if destroyed.is_err() {
            error!("destroy hook panicked");
        }
        let _ = response.finish();
        response
    }

    fn run_ws(&self, mut instance: HandlerInstance, ctx: RequestContext) -> ResponseWriter {
        if !ctx.request.is_websocket_upgrade() {
            let mut response = ctx.response;
            self.report(400, &mut response, "WebSocket upgrade required", &[]);
            let _ = response.finish();
            return response;
        }
        let rooms = Arc::clone(&self.rooms);
        let mut proceeded = false;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let web = instance.as_web_mut();
            web.bind(ctx);
            match web.init() {
                Init::Proceed => proceeded = true,
                Init::Handled => return Ok(false),
                Init::Reject { status, reason } => return Err((status, reason)),
            }
            {
                let ctx = web.context_mut();
                match WsConnection::upgrade(&ctx.request, &mut ctx.response, rooms) {
                    Ok(conn) => web.base_mut().ws = Some(conn),
                    Err(e) => return Err((400, e.to_string())),
                }
            }
            match &mut instance {
                HandlerInstance::WsServe(h) => {
                    h.on_connect();
                    h.serve();
                }
                HandlerInstance::WsJson(h) => {
                    h.on_connect();
                    run_json_loop(&mut **h);
                }
                HandlerInstance::WsText(h) => {
                    h.on_connect();
                    run_text_loop(&mut **h);
                }
                _ => {}
            }
            Ok(true)
        }));
        let upgraded = instance.as_web_mut().base().ws.is_some();
        if upgraded {
            // Deferred: fires however the loop ended, panics included, while
            // the connection is still bound.
            if catch_unwind(AssertUnwindSafe(|| run_on_close(&mut instance))).is_err() {
                error!("on_close hook panicked");
            }
        }
        if let Some(mut conn) = instance.as_web_mut().base_mut().ws.take() {
            conn.close();
        }
        let destroyed = if proceeded {
            catch_unwind(AssertUnwindSafe(|| instance.as_web_mut().destroy()))
        } else {
            Ok(())
        };
        let mut response = match instance.as_web_mut().unbind() {
            Some(ctx) => ctx.response,
            None => {
                error!("handler dropped its context");
                ResponseWriter::buffer()
            }
        };
        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err((status, reason))) => {
                self.report(status, &mut response, &reason, &[]);
            }
            Err(_) if upgraded => {
                // The 101 already went out; all we can do is close.
                error!("websocket handler panicked");
            }
            Err(_) => {
                error!("websocket handler panicked before the upgrade");
                self.report(500, &mut response, "Internal Server Error", &[]);
            }
        }
        if destroyed.is_err() {
            error!("destroy hook panicked");
        }
        if !upgraded {
            let _ = response.finish();
        }
        response
    }

    fn report(
        &self,
        status: u16,
        response: &mut ResponseWriter,
        message: &str,
        details: &[String],
    ) {
        if status >= 500 {
            warn!(status, message, "request failed");
        } else {
            debug!(status, message, "request refused");
        }
        if response.committed() {
            return;
        }
        response.set_status(status);
        if let Some(name) = self.error_handler {
            if let Ok(HandlerInstance::ErrorPage(mut h)) = self.pools.checkout(name) {
                let rendered = catch_unwind(AssertUnwindSafe(|| {
                    h.render_error(response, status, message, details);
                }));
                match rendered {
                    Ok(()) if response.committed() => return,
                    Ok(()) => {}
                    Err(_) => error!(handler = name, "error handler panicked"),
                }
            }
        }
        error_page::write_default(response, status, message, details);
    }
}

fn run_json_loop(handler: &mut dyn WsJsonHandler) {
    loop {
        let message = match handler.ws().read() {
            Ok(message) => message,
            Err(_) => break,
        };
        match message {
            Message::Text(text) => match serde_json::from_str(&text) {
                Ok(value) => handler.on_json(value),
                Err(e) => handler.on_error(e),
            },
            Message::Binary(data) => match serde_json::from_slice(&data) {
                Ok(value) => handler.on_json(value),
                Err(e) => handler.on_error(e),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
}

fn run_text_loop(handler: &mut dyn WsTextHandler) {
    loop {
        let message = match handler.ws().read() {
            Ok(message) => message,
            Err(_) => break,
        };
        match message {
            Message::Text(text) => handler.on_message(&text),
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// `on_close` is owed to every upgraded connection, whichever way its
/// serving loop ended.
fn run_on_close(instance: &mut HandlerInstance) {
    match instance {
        HandlerInstance::WsServe(h) => h.on_close(),
        HandlerInstance::WsJson(h) => h.on_close(),
        HandlerInstance::WsText(h) => h.on_close(),
        _ => {}
    }
}
