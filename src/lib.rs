//! Grackle is a handler-oriented web framework.
//!
//! Requests are served by handler *types*: each type gets a pool of
//! pre-built instances, a route dispatches to the best-matching pattern,
//! and every request runs one instance through `init`, the verb or
//! WebSocket hooks, and `destroy`. Handlers are plain structs embedding a
//! [`BaseHandler`]; no global registries, no reflection.
//!
//! ```no_run
//! use grackle::{handler, App, BaseHandler, Config, HttpHandler, WebHandler};
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
//!
//! fn main() -> grackle::Result<()> {
//!     let mut app = App::new(Config::default());
//!     app.route("/", handler::http::<HelloHandler>())?;
//!     let server = app.serve(None)?;
//!     server.join();
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
mod error_page;
pub mod handler;
pub mod ids;
pub mod pool;
pub mod router;
pub mod runtime;
pub mod server;
pub mod session;
pub mod static_files;
pub mod template;
pub mod ws;

pub use app::App;
pub use config::Config;
pub use error::{Error, Result};
pub use handler::{
    BaseHandler, ErrorHandler, HandlerInstance, HandlerKind, HttpHandler, Init, Registration,
    RequestContext, WebHandler, WsJsonHandler, WsServeHandler, WsTextHandler,
};
pub use ids::RequestId;
pub use pool::{HandlerPool, PoolRegistry};
pub use router::{Resolution, RouteHandle, RouteTable};
pub use runtime::RuntimeConfig;
pub use server::{Request, ResponseWriter, ServerHandle};
pub use session::{MemorySessionStore, SessionStore};
pub use static_files::StaticFiles;
pub use template::{JinjaEngine, TemplateEngine};
pub use ws::{Message, WsConnection};
