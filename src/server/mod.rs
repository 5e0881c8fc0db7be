//! Minimal HTTP/1.1 server over may coroutines.
//!
//! The framework owns the raw `TcpStream` for each connection so handlers
//! can take it over for WebSocket upgrades. Keep-alive is intentionally not
//! supported: every response carries `Connection: close` and bodies are
//! close-delimited.

mod http_server;
pub mod request;
pub mod response;

pub use http_server::{start, ServerHandle};
pub use request::Request;
pub use response::ResponseWriter;
