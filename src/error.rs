//! Crate-wide error type.
//!
//! Registration-time problems (bad patterns, unknown handler names) are
//! surfaced here so misconfiguration fails before the server starts serving.
//! Request-time failures are funneled through the application's error
//! reporter instead and never unwind past the connection coroutine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid route pattern `{pattern}`: {reason}")]
    RoutePattern { pattern: String, reason: String },

    #[error("no route named `{0}`")]
    UnknownRoute(String),

    #[error("missing value for route variable `{0}`")]
    MissingRouteVar(String),

    #[error("unknown handler type `{0}` (register it before binding routes)")]
    UnknownHandler(String),

    #[error("handler pool is closed")]
    PoolClosed,

    #[error("websocket upgrade rejected: {0}")]
    UpgradeRejected(String),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("websocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
