//! Session storage.
//!
//! The store is keyed by a session id carried in a cookie. The id is only
//! minted on the first write, so purely read-only traffic never sets a
//! cookie.

use crate::handler::RequestContext;
use dashmap::DashMap;
use std::collections::HashMap;
use ulid::Ulid;

pub trait SessionStore: Send + Sync {
    /// One-time setup, called when the store is attached to an application.
    fn init(&self) {}
    fn get(&self, ctx: &RequestContext, key: &str) -> Option<serde_json::Value>;
    fn set(&self, ctx: &mut RequestContext, key: &str, value: serde_json::Value);
    fn remove(&self, ctx: &mut RequestContext, key: &str);
    /// Discard the whole session and expire its cookie.
    fn clean(&self, ctx: &mut RequestContext);
}

/// In-process session store. Sessions live as long as the process; there
/// is no persistence and no expiry sweep.
pub struct MemorySessionStore {
    cookie_name: String,
    sessions: DashMap<String, HashMap<String, serde_json::Value>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(cookie_name: impl Into<String>) -> Self {
        MemorySessionStore {
            cookie_name: cookie_name.into(),
            sessions: DashMap::new(),
        }
    }

    /// Session id already attached to the request, if any.
    pub(crate) fn request_session_id(&self, ctx: &RequestContext) -> Option<String> {
        ctx.session_id
            .clone()
            .or_else(|| ctx.request.cookie(&self.cookie_name).map(str::to_string))
    }

    fn ensure_session_id(&self, ctx: &mut RequestContext) -> String {
        if let Some(id) = self.request_session_id(ctx) {
            ctx.session_id = Some(id.clone());
            return id;
        }
        let id = Ulid::new().to_string();
        ctx.response.add_header(
            "Set-Cookie",
            &format!("{}={id}; Path=/; HttpOnly", self.cookie_name),
        );
        ctx.session_id = Some(id.clone());
        id
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, ctx: &RequestContext, key: &str) -> Option<serde_json::Value> {
        let id = self.request_session_id(ctx)?;
        self.sessions.get(&id)?.get(key).cloned()
    }

    fn set(&self, ctx: &mut RequestContext, key: &str, value: serde_json::Value) {
        let id = self.ensure_session_id(ctx);
        self.sessions
            .entry(id)
            .or_default()
            .insert(key.to_string(), value);
    }

    fn remove(&self, ctx: &mut RequestContext, key: &str) {
        let Some(id) = self.request_session_id(ctx) else {
            return;
        };
        if let Some(mut session) = self.sessions.get_mut(&id) {
            session.remove(key);
        }
    }

    fn clean(&self, ctx: &mut RequestContext) {
        if let Some(id) = self.request_session_id(ctx) {
            self.sessions.remove(&id);
        }
        if ctx.session_id.take().is_some() || ctx.request.cookie(&self.cookie_name).is_some() {
            ctx.response.add_header(
                "Set-Cookie",
                &format!("{}=; Path=/; Max-Age=0", self.cookie_name),
            );
        }
    }
}
