//! Template rendering.
//!
//! The engine is a trait so applications can plug in something other than
//! the built-in minijinja backend; kept deliberately small, render-to-sink
//! is all the dispatcher needs.

use crate::error::Result;
use minijinja::Environment;
use serde::Serialize;
use std::io::Write;

pub trait TemplateEngine: Send + Sync {
    /// Render `name` with `ctx` into the sink.
    fn render(&self, out: &mut dyn Write, name: &str, ctx: &serde_json::Value) -> Result<()>;
}

/// File-based minijinja engine. Templates live under a directory and can
/// extend and include each other.
pub struct JinjaEngine {
    env: Environment<'static>,
}

impl JinjaEngine {
    #[must_use]
    pub fn new(dir: &str) -> Self {
        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(dir));
        JinjaEngine { env }
    }
}

impl TemplateEngine for JinjaEngine {
    fn render(&self, out: &mut dyn Write, name: &str, ctx: &serde_json::Value) -> Result<()> {
        let template = self.env.get_template(name)?;
        let rendered = template.render(ctx)?;
        out.write_all(rendered.as_bytes())?;
        Ok(())
    }
}

/// Render a template from a string, used by the scaffolding commands.
pub(crate) fn render_str<S: Serialize>(source: &str, ctx: S) -> Result<String> {
    let env = Environment::new();
    Ok(env.render_str(source, ctx)?)
}
