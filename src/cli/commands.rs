use super::cli::{Cli, Commands, HandlerKindArg};
use crate::config::Config;
use crate::template::render_str;
use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::info;

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::New { name, dir } => new_app(&name, &dir),
        Commands::Handler { name, kind, out } => new_handler(&name, kind, out.as_deref()),
        Commands::CheckConfig { path } => check_config(&path),
    }
}

fn new_app(name: &str, parent: &Path) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        bail!("application name must be alphanumeric, `-` or `_`");
    }
    let root = parent.join(name);
    if root.exists() {
        bail!("{} already exists", root.display());
    }
    let ctx = serde_json::json!({ "name": name });
    std::fs::create_dir_all(root.join("src"))?;
    std::fs::create_dir_all(root.join("templates"))?;
    std::fs::create_dir_all(root.join("static"))?;
    write_rendered(&root.join("Cargo.toml"), CARGO_TOML, &ctx)?;
    write_rendered(&root.join("config.yaml"), CONFIG_YAML, &ctx)?;
    write_rendered(&root.join("src/main.rs"), MAIN_RS, &ctx)?;
    write_rendered(&root.join("templates/index.html"), INDEX_HTML, &ctx)?;
    std::fs::write(root.join("static/style.css"), "body { font-family: sans-serif; }\n")?;
    info!(app = name, dir = %root.display(), "application scaffolded");
    println!("created {}", root.display());
    Ok(())
}

fn new_handler(name: &str, kind: HandlerKindArg, out: Option<&Path>) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("handler name must be a valid Rust identifier");
    }
    let template = match kind {
        HandlerKindArg::Http => HTTP_HANDLER,
        HandlerKindArg::WsServe => WS_SERVE_HANDLER,
        HandlerKindArg::WsJson => WS_JSON_HANDLER,
        HandlerKindArg::WsText => WS_TEXT_HANDLER,
        HandlerKindArg::Error => ERROR_HANDLER,
    };
    let code = render_str(template, serde_json::json!({ "name": name }))?;
    match out {
        Some(path) => {
            std::fs::write(path, code)
                .with_context(|| format!("cannot write {}", path.display()))?;
            println!("wrote {}", path.display());
        }
        None => print!("{code}"),
    }
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = Config::from_file(path)
        .with_context(|| format!("invalid configuration {}", path.display()))?;
    println!(
        "{}: ok (listen {}, {} route(s), handler cache {})",
        path.display(),
        config.listen,
        config.routes.len(),
        config.handler_cache,
    );
    Ok(())
}

fn write_rendered(path: &Path, template: &str, ctx: &serde_json::Value) -> Result<()> {
    let content = render_str(template, ctx)?;
    std::fs::write(path, content).with_context(|| format!("cannot write {}", path.display()))?;
    Ok(())
}

const CARGO_TOML: &str = r#"[package]
name = "{{ name }}"
version = "0.1.0"
edition = "2021"

[dependencies]
grackle = "0.3"
serde_json = "1.0"
tracing = "0.1"
tracing-subscriber = { version = "0.3", features = ["env-filter"] }
"#;

const CONFIG_YAML: &str = r#"listen: "127.0.0.1:8000"
handler_cache: 5
static_dir: ./static
template:
  dir: ./templates
session:
  name: {{ name }}-session
routes:
  /:
    handler: IndexHandler
    alias: index
"#;

const MAIN_RS: &str = r#"use grackle::{handler, App, BaseHandler, Config, HttpHandler, WebHandler};

#[derive(Default)]
struct IndexHandler {
    base: BaseHandler,
}

impl WebHandler for IndexHandler {
    fn base(&self) -> &BaseHandler {
        &self.base
    }
    fn base_mut(&mut self) -> &mut BaseHandler {
        &mut self.base
    }
}

impl HttpHandler for IndexHandler {
    fn get(&mut self) {
        if let Err(e) = self.render("index.html", &serde_json::json!({})) {
            tracing::error!(error = %e, "render failed");
            self.status(500);
        }
    }
}

fn main() -> grackle::Result<()> {
    tracing_subscriber::fmt().init();
    let mut app = App::new(Config::from_file("config.yaml")?);
    app.handler(handler::http::<IndexHandler>())?;
    app.bind_config_routes()?;
    let server = app.serve(None)?;
    server.join();
    Ok(())
}
"#;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>{{ name }}</title>
  <link rel="stylesheet" href="/static/style.css">
</head>
<body>
  <h1>{{ name }}</h1>
  <p>It works.</p>
</body>
</html>
"#;

const HTTP_HANDLER: &str = r#"use grackle::{BaseHandler, HttpHandler, WebHandler};

#[derive(Default)]
pub struct {{ name }} {
    base: BaseHandler,
}

impl WebHandler for {{ name }} {
    fn base(&self) -> &BaseHandler {
        &self.base
    }
    fn base_mut(&mut self) -> &mut BaseHandler {
        &mut self.base
    }
}

impl HttpHandler for {{ name }} {
    fn get(&mut self) {
        self.write_string("{{ name }}");
    }
}
"#;

const WS_SERVE_HANDLER: &str = r#"use grackle::{BaseHandler, Message, WebHandler, WsServeHandler};

#[derive(Default)]
pub struct {{ name }} {
    base: BaseHandler,
}

impl WebHandler for {{ name }} {
    fn base(&self) -> &BaseHandler {
        &self.base
    }
    fn base_mut(&mut self) -> &mut BaseHandler {
        &mut self.base
    }
}

impl WsServeHandler for {{ name }} {
    fn serve(&mut self) {
        while let Ok(message) = self.ws().read() {
            match message {
                Message::Text(text) => {
                    let _ = self.ws().send_text(text);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    }
}
"#;

const WS_JSON_HANDLER: &str = r#"use grackle::{BaseHandler, WebHandler, WsJsonHandler};

#[derive(Default)]
pub struct {{ name }} {
    base: BaseHandler,
}

impl WebHandler for {{ name }} {
    fn base(&self) -> &BaseHandler {
        &self.base
    }
    fn base_mut(&mut self) -> &mut BaseHandler {
        &mut self.base
    }
}

impl WsJsonHandler for {{ name }} {
    fn on_json(&mut self, value: serde_json::Value) {
        let _ = self.ws().send_json(&value);
    }
}
"#;

const WS_TEXT_HANDLER: &str = r#"use grackle::{BaseHandler, WebHandler, WsTextHandler};

#[derive(Default)]
pub struct {{ name }} {
    base: BaseHandler,
}

impl WebHandler for {{ name }} {
    fn base(&self) -> &BaseHandler {
        &self.base
    }
    fn base_mut(&mut self) -> &mut BaseHandler {
        &mut self.base
    }
}

impl WsTextHandler for {{ name }} {
    fn on_message(&mut self, message: &str) {
        let _ = self.ws().send_text(message);
    }
}
"#;

const ERROR_HANDLER: &str = r#"use grackle::{BaseHandler, ErrorHandler, ResponseWriter, WebHandler};
use std::io::Write;

#[derive(Default)]
pub struct {{ name }} {
    base: BaseHandler,
}

impl WebHandler for {{ name }} {
    fn base(&self) -> &BaseHandler {
        &self.base
    }
    fn base_mut(&mut self) -> &mut BaseHandler {
        &mut self.base
    }
}

impl ErrorHandler for {{ name }} {
    fn render_error(
        &mut self,
        response: &mut ResponseWriter,
        status: u16,
        message: &str,
        _details: &[String],
    ) {
        let _ = write!(response, "<h1>{status}</h1><p>{message}</p>");
    }
}
"#;
