//! Static file serving.
//!
//! A configured directory is exposed under `/<basename>/...`, checked
//! before routing so a static prefix cannot be shadowed by a route. Path
//! traversal is neutralized by rejecting any component that is not a plain
//! name; a traversal attempt looks like a missing file to the client.

use crate::error::Result;
use crate::server::ResponseWriter;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub struct StaticFiles {
    root: PathBuf,
    prefix: String,
}

impl StaticFiles {
    /// Serve `dir` under `/<basename of dir>/`.
    #[must_use]
    pub fn new(dir: &str) -> Self {
        let root = PathBuf::from(dir);
        let basename = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "static".to_string());
        StaticFiles {
            prefix: format!("/{basename}/"),
            root,
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    /// Write the file for `path` to the response. Returns `false` when the
    /// path does not map to a readable file under the root.
    pub fn serve(&self, path: &str, response: &mut ResponseWriter) -> Result<bool> {
        let Some(rel) = path.strip_prefix(&self.prefix) else {
            return Ok(false);
        };
        let Some(full) = self.map_path(rel) else {
            debug!(path, "rejected static path");
            return Ok(false);
        };
        let Ok(contents) = std::fs::read(&full) else {
            return Ok(false);
        };
        response.set_header("Content-Type", content_type(&full));
        response.write_all(&contents)?;
        Ok(true)
    }

    fn map_path(&self, rel: &str) -> Option<PathBuf> {
        let rel = Path::new(rel);
        let mut full = self.root.clone();
        for component in rel.components() {
            match component {
                Component::Normal(part) => full.push(part),
                // "." segments, "..", drive prefixes, absolute roots
                _ => return None,
            }
        }
        if full.is_file() {
            Some(full)
        } else {
            None
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, StaticFiles) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("assets");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("app.css"), b"body{}").unwrap();
        let statics = StaticFiles::new(root.to_str().unwrap());
        (dir, statics)
    }

    #[test]
    fn serves_file_under_prefix() {
        let (_dir, statics) = fixture();
        assert_eq!(statics.prefix(), "/assets/");
        let mut response = ResponseWriter::buffer();
        assert!(statics.serve("/assets/app.css", &mut response).unwrap());
        let out = String::from_utf8(response.buffered().unwrap().to_vec()).unwrap();
        assert!(out.contains("Content-Type: text/css"));
        assert!(out.ends_with("body{}"));
    }

    #[test]
    fn missing_file_is_not_served() {
        let (_dir, statics) = fixture();
        let mut response = ResponseWriter::buffer();
        assert!(!statics.serve("/assets/nope.css", &mut response).unwrap());
    }

    #[test]
    fn traversal_is_rejected() {
        let (dir, statics) = fixture();
        std::fs::write(dir.path().join("secret.txt"), b"no").unwrap();
        let mut response = ResponseWriter::buffer();
        assert!(!statics
            .serve("/assets/../secret.txt", &mut response)
            .unwrap());
    }
}
