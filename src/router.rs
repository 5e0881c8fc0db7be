//! URL pattern compilation and best-route resolution.
//!
//! Patterns are plain paths with `{name}` variable segments, e.g.
//! `/user/{id}/posts`. Each pattern compiles to an anchored regex once at
//! registration time; resolution walks the table in registration order and
//! keeps the highest-scoring match.
//!
//! The score of a match is the number of `/`-separated segments in the
//! request path plus the number of variables the route captured. A route
//! only replaces the current winner with a strictly greater score, so ties
//! go to the earlier-registered route.

use crate::error::{Error, Result};
use regex::Regex;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

/// Captured route variables, name/value pairs in pattern order.
pub type VarVec = SmallVec<[(String, String); 8]>;

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Var(String),
}

/// A single compiled route entry.
#[derive(Debug)]
pub struct CompiledRoute {
    pattern: String,
    regex: Regex,
    segments: Vec<Segment>,
    var_names: Vec<String>,
    handler: String,
    alias: Option<String>,
}

/// Cheap, shareable reference to a compiled route. Handed to handlers so
/// they can ask "which route matched" and build reverse URLs.
#[derive(Debug, Clone)]
pub struct RouteHandle(Arc<CompiledRoute>);

impl RouteHandle {
    /// The pattern as registered, e.g. `/user/{id}`.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.0.pattern
    }

    /// Registered handler type name this route dispatches to.
    #[must_use]
    pub fn handler(&self) -> &str {
        &self.0.handler
    }

    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        self.0.alias.as_deref()
    }

    /// Build a concrete URL by substituting the route's variables.
    ///
    /// Every `{name}` in the pattern must be present in `vars`; extra
    /// entries are ignored.
    pub fn url(&self, vars: &[(&str, &str)]) -> Result<String> {
        let mut out = String::with_capacity(self.0.pattern.len());
        for segment in &self.0.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(name) => {
                    let value = vars
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| *v)
                        .ok_or_else(|| Error::MissingRouteVar(name.clone()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub route: RouteHandle,
    pub vars: VarVec,
    pub score: usize,
}

/// Ordered collection of compiled routes.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<RouteHandle>,
    aliases: HashMap<String, Vec<usize>>,
    strict_slash: bool,
}

impl RouteTable {
    #[must_use]
    pub fn new(strict_slash: bool) -> Self {
        RouteTable {
            routes: Vec::new(),
            aliases: HashMap::new(),
            strict_slash,
        }
    }

    /// Register a pattern bound to a handler type name, with an optional
    /// alias for reverse lookups. Patterns are kept in registration order;
    /// several routes may share one alias, and reverse lookups use the
    /// first of them.
    pub fn add(
        &mut self,
        pattern: &str,
        handler: impl Into<String>,
        alias: Option<String>,
    ) -> Result<RouteHandle> {
        let route = Arc::new(compile(pattern, handler.into(), alias)?);
        let handle = RouteHandle(route);
        if let Some(alias) = handle.alias() {
            self.aliases
                .entry(alias.to_string())
                .or_default()
                .push(self.routes.len());
        }
        self.routes.push(handle.clone());
        Ok(handle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Look a route up by its alias. When several routes share the alias,
    /// the earliest-registered one is returned.
    pub fn by_alias(&self, alias: &str) -> Result<RouteHandle> {
        self.aliases
            .get(alias)
            .and_then(|ids| ids.first())
            .map(|&i| self.routes[i].clone())
            .ok_or_else(|| Error::UnknownRoute(alias.to_string()))
    }

    /// Every route registered under an alias, in registration order.
    #[must_use]
    pub fn by_alias_all(&self, alias: &str) -> Vec<RouteHandle> {
        self.aliases
            .get(alias)
            .map(|ids| ids.iter().map(|&i| self.routes[i].clone()).collect())
            .unwrap_or_default()
    }

    /// All registered routes in registration order.
    #[must_use]
    pub fn routes(&self) -> &[RouteHandle] {
        &self.routes
    }

    /// Find the best route for a request path.
    ///
    /// Returns `None` when no pattern matches at all.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<Resolution> {
        let path = self.normalize(path);
        let path_segments = path.split('/').filter(|s| !s.is_empty()).count();
        let mut best: Option<Resolution> = None;
        for handle in &self.routes {
            let route = &handle.0;
            let Some(captures) = route.regex.captures(path) else {
                continue;
            };
            let mut vars = VarVec::new();
            for name in &route.var_names {
                if let Some(m) = captures.name(name) {
                    vars.push((name.clone(), m.as_str().to_string()));
                }
            }
            let score = path_segments + vars.len();
            let replace = match &best {
                Some(current) => score > current.score,
                None => true,
            };
            if replace {
                best = Some(Resolution {
                    route: handle.clone(),
                    vars,
                    score,
                });
            }
        }
        best
    }

    fn normalize<'a>(&self, path: &'a str) -> &'a str {
        if self.strict_slash && path.len() > 1 {
            path.strip_suffix('/').unwrap_or(path)
        } else {
            path
        }
    }
}

fn compile(pattern: &str, handler: String, alias: Option<String>) -> Result<CompiledRoute> {
    if !pattern.starts_with('/') {
        return Err(Error::RoutePattern {
            pattern: pattern.to_string(),
            reason: "pattern must start with `/`".to_string(),
        });
    }
    let mut regex_src = String::from("^");
    let mut segments = Vec::new();
    let mut var_names: Vec<String> = Vec::new();
    let mut literal = String::new();
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        let (before, after_open) = rest.split_at(open);
        literal.push_str(before);
        let Some(close) = after_open.find('}') else {
            return Err(Error::RoutePattern {
                pattern: pattern.to_string(),
                reason: "unclosed `{` in pattern".to_string(),
            });
        };
        let name = &after_open[1..close];
        if name.is_empty() || !is_valid_var_name(name) {
            return Err(Error::RoutePattern {
                pattern: pattern.to_string(),
                reason: format!("invalid variable name `{name}`"),
            });
        }
        if var_names.iter().any(|n| n == name) {
            return Err(Error::RoutePattern {
                pattern: pattern.to_string(),
                reason: format!("duplicate variable `{name}`"),
            });
        }
        if !literal.is_empty() {
            regex_src.push_str(&regex::escape(&literal));
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        regex_src.push_str(&format!("(?P<{name}>[^/]+)"));
        segments.push(Segment::Var(name.to_string()));
        var_names.push(name.to_string());
        rest = &after_open[close + 1..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        regex_src.push_str(&regex::escape(&literal));
        segments.push(Segment::Literal(literal));
    }
    regex_src.push('$');
    let regex = Regex::new(&regex_src).map_err(|e| Error::RoutePattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;
    Ok(CompiledRoute {
        pattern: pattern.to_string(),
        regex,
        segments,
        var_names,
        handler,
        alias,
    })
}

fn is_valid_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
