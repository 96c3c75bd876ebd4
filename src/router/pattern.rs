//! Route pattern parsing and matching.
//!
//! | Pattern                   | Example match            | Captured params         |
//! |---------------------------|--------------------------|-------------------------|
//! | `/users`                  | `/users`                 | *(none)*                |
//! | `/users/{id}`             | `/users/42`              | `id → "42"`             |
//! | `/users/{id:\d+}`         | `/users/42` (not `/users/ada`) | `id → "42"`       |
//! | `/files/{path:.+}`        | `/files/docs/readme.txt` | `path → "docs/readme.txt"` |
//!
//! A bare placeholder matches exactly one segment (`[^/]+`). Trailing slashes are
//! stripped from patterns and paths alike, so `/users/` and `/users` are the same
//! route; the root stays `/`.

use std::collections::HashSet;

use regex::Regex;
use thiserror::Error;

use crate::context::PathParams;

const DEFAULT_CONSTRAINT: &str = "[^/]+";

/// A route pattern that could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid route pattern `{pattern}`: {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: String,
}

impl PatternError {
    fn new(pattern: &str, reason: impl Into<String>) -> Self {
        Self {
            pattern: pattern.to_owned(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Param {
        name: String,
        constraint: Option<String>,
    },
}

/// A compiled route pattern.
#[derive(Debug, Clone)]
pub(crate) struct Pattern {
    source: String,
    pieces: Vec<Piece>,
    // `None` for fully static patterns, which match by string equality.
    regex: Option<Regex>,
}

impl Pattern {
    /// Parses and compiles `source`.
    ///
    /// # Errors
    ///
    /// Unbalanced braces, empty or duplicate parameter names, names with characters
    /// outside `[A-Za-z0-9_]`, and constraints that are not valid regular expressions.
    pub(crate) fn parse(source: &str) -> Result<Self, PatternError> {
        let normalized = normalize_path(source);
        let pieces = tokenize(normalized).map_err(|reason| PatternError::new(source, reason))?;

        let mut seen = HashSet::new();
        for piece in &pieces {
            if let Piece::Param { name, .. } = piece {
                if !seen.insert(name.as_str()) {
                    return Err(PatternError::new(
                        source,
                        format!("parameter `{name}` appears more than once"),
                    ));
                }
            }
        }

        let regex = if seen.is_empty() {
            None
        } else {
            let mut expr = String::from("^");
            for piece in &pieces {
                match piece {
                    Piece::Literal(text) => expr.push_str(&regex::escape(text)),
                    Piece::Param { name, constraint } => {
                        let constraint = constraint.as_deref().unwrap_or(DEFAULT_CONSTRAINT);
                        expr.push_str(&format!("(?P<{name}>{constraint})"));
                    }
                }
            }
            expr.push('$');
            Some(Regex::new(&expr).map_err(|e| PatternError::new(source, e.to_string()))?)
        };

        Ok(Self {
            source: normalized.to_owned(),
            pieces,
            regex,
        })
    }

    /// The normalized pattern text.
    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn is_static(&self) -> bool {
        self.regex.is_none()
    }

    /// Matches `path`, returning the captured parameters on success.
    pub(crate) fn matches(&self, path: &str) -> Option<PathParams> {
        let path = normalize_path(path);
        match &self.regex {
            None => (self.source == path).then(PathParams::new),
            Some(regex) => {
                let captures = regex.captures(path)?;
                Some(
                    self.param_names()
                        .filter_map(|name| {
                            captures
                                .name(name)
                                .map(|value| (name.to_owned(), value.as_str().to_owned()))
                        })
                        .collect(),
                )
            }
        }
    }

    pub(crate) fn param_names(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|piece| match piece {
            Piece::Param { name, .. } => Some(name.as_str()),
            Piece::Literal(_) => None,
        })
    }

    /// Substitutes `lookup(name)` for every placeholder. Returns the name of the
    /// first parameter `lookup` cannot supply.
    pub(crate) fn build<'a, F>(&'a self, lookup: F) -> Result<String, &'a str>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut out = String::with_capacity(self.source.len());
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Param { name, .. } => out.push_str(&lookup(name).ok_or(name.as_str())?),
            }
        }
        Ok(out)
    }
}

/// Strips trailing slashes, keeping a lone `/` for the root.
pub(crate) fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

fn tokenize(source: &str) -> Result<Vec<Piece>, String> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut chars = source.char_indices();

    while let Some((start, c)) = chars.next() {
        match c {
            '{' => {
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                // Constraints may carry their own braces (`\d{4}`), so track depth.
                let mut depth = 1;
                let mut end = None;
                for (i, c) in chars.by_ref() {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                end = Some(i);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let end = end.ok_or_else(|| format!("unclosed `{{` at offset {start}"))?;
                pieces.push(parse_placeholder(&source[start + 1..end])?);
            }
            '}' => return Err(format!("unmatched `}}` at offset {start}")),
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(pieces)
}

fn parse_placeholder(inner: &str) -> Result<Piece, String> {
    let (name, constraint) = match inner.split_once(':') {
        Some((name, constraint)) => (name.trim(), Some(constraint.trim())),
        None => (inner.trim(), None),
    };

    if name.is_empty() {
        return Err("placeholder without a name".to_owned());
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("parameter name `{name}` must be alphanumeric"));
    }
    if constraint.is_some_and(str::is_empty) {
        return Err(format!("parameter `{name}` has an empty constraint"));
    }

    Ok(Piece::Param {
        name: name.to_owned(),
        constraint: constraint.map(str::to_owned),
    })
}
