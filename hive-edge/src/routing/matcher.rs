//! Path glob compilation
//!
//! Route predicates use globs where `**` matches any number of path
//! segments and `*` matches exactly one. Globs compile once, at table
//! build time, into anchored regexes.

use regex::Regex;

use crate::error::{Error, Result};

/// Compile a path glob into an anchored regex
pub fn compile_glob(pattern: &str) -> Result<Regex> {
    if !pattern.starts_with('/') {
        return Err(Error::Config(Box::new(figment::Error::from(format!(
            "Route path pattern must start with '/': {}",
            pattern
        )))));
    }

    let mut regex_str = String::from("^");

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    // ** matches any number of path segments
                    chars.next();
                    regex_str.push_str(".*");
                } else {
                    // * matches a single path segment (no slashes)
                    regex_str.push_str("[^/]+");
                }
            }
            '{' => {
                // {id} placeholder matches a single segment
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                }
                regex_str.push_str("[^/]+");
            }
            '.' | '+' | '?' | '(' | ')' | '[' | ']' | '^' | '$' | '|' | '\\' => {
                regex_str.push('\\');
                regex_str.push(c);
            }
            _ => regex_str.push(c),
        }
    }

    regex_str.push('$');

    Regex::new(&regex_str).map_err(|e| {
        Error::Config(Box::new(figment::Error::from(format!(
            "Invalid route path pattern '{}': {}",
            pattern, e
        ))))
    })
}

/// A set of compiled public-path globs
#[derive(Debug, Clone, Default)]
pub struct PathSet {
    patterns: Vec<Regex>,
}

impl PathSet {
    pub fn compile(globs: &[String]) -> Result<Self> {
        let patterns = globs
            .iter()
            .map(|g| compile_glob(g))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(path))
    }
}
