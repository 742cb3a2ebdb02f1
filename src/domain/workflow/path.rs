//! Dot/bracket value paths shared by templates and expressions
//!
//! A path starts with one of the context roots (`input`, `steps`, `context`)
//! followed by `.name` member accesses and `[k]` array indexes, e.g.
//! `steps.retrieve.output.results[0].text`.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use super::context::TemplateContext;

/// Names a path may start with
pub const ROOTS: [&str; 3] = ["input", "steps", "context"];

/// Errors produced while parsing or walking a path
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PathError {
    #[error("Path is empty")]
    Empty,

    #[error("Unknown root '{0}': expected one of input, steps, context")]
    UnknownRoot(String),

    #[error("Invalid path '{path}': {message}")]
    Syntax { path: String, message: String },

    #[error("Cannot read property '{segment}' of a non-object in '{path}'")]
    NotAnObject { path: String, segment: String },

    #[error("Cannot index [{index}] into a non-array in '{path}'")]
    NotAnArray { path: String, index: usize },
}

/// One step of a path walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed, validated value path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuePath {
    raw: String,
    root: String,
    segments: Vec<PathSegment>,
}

fn is_name_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '.' | '[' | ']')
}

impl ValuePath {
    /// Parse a path string (surrounding whitespace is ignored)
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(PathError::Empty);
        }

        let syntax = |message: &str| PathError::Syntax {
            path: raw.to_string(),
            message: message.to_string(),
        };

        let chars: Vec<char> = raw.chars().collect();
        let mut pos = 0;

        while pos < chars.len() && is_name_char(chars[pos]) {
            pos += 1;
        }
        let root: String = chars[..pos].iter().collect();
        if root.is_empty() {
            return Err(syntax("path must start with a root name"));
        }
        if !ROOTS.contains(&root.as_str()) {
            return Err(PathError::UnknownRoot(root));
        }

        let mut segments = Vec::new();
        while pos < chars.len() {
            match chars[pos] {
                '.' => {
                    pos += 1;
                    let start = pos;
                    while pos < chars.len() && is_name_char(chars[pos]) {
                        pos += 1;
                    }
                    if start == pos {
                        return Err(syntax("expected a property name after '.'"));
                    }
                    segments.push(PathSegment::Key(chars[start..pos].iter().collect()));
                }
                '[' => {
                    pos += 1;
                    let start = pos;
                    while pos < chars.len() && chars[pos].is_ascii_digit() {
                        pos += 1;
                    }
                    if start == pos || pos >= chars.len() || chars[pos] != ']' {
                        return Err(syntax("expected a non-negative integer index in '[...]'"));
                    }
                    let digits: String = chars[start..pos].iter().collect();
                    let index = digits
                        .parse::<usize>()
                        .map_err(|_| syntax("array index out of range"))?;
                    segments.push(PathSegment::Index(index));
                    pos += 1;
                }
                c => {
                    return Err(syntax(&format!("unexpected character '{}'", c)));
                }
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            root,
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Walk the path against a context
    ///
    /// Returns `Ok(None)` when the final key or index is absent (undefined),
    /// and an error when a step of the walk hits a value of the wrong shape.
    pub fn resolve<'a>(
        &self,
        context: &'a TemplateContext,
    ) -> Result<Option<&'a Value>, PathError> {
        let mut current = context.root(&self.root);

        for segment in &self.segments {
            current = match (segment, current) {
                (PathSegment::Key(key), Some(Value::Object(map))) => map.get(key),
                (PathSegment::Key(key), _) => {
                    return Err(PathError::NotAnObject {
                        path: self.raw.clone(),
                        segment: key.clone(),
                    });
                }
                (PathSegment::Index(index), Some(Value::Array(items))) => items.get(*index),
                (PathSegment::Index(index), _) => {
                    return Err(PathError::NotAnArray {
                        path: self.raw.clone(),
                        index: *index,
                    });
                }
            };
        }

        Ok(current)
    }
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
