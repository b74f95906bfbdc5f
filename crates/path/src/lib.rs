//! kwait path: relaxed JSONPath lookups against live objects.
//!
//! Accepts the subset of kubectl-style JSONPath that wait conditions use in
//! practice: `{.status.readyReplicas}`, `$.status.conditions[0].type`,
//! `status.conditions[-1].status`, `metadata.labels['app.kubernetes.io/name']`.
//! Lookups never fail on document shape: anything missing is simply "not found".

#![forbid(unsafe_code)]

use std::fmt;

use serde_json::Value as Json;
use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("empty path")]
    Empty,
    #[error("empty segment at offset {0}")]
    EmptySegment(usize),
    #[error("unbalanced `{0}`")]
    Unbalanced(char),
    #[error("unexpected character at offset {0}")]
    Unexpected(usize),
    #[error("invalid array index `{0}`")]
    InvalidIndex(String),
    #[error("unsupported expression `{0}` (only member and index access are allowed)")]
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    /// Negative indices count from the end of the array.
    Index(isize),
}

/// A parsed field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: SmallVec<[Segment; 8]>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let mut s = raw.trim();
        if let Some(inner) = s.strip_prefix('{') {
            s = inner.strip_suffix('}').ok_or(PathError::Unbalanced('{'))?.trim();
        }
        s = s.strip_prefix('$').unwrap_or(s);
        if s.is_empty() {
            return Err(PathError::Empty);
        }

        let bytes = s.as_bytes();
        let mut segments: SmallVec<[Segment; 8]> = SmallVec::new();
        let mut i = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'.' => {
                    i += 1;
                    if bytes.get(i) == Some(&b'.') {
                        return Err(PathError::Unsupported("..".into()));
                    }
                    let (name, next) = read_name(s, i)?;
                    segments.push(Segment::Field(name.to_string()));
                    i = next;
                }
                b'[' => {
                    let (seg, next) = read_bracket(s, i)?;
                    segments.push(seg);
                    i = next;
                }
                _ if i == 0 => {
                    let (name, next) = read_name(s, i)?;
                    segments.push(Segment::Field(name.to_string()));
                    i = next;
                }
                _ => return Err(PathError::Unexpected(i)),
            }
        }
        Ok(Self { segments })
    }

    /// Walk the document. `None` whenever a segment is absent or has the wrong shape.
    pub fn resolve<'a>(&self, root: &'a Json) -> Option<&'a Json> {
        let mut cur = root;
        for seg in self.segments.iter() {
            cur = match seg {
                Segment::Field(name) => cur.as_object()?.get(name)?,
                Segment::Index(idx) => {
                    let arr = cur.as_array()?;
                    let pos = if *idx < 0 { arr.len().checked_sub(idx.unsigned_abs())? } else { *idx as usize };
                    arr.get(pos)?
                }
            };
        }
        Some(cur)
    }

    /// Resolve and render the value as a comparable string.
    pub fn lookup(&self, root: &Json) -> Option<String> {
        self.resolve(root).map(render)
    }
}

impl std::str::FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                Segment::Field(name) if needs_quotes(name) => write!(f, "['{}']", name)?,
                Segment::Field(name) if i == 0 => f.write_str(name)?,
                Segment::Field(name) => write!(f, ".{}", name)?,
                Segment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

/// Resolve `path` against `live`. Unparsable paths are treated as not found.
pub fn evaluate(live: &Json, path: &str) -> Option<String> {
    FieldPath::parse(path).ok()?.lookup(live)
}

/// Strings verbatim, scalars as JSON text, `null` as empty, containers as compact JSON.
pub fn render(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

fn needs_quotes(name: &str) -> bool {
    name.contains(['.', '[', ']'])
}

fn read_name(s: &str, start: usize) -> Result<(&str, usize), PathError> {
    let bytes = s.as_bytes();
    let mut end = start;
    while end < bytes.len() && bytes[end] != b'.' && bytes[end] != b'[' {
        if bytes[end] == b']' {
            return Err(PathError::Unbalanced(']'));
        }
        end += 1;
    }
    let name = &s[start..end];
    if name.is_empty() {
        return Err(PathError::EmptySegment(start));
    }
    if name == "*" {
        return Err(PathError::Unsupported("*".into()));
    }
    Ok((name, end))
}

fn read_bracket(s: &str, open: usize) -> Result<(Segment, usize), PathError> {
    let body = &s[open + 1..];
    let trimmed = body.trim_start();
    if let Some(quote) = trimmed.chars().next().filter(|c| *c == '\'' || *c == '"') {
        let rest = &trimmed[1..];
        let close_quote = rest.find(quote).ok_or(PathError::Unbalanced(quote))?;
        let name = &rest[..close_quote];
        let after = rest[close_quote + 1..].trim_start();
        if !after.starts_with(']') {
            return Err(PathError::Unbalanced('['));
        }
        if name.is_empty() {
            return Err(PathError::EmptySegment(open + 1));
        }
        // `after` is a suffix of `s` starting at the closing bracket
        let close = s.len() - after.len();
        return Ok((Segment::Field(name.to_string()), close + 1));
    }

    let close = body.find(']').ok_or(PathError::Unbalanced('['))?;
    let inner = body[..close].trim();
    if inner.is_empty() {
        return Err(PathError::EmptySegment(open + 1));
    }
    if inner == "*" || inner.contains(':') || inner.starts_with('?') || inner.contains(',') {
        return Err(PathError::Unsupported(inner.to_string()));
    }
    let idx: isize = inner.parse().map_err(|_| PathError::InvalidIndex(inner.to_string()))?;
    Ok((Segment::Index(idx), open + 1 + close + 1))
}
