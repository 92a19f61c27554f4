//! Path expressions that address one location in the remote object graph.
//!
//! An accessor is plain text such as `app.documents[0].layers["Background"]`.
//! It carries no cached state: it is only meaningful when the remote side
//! resolves it against the live graph, and two accessors with equal text
//! always denote the same location.
//!
//! # Grammar
//!
//! ```text
//! accessor := ident ( "." ident | "[" digits "]" | "[" quoted "]" )*
//! ident    := [A-Za-z0-9_$]+
//! quoted   := '"' ( [^"\\] | "\\" | "\"" )* '"'
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One step of an accessor path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// `.name` (or the leading root name).
    Member(String),
    /// `[3]`
    Index(usize),
    /// `["name"]`
    Key(String),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Member(name) => write!(f, ".{}", name),
            Segment::Index(index) => write!(f, "[{}]", index),
            Segment::Key(key) => {
                f.write_str("[\"")?;
                f.write_str(&escape_key(key))?;
                f.write_str("\"]")
            }
        }
    }
}

/// Failure to parse accessor text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed accessor `{text}` at byte {position}: {reason}")]
pub struct AccessorError {
    pub text: String,
    pub position: usize,
    pub reason: &'static str,
}

/// A path string identifying one reachable value or object in the remote graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Accessor(String);

impl Accessor {
    /// Accessor for a named root of the remote graph.
    ///
    /// `name` must be an identifier (`[A-Za-z0-9_$]+`); anything else
    /// produces text that [`Accessor::parse`] rejects.
    pub fn root(name: &str) -> Self {
        debug_assert!(is_ident(name), "invalid root name `{}`", name);
        Self(name.to_string())
    }

    /// Parse and validate accessor text.
    pub fn parse(text: &str) -> Result<Self, AccessorError> {
        parse_segments(text)?;
        Ok(Self(text.to_string()))
    }

    /// Render segments back into canonical accessor text.
    ///
    /// The first segment must be a `Member` (the root name).
    pub fn from_segments(segments: &[Segment]) -> Option<Self> {
        let (first, rest) = segments.split_first()?;
        let Segment::Member(root) = first else {
            return None;
        };
        let mut acc = Self::root(root);
        for segment in rest {
            acc = acc.child(segment);
        }
        Some(acc)
    }

    /// `"{self}.{name}"`. `name` must be an identifier, as for
    /// [`Accessor::root`].
    pub fn member(&self, name: &str) -> Self {
        debug_assert!(is_ident(name), "invalid member name `{}`", name);
        Self(format!("{}.{}", self.0, name))
    }

    /// `"{self}[{index}]"`
    pub fn index(&self, index: usize) -> Self {
        Self(format!("{}[{}]", self.0, index))
    }

    /// `"{self}[\"{key}\"]"`, escaping quotes and backslashes in `key`.
    pub fn key(&self, key: &str) -> Self {
        let mut text = String::with_capacity(self.0.len() + key.len() + 4);
        text.push_str(&self.0);
        text.push_str("[\"");
        text.push_str(&escape_key(key));
        text.push_str("\"]");
        Self(text)
    }

    /// Append one segment.
    pub fn child(&self, segment: &Segment) -> Self {
        match segment {
            Segment::Member(name) => self.member(name),
            Segment::Index(index) => self.index(*index),
            Segment::Key(key) => self.key(key),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split the text into path segments.
    pub fn segments(&self) -> Result<Vec<Segment>, AccessorError> {
        parse_segments(&self.0)
    }

    /// The accessor one step up, together with the last segment.
    ///
    /// Returns `None` for a bare root.
    pub fn split_last(&self) -> Result<Option<(Accessor, Segment)>, AccessorError> {
        let mut segments = self.segments()?;
        if segments.len() < 2 {
            return Ok(None);
        }
        let last = segments.pop();
        Ok(Accessor::from_segments(&segments).zip(last))
    }
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Accessor {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'
}

fn is_ident(name: &str) -> bool {
    !name.is_empty() && name.chars().all(is_ident_char)
}

/// Only `"` and `\` are escaped inside a quoted key.
fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for ch in key.chars() {
        if ch == '"' || ch == '\\' {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn parse_segments(text: &str) -> Result<Vec<Segment>, AccessorError> {
    let fail = |position: usize, reason: &'static str| AccessorError {
        text: text.to_string(),
        position,
        reason,
    };

    let bytes: Vec<(usize, char)> = text.char_indices().collect();
    let mut pos = 0;
    let mut segments = Vec::new();

    let read_ident = |pos: &mut usize| -> Option<String> {
        let start = *pos;
        while *pos < bytes.len() && is_ident_char(bytes[*pos].1) {
            *pos += 1;
        }
        (*pos > start).then(|| bytes[start..*pos].iter().map(|(_, c)| c).collect())
    };
    let offset = |pos: usize| bytes.get(pos).map_or(text.len(), |(i, _)| *i);

    let root = read_ident(&mut pos).ok_or_else(|| fail(0, "expected root name"))?;
    segments.push(Segment::Member(root));

    while pos < bytes.len() {
        match bytes[pos].1 {
            '.' => {
                pos += 1;
                let name =
                    read_ident(&mut pos).ok_or_else(|| fail(offset(pos), "expected member name"))?;
                segments.push(Segment::Member(name));
            }
            '[' => {
                pos += 1;
                match bytes.get(pos).map(|(_, c)| *c) {
                    Some('"') => {
                        pos += 1;
                        let mut key = String::new();
                        loop {
                            match bytes.get(pos).map(|(_, c)| *c) {
                                None => return Err(fail(text.len(), "unterminated key")),
                                Some('"') => {
                                    pos += 1;
                                    break;
                                }
                                Some('\\') => {
                                    match bytes.get(pos + 1).map(|(_, c)| *c) {
                                        Some(c @ ('"' | '\\')) => key.push(c),
                                        _ => return Err(fail(offset(pos), "invalid escape")),
                                    }
                                    pos += 2;
                                }
                                Some(c) => {
                                    key.push(c);
                                    pos += 1;
                                }
                            }
                        }
                        segments.push(Segment::Key(key));
                    }
                    Some(c) if c.is_ascii_digit() => {
                        let start = pos;
                        while pos < bytes.len() && bytes[pos].1.is_ascii_digit() {
                            pos += 1;
                        }
                        let digits: String = bytes[start..pos].iter().map(|(_, c)| c).collect();
                        let index = digits
                            .parse()
                            .map_err(|_| fail(offset(start), "index out of range"))?;
                        segments.push(Segment::Index(index));
                    }
                    _ => return Err(fail(offset(pos), "expected index or quoted key")),
                }
                if bytes.get(pos).map(|(_, c)| *c) != Some(']') {
                    return Err(fail(offset(pos), "expected `]`"));
                }
                pos += 1;
            }
            _ => return Err(fail(offset(pos), "unexpected character")),
        }
    }

    Ok(segments)
}
