//! Hand-written scanner for the path grammar.
//!
//! ```text
//! reference := [scope "::"] path
//! path      := root segment*
//! root      := "$" | "@" ident | "?" ident
//! segment   := "." ident | "[" key ("," key)* "]"
//! key       := any text without "]" or ",", surrounding whitespace trimmed
//! ```

use super::{Path, Root, Segment, TableKey, CALC_PREFIX, MODEL_ROOT, SCOPE_SEPARATOR, VERIFICATION_PREFIX};
use smallvec::SmallVec;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid path '{text}' at position {position}: {reason}")]
pub struct PathSyntaxError {
    pub text: String,
    pub position: usize,
    pub reason: String,
}

impl PathSyntaxError {
    pub(crate) fn new(text: &str, position: usize, reason: impl Into<String>) -> Self {
        Self { text: text.to_string(), position, reason: reason.into() }
    }
}

/// Parses an unqualified, scope-relative path.
pub fn parse_path(text: &str) -> Result<Path, PathSyntaxError> {
    match parse_reference(text)? {
        (None, path) => Ok(path),
        (Some(_), _) => {
            let pos = text.find(SCOPE_SEPARATOR).unwrap_or(0);
            Err(PathSyntaxError::new(text, pos, "unexpected scope qualifier"))
        }
    }
}

/// Parses a path with an optional leading `Scope::` qualifier.
pub fn parse_reference(text: &str) -> Result<(Option<String>, Path), PathSyntaxError> {
    let leading = text.len() - text.trim_start().len();
    let body = text.trim();

    // Scope names never contain a root marker, so the qualifier is whatever
    // precedes the first one.
    let root_at = body.find(|c| matches!(c, MODEL_ROOT | CALC_PREFIX | VERIFICATION_PREFIX)).unwrap_or(0);
    let (scope, path_start) = match body[..root_at].strip_suffix(SCOPE_SEPARATOR) {
        Some(scope) => {
            check_name(scope, "scope name").map_err(|e| PathSyntaxError::new(text, leading + e.position, e.reason))?;
            (Some(scope.to_string()), root_at)
        }
        None => (None, 0),
    };

    let mut cursor = Cursor { text, src: body, pos: path_start, offset: leading };
    let path = cursor.path()?;
    Ok((scope, path))
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Checks that `name` is usable as a scope, calculation, verification or
/// attribute name. Errors are positioned within `name`.
pub(crate) fn check_name(name: &str, what: &str) -> Result<(), PathSyntaxError> {
    if name.is_empty() {
        return Err(PathSyntaxError::new(name, 0, format!("empty {}", what)));
    }
    match name.char_indices().find(|&(_, c)| !is_ident_char(c)) {
        Some((off, c)) => Err(PathSyntaxError::new(name, off, format!("invalid character '{}' in {}", c, what))),
        None => Ok(()),
    }
}

/// Checks one component of a table key.
pub(crate) fn check_key_part(part: &str) -> Result<(), PathSyntaxError> {
    if part.trim().is_empty() {
        return Err(PathSyntaxError::new(part, 0, "empty table key"));
    }
    if part.trim() != part {
        return Err(PathSyntaxError::new(part, 0, "table key has surrounding whitespace"));
    }
    match part.char_indices().find(|&(_, c)| c == ']' || c == ',') {
        Some((off, c)) => Err(PathSyntaxError::new(part, off, format!("invalid character '{}' in table key", c))),
        None => Ok(()),
    }
}

struct Cursor<'a> {
    /// Original text, for error reporting.
    text: &'a str,
    /// Trimmed text being scanned.
    src: &'a str,
    pos: usize,
    /// Byte offset of `src` within `text`.
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, at: usize, reason: impl Into<String>) -> PathSyntaxError {
        PathSyntaxError::new(self.text, self.offset + at, reason)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.src[start..self.pos]
    }

    fn ident(&mut self, what: &str) -> Result<String, PathSyntaxError> {
        let start = self.pos;
        let name = self.take_while(is_ident_char);
        if name.is_empty() {
            return Err(self.error(start, format!("expected {}", what)));
        }
        Ok(name.to_string())
    }

    fn path(&mut self) -> Result<Path, PathSyntaxError> {
        let root = self.root()?;
        let mut segments = SmallVec::<[Segment; 4]>::new();
        while let Some(c) = self.peek() {
            let at = self.pos;
            match c {
                '.' => {
                    self.bump();
                    segments.push(Segment::Attribute(self.ident("attribute name")?));
                }
                '[' => {
                    self.bump();
                    segments.push(Segment::Index(self.key()?));
                }
                other => return Err(self.error(at, format!("unexpected character '{}'", other))),
            }
        }
        Ok(Path { root, segments })
    }

    fn root(&mut self) -> Result<Root, PathSyntaxError> {
        let at = self.pos;
        match self.bump() {
            Some(MODEL_ROOT) => Ok(Root::Model),
            Some(CALC_PREFIX) => Ok(Root::Calc(self.ident("calculation name")?)),
            Some(VERIFICATION_PREFIX) => Ok(Root::Verification(self.ident("verification name")?)),
            Some(other) => Err(self.error(
                at,
                format!(
                    "expected '{}', '{}' or '{}', found '{}'",
                    MODEL_ROOT, CALC_PREFIX, VERIFICATION_PREFIX, other
                ),
            )),
            None => Err(self.error(at, "empty path")),
        }
    }

    /// Scans the inside of `[...]`; the opening bracket is already consumed.
    fn key(&mut self) -> Result<TableKey, PathSyntaxError> {
        let open = self.pos - 1;
        let close = match self.src[self.pos..].find(']') {
            Some(rel) => self.pos + rel,
            None => return Err(self.error(open, "unclosed '['")),
        };

        let mut parts: SmallVec<[String; 2]> = SmallVec::new();
        let mut part_start = self.pos;
        for part in self.src[self.pos..close].split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                return Err(self.error(part_start, "empty table key"));
            }
            parts.push(trimmed.to_string());
            part_start += part.len() + 1;
        }

        self.pos = close + 1;
        Ok(TableKey(parts))
    }
}
