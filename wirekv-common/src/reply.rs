//! # Reply Model
//!
//! Purpose: Represent one decoded RESP2 reply as a tagged value.
//!
//! ## Design Principles
//! 1. **Closed Variant Set**: Exactly the five RESP2 reply kinds, nothing else.
//! 2. **Nil Is Explicit**: `Bulk(None)` and `Array(None)` keep `$-1`/`*-1`
//!    distinct from empty payloads; transactions rely on the nil array.
//! 3. **Cheap Clones**: Bulk payloads are `Bytes` so replies can be shared.

use std::fmt;

use bytes::Bytes;

/// RESP2 reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK` / `+QUEUED` style status lines.
    Status(String),
    /// `-ERR ...` lines returned by the server.
    Error(String),
    /// `:123` integers.
    Integer(i64),
    /// `$...` bulk strings, `None` for `$-1`.
    Bulk(Option<Bytes>),
    /// `*...` arrays, `None` for `*-1`.
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Short name of the reply kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Status(_) => "status",
            Reply::Error(_) => "error",
            Reply::Integer(_) => "integer",
            Reply::Bulk(Some(_)) => "bulk",
            Reply::Bulk(None) => "nil bulk",
            Reply::Array(Some(_)) => "array",
            Reply::Array(None) => "nil array",
        }
    }

    /// Returns true for `-ERR` style replies.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Returns true for `$-1` and `*-1`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Bulk(None) | Reply::Array(None))
    }

    /// Status text, if this is a status reply.
    pub fn as_status(&self) -> Option<&str> {
        match self {
            Reply::Status(text) => Some(text),
            _ => None,
        }
    }

    /// Checks for a status reply matching `expected` (ASCII case-insensitive).
    pub fn is_status(&self, expected: &str) -> bool {
        self.as_status()
            .map(|text| text.eq_ignore_ascii_case(expected))
            .unwrap_or(false)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(text) => write!(f, "+{}", text),
            Reply::Error(text) => write!(f, "-{}", text),
            Reply::Integer(value) => write!(f, ":{}", value),
            Reply::Bulk(Some(data)) => write!(f, "${}", String::from_utf8_lossy(data)),
            Reply::Bulk(None) => write!(f, "$-1"),
            Reply::Array(None) => write!(f, "*-1"),
            Reply::Array(Some(items)) => {
                write!(f, "*[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_variants_are_distinct_from_empty() {
        assert!(Reply::Bulk(None).is_nil());
        assert!(Reply::Array(None).is_nil());
        assert!(!Reply::Array(Some(Vec::new())).is_nil());
        assert!(!Reply::Bulk(Some(Bytes::new())).is_nil());
    }

    #[test]
    fn status_match_ignores_case() {
        let reply = Reply::Status("QUEUED".to_string());
        assert!(reply.is_status("queued"));
        assert!(!reply.is_status("OK"));
        assert!(!Reply::Integer(1).is_status("OK"));
    }

    #[test]
    fn display_renders_nested_arrays() {
        let reply = Reply::Array(Some(vec![
            Reply::Integer(1),
            Reply::Bulk(Some(Bytes::from_static(b"a"))),
            Reply::Array(None),
        ]));
        assert_eq!(reply.to_string(), "*[:1, $a, *-1]");
    }
}
