//! Shared primitive ids, structural addresses and HTTP methods.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Arena identifier of a wrapped node inside one state root.
pub type NodeId = u64;
/// Monotonic counter of notified mutations on one root.
pub type Revision = u64;

/// One step of a structural address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    /// Mapping key or record field name.
    Key(String),
    /// Sequence index.
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(value: &str) -> Self {
        Self::Key(value.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(value: String) -> Self {
        Self::Key(value)
    }
}

impl From<usize> for PathSegment {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "`{key}`"),
            Self::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// Structural address of a value, relative to the root of its state.
///
/// Renders as `users[2].name`; the root itself renders as `$`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatePath(Vec<PathSegment>);

impl StatePath {
    /// The empty path addressing the root.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Returns a copy of this path extended by `segment`.
    pub fn child(&self, segment: impl Into<PathSegment>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Returns a copy of this path extended by a key segment.
    pub fn key(&self, key: impl Into<String>) -> Self {
        self.child(PathSegment::Key(key.into()))
    }

    /// Returns a copy of this path extended by an index segment.
    pub fn index(&self, index: usize) -> Self {
        self.child(PathSegment::Index(index))
    }

    /// Borrowed segments, outermost first.
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// True for the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Splits into the parent path and the final segment.
    pub fn split_last(&self) -> Option<(StatePath, &PathSegment)> {
        let (last, parent) = self.0.split_last()?;
        Some((Self(parent.to_vec()), last))
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("$");
        }
        for (pos, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if pos == 0 => write!(f, "{key}")?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// Error returned when a textual path cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid state path `{0}`")]
pub struct PathParseError(pub String);

impl FromStr for StatePath {
    type Err = PathParseError;

    /// Parses `a.b[2].c`; `$` and the empty string are the root.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PathParseError(s.to_string());
        if s.is_empty() || s == "$" {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for part in s.split('.') {
            let (key, mut rest) = match part.find('[') {
                Some(pos) => part.split_at(pos),
                None => (part, ""),
            };
            if key.is_empty() && rest.is_empty() {
                return Err(invalid());
            }
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            }
            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(invalid)?;
                let index = rest[1..close].parse::<usize>().map_err(|_| invalid())?;
                segments.push(PathSegment::Index(index));
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(invalid());
                }
            }
        }
        Ok(Self(segments))
    }
}

/// HTTP method an endpoint is declared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// PATCH.
    Patch,
    /// DELETE.
    Delete,
}

impl Method {
    /// Upper-case wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unsupported method {other}")),
        }
    }
}
