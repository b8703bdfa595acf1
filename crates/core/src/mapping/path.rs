//! Dotted/bracketed paths into a generic value tree.
//!
//! `pricing.premium`, `items.0.amount` and `items[0].amount` all address the
//! same kind of location. A numeric segment indexes a sequence; applied to a
//! mapping it falls back to the key with the same digits. Dotted digits with a
//! leading zero or above [`MAX_INDEX`] stay plain keys.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use thiserror::Error;

/// Largest sequence index a path may address.
pub const MAX_INDEX: usize = 1024;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("field path is empty")]
    Empty,
    #[error("field path `{path}` contains an empty segment")]
    EmptySegment { path: String },
    #[error("field path `{path}` has an invalid index `{segment}`")]
    InvalidIndex { path: String, segment: String },
    #[error("field path `{path}` has index {index} above the limit of {max}")]
    IndexTooLarge { path: String, index: usize, max: usize },
    #[error("cannot write `{path}`: segment `{segment}` passes through a {found}")]
    Conflict { path: String, segment: String, found: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

/// A parsed path. Parsing happens once, when configuration is loaded.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }

        let mut segments = Vec::new();
        for part in trimmed.split('.') {
            parse_part(trimmed, part, &mut segments)?;
        }

        Ok(Self { raw: trimmed.to_string(), segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the paths are equal or one is a prefix of the other.
    pub fn overlaps(&self, other: &FieldPath) -> bool {
        self.segments.iter().zip(&other.segments).all(|(left, right)| left == right)
    }
}

fn parse_part(path: &str, part: &str, segments: &mut Vec<Segment>) -> Result<(), PathError> {
    let (name, mut rest) = match part.find('[') {
        Some(open) => (&part[..open], &part[open..]),
        None => (part, ""),
    };

    if name.is_empty() && rest.is_empty() {
        return Err(PathError::EmptySegment { path: path.to_string() });
    }

    if !name.is_empty() {
        let canonical = name.bytes().all(|byte| byte.is_ascii_digit())
            && (name == "0" || !name.starts_with('0'));
        let segment = match name.parse::<usize>() {
            Ok(index) if canonical && index <= MAX_INDEX => Segment::Index(index),
            _ => Segment::Key(name.to_string()),
        };
        segments.push(segment);
    }

    while !rest.is_empty() {
        let invalid = || PathError::InvalidIndex { path: path.to_string(), segment: part.to_string() };
        let body = rest.strip_prefix('[').ok_or_else(invalid)?;
        let close = body.find(']').ok_or_else(invalid)?;
        let index = body[..close].trim().parse::<usize>().map_err(|_| invalid())?;
        if index > MAX_INDEX {
            return Err(PathError::IndexTooLarge { path: path.to_string(), index, max: MAX_INDEX });
        }
        segments.push(Segment::Index(index));
        rest = &body[close + 1..];
    }

    Ok(())
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Reads the value at `path`. `None` means the path does not exist; a missing
/// intermediate segment is not an error.
pub fn get<'a>(root: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments.iter().try_fold(root, |current, segment| match (segment, current) {
        (Segment::Key(key), Value::Object(map)) => map.get(key),
        (Segment::Index(index), Value::Array(items)) => items.get(*index),
        (Segment::Index(index), Value::Object(map)) => map.get(&index.to_string()),
        _ => None,
    })
}

/// Writes `value` at `path`, creating missing intermediate containers.
///
/// Index segments create sequences (padded with nulls), name segments create
/// mappings. Writing through an existing scalar fails with [`PathError::Conflict`].
pub fn set(root: &mut Value, path: &FieldPath, value: Value) -> Result<(), PathError> {
    let (last, parents) = path.segments.split_last().ok_or(PathError::Empty)?;

    let mut current = root;
    for segment in parents {
        current = child_mut(current, segment, path)?;
    }

    *child_mut(current, last, path)? = value;
    Ok(())
}

fn child_mut<'a>(
    current: &'a mut Value,
    segment: &Segment,
    path: &FieldPath,
) -> Result<&'a mut Value, PathError> {
    if current.is_null() {
        *current = match segment {
            Segment::Key(_) => Value::Object(Map::new()),
            Segment::Index(_) => Value::Array(Vec::new()),
        };
    }

    let conflict = |found: &'static str| PathError::Conflict {
        path: path.raw.clone(),
        segment: segment.to_string(),
        found,
    };

    match (segment, current) {
        (Segment::Key(key), Value::Object(map)) => Ok(map.entry(key.clone()).or_insert(Value::Null)),
        (Segment::Index(index), Value::Object(map)) => {
            Ok(map.entry(index.to_string()).or_insert(Value::Null))
        }
        (Segment::Index(index), Value::Array(items)) => {
            if items.len() <= *index {
                items.resize(*index + 1, Value::Null);
            }
            items.get_mut(*index).ok_or_else(|| conflict("sequence"))
        }
        (Segment::Key(_), Value::Array(_)) => Err(conflict("sequence")),
        (_, other) => Err(conflict(kind_of(other))),
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}
