// src/core/variables/path.rs

//! Locations inside a configuration tree.

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A path from the root of a configuration tree to one of its nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    segments: Vec<PathSegment>,
}

impl PropertyPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a dotted address such as `custom.tables.0.name`. Numeric
    /// segments are kept as keys and only act as indexes on sequences.
    pub fn parse_dotted(address: &str) -> Self {
        let segments = address
            .split('.')
            .filter(|s| !s.is_empty())
            .map(|s| PathSegment::Key(s.to_string()))
            .collect();
        Self { segments }
    }

    pub fn child_key(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.segments.push(PathSegment::Key(key.to_string()));
        next
    }

    pub fn child_index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.segments.push(PathSegment::Index(index));
        next
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Follows the path through `value`.
    pub fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |node, segment| match (segment, node) {
                (PathSegment::Key(key), Value::Object(map)) => map.get(key),
                (PathSegment::Key(key), Value::Array(items)) => {
                    key.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                (PathSegment::Index(i), Value::Array(items)) => items.get(*i),
                _ => None,
            })
    }

    /// Replaces the node at this path. Returns `false` when the path does not
    /// exist in `value`.
    pub fn set(&self, value: &mut Value, replacement: Value) -> bool {
        let mut node = value;
        for segment in &self.segments {
            let next = match (segment, node) {
                (PathSegment::Key(key), Value::Object(map)) => map.get_mut(key),
                (PathSegment::Key(key), Value::Array(items)) => key
                    .parse::<usize>()
                    .ok()
                    .and_then(move |i| items.get_mut(i)),
                (PathSegment::Index(i), Value::Array(items)) => items.get_mut(*i),
                _ => None,
            };
            match next {
                Some(next) => node = next,
                None => return false,
            }
        }
        *node = replacement;
        true
    }
}

impl fmt::Display for PropertyPath {
    /// Renders as `provider.environment.KEY` or `functions.hello.events[0]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if position == 0 => write!(f, "{}", key)?,
                PathSegment::Key(key) => write!(f, ".{}", key)?,
                PathSegment::Index(i) => write!(f, "[{}]", i)?,
            }
        }
        Ok(())
    }
}
