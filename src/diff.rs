//! Structural delta between two snapshots.
//!
//! The walk is keyed by address: mapping and record keys by name, sequences
//! index by index. Sequence moves are not detected; a shifted element shows up
//! as a run of `Changed` entries. The cost is linear in the size of the trees.

use std::fmt;

use indexmap::IndexMap;

use crate::{
    types::{PathSegment, StatePath},
    value::Value,
};

/// One edit in a [`Diff`].
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// `value` appears at `path` in the new snapshot only.
    Added {
        /// Address of the new entry.
        path: StatePath,
        /// Added subtree.
        value: Value,
    },
    /// `value` was at `path` in the old snapshot only.
    Removed {
        /// Address of the removed entry.
        path: StatePath,
        /// Removed subtree.
        value: Value,
    },
    /// The value at `path` differs between the snapshots.
    Changed {
        /// Shared address.
        path: StatePath,
        /// Value before.
        old: Value,
        /// Value after.
        new: Value,
    },
}

impl Change {
    /// Address the change applies to.
    pub fn path(&self) -> &StatePath {
        match self {
            Self::Added { path, .. } | Self::Removed { path, .. } | Self::Changed { path, .. } => path,
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added { path, value } => write!(f, "+ {path} = {value}"),
            Self::Removed { path, value } => write!(f, "- {path} = {value}"),
            Self::Changed { path, old, new } => write!(f, "~ {path}: {old} -> {new}"),
        }
    }
}

/// Ordered set of edits transforming one snapshot into another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    changes: Vec<Change>,
}

/// Failure to replay a [`Diff`] onto a value it was not computed from.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    /// The change addresses a location that does not exist in the target.
    #[error("diff path {0} does not resolve in the target value")]
    Unresolved(StatePath),
}

impl Diff {
    /// True when the two snapshots were deep-equal.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of edits.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Edits in emission order.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Iterates the edits in emission order.
    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    /// Replays the edits, in order, onto `target`.
    ///
    /// Applied to the `old` snapshot the diff was computed from, this yields `new`.
    pub fn apply_to(&self, target: &mut Value) -> Result<(), DiffError> {
        self.changes.iter().try_for_each(|change| apply_change(target, change))
    }
}

impl<'a> IntoIterator for &'a Diff {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for change in &self.changes {
            writeln!(f, "{change}")?;
        }
        Ok(())
    }
}

/// Computes the edits that turn `old` into `new`. Pure; `diff(x, x)` is empty.
pub fn diff(old: &Value, new: &Value) -> Diff {
    let mut changes = Vec::new();
    diff_at(&mut changes, &StatePath::root(), old, new);
    Diff { changes }
}

fn diff_at(out: &mut Vec<Change>, path: &StatePath, old: &Value, new: &Value) {
    match (old, new) {
        (Value::Scalar(a), Value::Scalar(b)) => {
            if a != b {
                push_changed(out, path, old, new);
            }
        }
        (Value::Mapping(a), Value::Mapping(b)) => diff_keyed(out, path, a, b),
        (Value::Record(a), Value::Record(b)) if a.name() == b.name() => {
            diff_keyed(out, path, a.fields(), b.fields());
        }
        (Value::Sequence(a), Value::Sequence(b)) => diff_seq(out, path, a, b),
        _ => push_changed(out, path, old, new),
    }
}

fn push_changed(out: &mut Vec<Change>, path: &StatePath, old: &Value, new: &Value) {
    out.push(Change::Changed {
        path: path.clone(),
        old: old.clone(),
        new: new.clone(),
    });
}

fn diff_keyed(
    out: &mut Vec<Change>,
    path: &StatePath,
    old: &IndexMap<String, Value>,
    new: &IndexMap<String, Value>,
) {
    for (key, old_val) in old {
        let child = path.key(key.as_str());
        match new.get(key) {
            Some(new_val) => diff_at(out, &child, old_val, new_val),
            None => out.push(Change::Removed {
                path: child,
                value: old_val.clone(),
            }),
        }
    }
    for (key, new_val) in new {
        if !old.contains_key(key) {
            out.push(Change::Added {
                path: path.key(key.as_str()),
                value: new_val.clone(),
            });
        }
    }
}

fn diff_seq(out: &mut Vec<Change>, path: &StatePath, old: &[Value], new: &[Value]) {
    let shared = old.len().min(new.len());
    for i in 0..shared {
        diff_at(out, &path.index(i), &old[i], &new[i]);
    }
    for (i, value) in new.iter().enumerate().skip(shared) {
        out.push(Change::Added {
            path: path.index(i),
            value: value.clone(),
        });
    }
    // Highest index first, so replaying removals never shifts a pending one.
    for i in (shared..old.len()).rev() {
        out.push(Change::Removed {
            path: path.index(i),
            value: old[i].clone(),
        });
    }
}

fn apply_change(target: &mut Value, change: &Change) -> Result<(), DiffError> {
    let unresolved = || DiffError::Unresolved(change.path().clone());
    match change {
        Change::Changed { path, new, .. } => {
            *target.at_mut(path).ok_or_else(unresolved)? = new.clone();
        }
        Change::Added { path, value } => {
            let (parent, last) = path.split_last().ok_or_else(unresolved)?;
            match (target.at_mut(&parent).ok_or_else(unresolved)?, last) {
                (Value::Mapping(map), PathSegment::Key(k)) => {
                    map.insert(k.clone(), value.clone());
                }
                (Value::Record(rec), PathSegment::Key(k)) => {
                    rec.fields_mut().insert(k.clone(), value.clone());
                }
                (Value::Sequence(items), PathSegment::Index(i)) if *i <= items.len() => {
                    items.insert(*i, value.clone());
                }
                _ => return Err(unresolved()),
            }
        }
        Change::Removed { path, .. } => {
            let (parent, last) = path.split_last().ok_or_else(unresolved)?;
            match (target.at_mut(&parent).ok_or_else(unresolved)?, last) {
                (Value::Mapping(map), PathSegment::Key(k)) => {
                    map.shift_remove(k).ok_or_else(unresolved)?;
                }
                (Value::Record(rec), PathSegment::Key(k)) => {
                    rec.fields_mut().shift_remove(k).ok_or_else(unresolved)?;
                }
                (Value::Sequence(items), PathSegment::Index(i)) if *i < items.len() => {
                    items.remove(*i);
                }
                _ => return Err(unresolved()),
            }
        }
    }
    Ok(())
}
