//! Hierarchical scope matching.
//!
//! Scopes are dot-segmented names. Holding `picture` grants `picture.read`
//! and every other descendant, while holding `picture.read` never grants
//! `picture`. Every authorization decision in the workspace goes through
//! [`grants`].

use crate::error::AuthorityError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Separator between scopes in a scope string (`sco` claim, connection rows).
pub const SCOPE_SEPARATOR: char = ' ';

/// Separator between segments of a single scope name.
pub const SEGMENT_SEPARATOR: char = '.';

/// A scope a client is allowed to request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    /// Appended to every successful grant for the owning client.
    #[serde(default)]
    pub required: bool,
}

impl Scope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }

    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }
}

/// Returns true if any held scope equals `requested` or is one of its
/// hierarchical ancestors. Empty held entries are ignored.
pub fn grants<S: AsRef<str>>(held: &[S], requested: &str) -> bool {
    held.iter()
        .map(AsRef::as_ref)
        .filter(|scope| !scope.is_empty())
        .any(|scope| covers(scope, requested))
}

fn covers(held: &str, requested: &str) -> bool {
    let mut requested_segments = requested.split(SEGMENT_SEPARATOR);
    held.split(SEGMENT_SEPARATOR)
        .all(|segment| requested_segments.next() == Some(segment))
}

/// Splits a scope string, dropping empty entries.
pub fn split_scopes(scopes: &str, separator: char) -> Vec<String> {
    scopes
        .split(separator)
        .filter(|scope| !scope.is_empty())
        .map(str::to_string)
        .collect()
}

/// Unions `existing` with `incoming` by exact name. The result is sorted so
/// that persisted scope strings are deterministic.
pub fn merge_scopes<S: AsRef<str>>(existing: &str, incoming: &[S], separator: char) -> String {
    let merged: BTreeSet<&str> = existing
        .split(separator)
        .chain(incoming.iter().map(AsRef::as_ref))
        .filter(|scope| !scope.is_empty())
        .collect();

    merged
        .into_iter()
        .collect::<Vec<_>>()
        .join(separator.to_string().as_str())
}

/// Decides a full scope request for a client.
///
/// The mandatory scope is granted without a check. Any other scope must be
/// granted by the client's scope list; the first one that is not fails the
/// whole request. Required client scopes are added to the result.
pub fn grant_all<S: AsRef<str>>(
    client_scopes: &[Scope],
    requested: &[S],
    mandatory_scope: &str,
) -> Result<Vec<String>, AuthorityError> {
    let held: Vec<&str> = client_scopes.iter().map(|s| s.name.as_str()).collect();
    let mut granted = BTreeSet::new();

    for scope in requested.iter().map(AsRef::as_ref) {
        if scope.is_empty() {
            continue;
        }
        if scope != mandatory_scope && !grants(&held, scope) {
            return Err(AuthorityError::ClientPermission(scope.to_string()));
        }
        granted.insert(scope.to_string());
    }

    granted.extend(
        client_scopes
            .iter()
            .filter(|s| s.required)
            .map(|s| s.name.clone()),
    );

    Ok(granted.into_iter().collect())
}
