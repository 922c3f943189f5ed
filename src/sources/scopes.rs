use std::collections::BTreeSet;
use std::fmt;

use anyhow::{bail, Result};

/// Joins normalized scopes. Never part of a valid scope string.
const SCOPE_SEPARATOR: char = '\0';

/// Cache key for a set of OAuth2 scopes.
///
/// Scopes are deduplicated and sorted byte-wise, so every request for the same
/// effective permissions maps to the same key whatever the order or repetition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub fn from_scopes<I, S>(scopes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self::join(&normalize_scopes(scopes)?))
    }

    fn join(scopes: &[String]) -> Self {
        let mut key = String::with_capacity(scopes.iter().map(|s| s.len() + 1).sum());
        for (i, scope) in scopes.iter().enumerate() {
            if i > 0 {
                key.push(SCOPE_SEPARATOR);
            }
            key.push_str(scope);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.0.split(SCOPE_SEPARATOR)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.replace(SCOPE_SEPARATOR, " "))
    }
}

/// Deduplicated, byte-wise sorted copy of `scopes`.
///
/// An empty set, an empty scope or one containing the separator is rejected.
pub fn normalize_scopes<I, S>(scopes: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set = BTreeSet::new();
    for scope in scopes {
        let scope = scope.as_ref();
        if scope.is_empty() {
            bail!("empty scope in scope set");
        }
        if scope.contains(SCOPE_SEPARATOR) {
            bail!("scope {scope:?} contains a NUL character");
        }
        set.insert(scope.to_owned());
    }
    if set.is_empty() {
        bail!("at least one scope is required");
    }
    Ok(set.into_iter().collect())
}
