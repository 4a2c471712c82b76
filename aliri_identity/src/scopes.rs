//! Normalized OAuth2 scope sets

use std::{collections::BTreeSet, fmt, iter::FromIterator};

use serde::{Deserialize, Serialize};

/// Scopes that the identity provider adds to every user request
///
/// These never participate in access-token matching.
pub const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum ScopeDto {
    String(String),
    Array(Vec<String>),
}

impl From<Option<ScopeDto>> for ScopeSet {
    fn from(dto: Option<ScopeDto>) -> Self {
        match dto {
            Some(ScopeDto::String(s)) => Self::parse(&s),
            Some(ScopeDto::Array(arr)) => arr.into_iter().collect(),
            None => Self::empty(),
        }
    }
}

impl From<ScopeSet> for ScopeDto {
    fn from(s: ScopeSet) -> Self {
        ScopeDto::String(s.normalized())
    }
}

/// A case-insensitive, ordered set of scopes
///
/// Scopes are lowercased on insertion, so two sets that differ only in case or
/// order compare equal and produce the same normalized string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<ScopeDto>", into = "ScopeDto")]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Produces an empty scope set
    #[inline]
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    /// Parses a space-delimited scope string
    pub fn parse(s: &str) -> Self {
        s.split_whitespace().collect()
    }

    /// Adds a scope to the set
    pub fn insert(&mut self, scope: &str) {
        let scope = scope.trim();
        if !scope.is_empty() {
            self.0.insert(scope.to_ascii_lowercase());
        }
    }

    /// Whether the set holds no scopes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of distinct scopes in the set
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over the lowercased scopes in order
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// The canonical form used in cache keys: lowercase, sorted, space-joined
    pub fn normalized(&self) -> String {
        let v: Vec<&str> = self.iter().collect();
        v.join(" ")
    }

    /// Checks whether every scope in `other` is also present in this set
    pub fn contains_all(&self, other: &ScopeSet) -> bool {
        other.0.is_subset(&self.0)
    }

    /// Checks whether the two sets share at least one scope
    pub fn intersects(&self, other: &ScopeSet) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    /// A copy of this set without the reserved OIDC scopes
    pub fn without_reserved(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|s| !RESERVED_SCOPES.contains(&s.as_str()))
                .cloned()
                .collect(),
        )
    }
}

impl<'a> FromIterator<&'a str> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut set = Self::empty();
        set.extend(iter);
        set
    }
}

impl FromIterator<String> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut set = Self::empty();
        for s in iter {
            set.insert(&s);
        }
        set
    }
}

impl<'a> Extend<&'a str> for ScopeSet {
    fn extend<I: IntoIterator<Item = &'a str>>(&mut self, iter: I) {
        for s in iter {
            self.insert(s);
        }
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.normalized())
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    #[test]
    fn case_and_order_do_not_matter() {
        let a: ScopeSet = ["a", "b"].iter().copied().collect();
        let b: ScopeSet = ["B", "A"].iter().copied().collect();

        assert_eq!(a, b);
        assert_eq!(a.normalized(), "a b");
        assert_eq!(a.normalized(), b.normalized());
    }

    #[test]
    fn parse_collapses_whitespace_and_duplicates() {
        let s = ScopeSet::parse("  User.Read   user.read Mail.Send ");

        assert_eq!(s.normalized(), "mail.send user.read");
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn reserved_scopes_are_removed() {
        let s = ScopeSet::parse("openid profile offline_access api://x/read");

        assert_eq!(s.without_reserved().normalized(), "api://x/read");
    }

    #[test]
    fn superset_and_intersection() {
        let cached = ScopeSet::parse("a b c");

        assert!(cached.contains_all(&ScopeSet::parse("C A")));
        assert!(!cached.contains_all(&ScopeSet::parse("a d")));
        assert!(cached.intersects(&ScopeSet::parse("d c")));
        assert!(!cached.intersects(&ScopeSet::parse("d e")));
    }

    #[test]
    fn deserializes_from_string_or_array() -> Result<()> {
        let from_string: ScopeSet = serde_json::from_str(r#""B a""#)?;
        let from_array: ScopeSet = serde_json::from_str(r#"["a", "b"]"#)?;

        assert_eq!(from_string, from_array);
        assert_eq!(serde_json::to_string(&from_array)?, r#""a b""#);
        Ok(())
    }
}
