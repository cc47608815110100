//! # Artifact Set
//!
//! Unordered set of artifact identities with the algebra the rule node
//! reasons in: `a + b` (union), `a - b` (asymmetric difference) and
//! `a.intersects(&b)`.
//!
//! Membership is hash-based; a single `apply` builds and diffs several of
//! these sets. Iteration order is unspecified. Use [`ArtifactSet::sorted`]
//! wherever a stable order matters (logging, persistence, applicator
//! invocation order).

use crate::ArtifactId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::collections::hash_set;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A set of artifact identities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    ids: HashSet<ArtifactId>,
}

impl ArtifactSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set holding exactly one artifact.
    #[must_use]
    pub fn single(id: ArtifactId) -> Self {
        let mut set = Self::new();
        set.insert(id);
        set
    }

    /// Insert an artifact. Returns `true` if it was not yet a member.
    pub fn insert(&mut self, id: ArtifactId) -> bool {
        self.ids.insert(id)
    }

    /// Remove an artifact. Returns `true` if it was a member.
    pub fn remove(&mut self, id: ArtifactId) -> bool {
        self.ids.remove(&id)
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, id: ArtifactId) -> bool {
        self.ids.contains(&id)
    }

    /// Check whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Remove all members.
    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Check whether the two sets share at least one member.
    ///
    /// Non-destructive; looks up the members of the smaller set in the larger.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.ids.iter().any(|id| large.ids.contains(id))
    }

    /// Members present in both sets.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .ids
            .iter()
            .filter(|id| large.ids.contains(id))
            .copied()
            .collect()
    }

    /// Iterate over the members in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = ArtifactId> + '_ {
        self.ids.iter().copied()
    }

    /// The members in ascending id order.
    #[must_use]
    pub fn sorted(&self) -> Vec<ArtifactId> {
        let mut ids: Vec<_> = self.ids.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

// =============================================================================
// ALGEBRA
// =============================================================================

impl Add for &ArtifactSet {
    type Output = ArtifactSet;

    fn add(self, rhs: &ArtifactSet) -> ArtifactSet {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl Add for ArtifactSet {
    type Output = ArtifactSet;

    fn add(mut self, rhs: ArtifactSet) -> ArtifactSet {
        self += &rhs;
        self
    }
}

impl AddAssign<&ArtifactSet> for ArtifactSet {
    fn add_assign(&mut self, rhs: &ArtifactSet) {
        self.ids.extend(rhs.ids.iter().copied());
    }
}

impl AddAssign<ArtifactId> for ArtifactSet {
    fn add_assign(&mut self, rhs: ArtifactId) {
        self.ids.insert(rhs);
    }
}

impl Sub for &ArtifactSet {
    type Output = ArtifactSet;

    fn sub(self, rhs: &ArtifactSet) -> ArtifactSet {
        self.ids
            .iter()
            .filter(|id| !rhs.ids.contains(id))
            .copied()
            .collect()
    }
}

impl Sub for ArtifactSet {
    type Output = ArtifactSet;

    fn sub(mut self, rhs: ArtifactSet) -> ArtifactSet {
        self -= &rhs;
        self
    }
}

impl SubAssign<&ArtifactSet> for ArtifactSet {
    fn sub_assign(&mut self, rhs: &ArtifactSet) {
        self.ids.retain(|id| !rhs.ids.contains(id));
    }
}

// =============================================================================
// CONVERSIONS
// =============================================================================

impl FromIterator<ArtifactId> for ArtifactSet {
    fn from_iter<I: IntoIterator<Item = ArtifactId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

impl Extend<ArtifactId> for ArtifactSet {
    fn extend<I: IntoIterator<Item = ArtifactId>>(&mut self, iter: I) {
        self.ids.extend(iter);
    }
}

impl IntoIterator for ArtifactSet {
    type Item = ArtifactId;
    type IntoIter = hash_set::IntoIter<ArtifactId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter()
    }
}

impl<'a> IntoIterator for &'a ArtifactSet {
    type Item = &'a ArtifactId;
    type IntoIter = hash_set::Iter<'a, ArtifactId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.iter()
    }
}

impl fmt::Display for ArtifactSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, id) in self.sorted().into_iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", id.0)?;
        }
        f.write_str("}")
    }
}

// Persisted as a sorted list so that save -> load -> save is bit-exact.
impl Serialize for ArtifactSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.sorted().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ArtifactSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ids = Vec::<ArtifactId>::deserialize(deserializer)?;
        Ok(ids.into_iter().collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================
