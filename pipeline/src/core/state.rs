//! Vocabulary shared by descriptors, requests and plans.
//!
//! State items, features, deliverables and node types are all opaque markers
//! identified by a static name. Sets of them are ordered so that every
//! rendered message and plan outline is deterministic.

use std::collections::BTreeSet;
use std::collections::btree_set;
use std::fmt;

/// How a state item is carried through the pipeline.
///
/// All flavors share the same set semantics during planning; the flavor only
/// distinguishes two items that happen to share a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemKind {
    /// Pipeline-wide boolean fact.
    Tag,
    /// Per-node marker whose presence on a node counts as the fact.
    Annotation,
    /// Shape a data node currently has.
    Structure,
}

/// A fact that may or may not hold at a point in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateItem {
    name: &'static str,
    kind: ItemKind,
}

impl StateItem {
    pub const fn tag(name: &'static str) -> Self {
        Self {
            name,
            kind: ItemKind::Tag,
        }
    }

    pub const fn annotation(name: &'static str) -> Self {
        Self {
            name,
            kind: ItemKind::Annotation,
        }
    }

    pub const fn structure(name: &'static str) -> Self {
        Self {
            name,
            kind: ItemKind::Structure,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }
}

impl fmt::Display for StateItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ItemKind::Tag => f.write_str(self.name),
            ItemKind::Annotation => write!(f, "@{}", self.name),
            ItemKind::Structure => write!(f, "#{}", self.name),
        }
    }
}

/// Optional capability a caller may enable for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Feature(&'static str);

impl Feature {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// End artifact a plan promises to generate exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Production(&'static str);

impl Production {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Production {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Type label of a data node (session, class, method, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeType(&'static str);

impl NodeType {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Ordered set of markers with the queries every constraint check needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarkerSet<T: Ord>(BTreeSet<T>);

/// Set of state items.
pub type StateSet = MarkerSet<StateItem>;
/// Set of enabled or supported features.
pub type FeatureSet = MarkerSet<Feature>;
/// Set of deliverables.
pub type ProductionSet = MarkerSet<Production>;

impl<T: Ord> Default for MarkerSet<T> {
    fn default() -> Self {
        Self(BTreeSet::new())
    }
}

impl<T: Ord + Copy> MarkerSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: T) -> bool {
        self.0.insert(item)
    }

    pub fn remove(&mut self, item: &T) -> bool {
        self.0.remove(item)
    }

    pub fn contains(&self, item: &T) -> bool {
        self.0.contains(item)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, T> {
        self.0.iter()
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn intersects(&self, other: &Self) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    pub fn intersection(&self, other: &Self) -> Self {
        Self(self.0.intersection(&other.0).copied().collect())
    }

    /// Items of `self` that are not in `other`.
    pub fn difference(&self, other: &Self) -> Self {
        Self(self.0.difference(&other.0).copied().collect())
    }

    pub fn union(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).copied().collect())
    }

    pub fn extend_from(&mut self, other: &Self) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn remove_all(&mut self, other: &Self) {
        for item in &other.0 {
            self.0.remove(item);
        }
    }
}

impl<T: Ord> FromIterator<T> for MarkerSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T: Ord> Extend<T> for MarkerSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl<T: Ord, const N: usize> From<[T; N]> for MarkerSet<T> {
    fn from(items: [T; N]) -> Self {
        Self(BTreeSet::from(items))
    }
}

impl<'a, T: Ord> IntoIterator for &'a MarkerSet<T> {
    type Item = &'a T;
    type IntoIter = btree_set::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<T: Ord + fmt::Display> fmt::Display for MarkerSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, item) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{item}")?;
        }
        f.write_str("}")
    }
}
