use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;

/// A set that remembers insertion order. The first occurrence of a value
/// wins, later duplicates are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<T>", into = "Vec<T>")]
#[serde(bound(
    serialize = "T: Serialize + Clone + Eq + Hash",
    deserialize = "T: Deserialize<'de> + Clone + Eq + Hash"
))]
pub struct OrderedSet<T: Clone + Eq + Hash> {
    items: Vec<T>,
    seen: HashSet<T>,
}

impl<T: Clone + Eq + Hash> OrderedSet<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Insert a value, returns false if it was already present.
    pub fn insert(&mut self, value: T) -> bool {
        if !self.seen.insert(value.clone()) {
            return false;
        }
        self.items.push(value);
        true
    }

    pub fn contains(&self, value: &T) -> bool {
        self.seen.contains(value)
    }

    pub fn remove(&mut self, value: &T) -> bool {
        if !self.seen.remove(value) {
            return false;
        }
        self.items.retain(|item| item != value);
        true
    }

    /// Values of `self` followed by the values of `other` not yet seen.
    pub fn union<'a>(&self, other: impl IntoIterator<Item = &'a T>) -> Self
    where
        T: 'a,
    {
        let mut ret = self.clone();
        ret.extend(other.into_iter().cloned());
        ret
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.clone()
    }
}

impl<T: Clone + Eq + Hash> Default for OrderedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Eq + Hash> PartialEq for OrderedSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T: Clone + Eq + Hash> Extend<T> for OrderedSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.insert(value);
        }
    }
}

impl<T: Clone + Eq + Hash> FromIterator<T> for OrderedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut ret = Self::new();
        ret.extend(iter);
        ret
    }
}

impl<T: Clone + Eq + Hash> From<Vec<T>> for OrderedSet<T> {
    fn from(value: Vec<T>) -> Self {
        value.into_iter().collect()
    }
}

impl<T: Clone + Eq + Hash> From<OrderedSet<T>> for Vec<T> {
    fn from(value: OrderedSet<T>) -> Self {
        value.items
    }
}

impl<'a, T: Clone + Eq + Hash> IntoIterator for &'a OrderedSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
