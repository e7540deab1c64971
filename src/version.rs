use serde::{Deserialize, Serialize};
use std::fmt;

/// Short identifier of the local replica, stamped into descriptors and used
/// to advance version vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShortId(pub u64);

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

/// One replica's counter within a version vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub id: u64,
    pub value: u64,
}

/// Vector clock value. Counters are kept sorted by replica id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    counters: Vec<Counter>,
}

impl Version {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the counter for `id`, inserting it at 1 if absent.
    /// Consumes and returns the vector so call sites read as
    /// `prior.version.update(short_id)`.
    pub fn update(mut self, id: ShortId) -> Version {
        match self.counters.binary_search_by_key(&id.0, |c| c.id) {
            Ok(i) => self.counters[i].value += 1,
            Err(i) => self.counters.insert(i, Counter { id: id.0, value: 1 }),
        }
        self
    }

    pub fn counter(&self, id: u64) -> u64 {
        self.counters
            .binary_search_by_key(&id, |c| c.id)
            .map(|i| self.counters[i].value)
            .unwrap_or(0)
    }

    /// True when every counter in `other` is less than or equal to the
    /// corresponding counter here.
    pub fn ge(&self, other: &Version) -> bool {
        other.counters.iter().all(|c| self.counter(c.id) >= c.value)
    }

    /// True when this version is strictly greater than `other` in the
    /// partial order.
    pub fn dominates(&self, other: &Version) -> bool {
        self.ge(other) && self != other
    }

    /// True when neither version dominates the other and they differ.
    pub fn concurrent(&self, other: &Version) -> bool {
        !self.ge(other) && !other.ge(self)
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
