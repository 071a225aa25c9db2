//! Insertion-ordered open-addressed string map (spec component C2).
//!
//! `FastStringMap<V>` is a fixed-capacity hash map keyed by `&str`: each
//! slot is addressed by `hash(key) % capacity` and owns a [`FastBucket`] —
//! a small densely packed `Vec` of entries that grows geometrically on
//! collision (which is simply `Vec`'s own amortised-doubling growth).
//!
//! `FastLinkedStringMap<V>` additionally threads every live entry into a
//! doubly linked sequence that reflects insertion order, so it can evict
//! the oldest entry in O(1) once a caller-supplied capacity is exceeded —
//! this is what backs the per-connection prepared-statement cache.

use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

fn bucket_index(key: &str, capacity: usize) -> usize {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % capacity.max(1)
}

struct StringEntry<V> {
    key: Box<str>,
    value: V,
}

/// A dense, array-backed collision chain owned by one hash slot. Starts at
/// capacity 1 and grows geometrically (via `Vec`'s own doubling); this
/// module does not implement a shrink policy.
struct FastBucket<V> {
    entries: Vec<StringEntry<V>>,
}

impl<V> FastBucket<V> {
    fn new() -> Self {
        Self {
            entries: Vec::with_capacity(1),
        }
    }

    fn find(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key.as_ref() == key)
    }
}

/// Fixed-capacity, open-addressed map from `&str` to `V`.
///
/// Lookup, `contains_key`, `get_or_insert_with`, and `remove` are O(1)
/// expected and never re-hash existing entries.
pub struct FastStringMap<V> {
    capacity: usize,
    buckets: Vec<FastBucket<V>>,
    len: usize,
}

impl<V> FastStringMap<V> {
    /// Creates a map with `capacity` hash slots (distinct from the number
    /// of entries it can hold, which is unbounded per slot).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buckets: (0..capacity).map(|_| FastBucket::new()).collect(),
            len: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        let idx = bucket_index(key, self.capacity);
        self.buckets[idx].find(key).is_some()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&V> {
        let idx = bucket_index(key, self.capacity);
        let bucket = &self.buckets[idx];
        bucket.find(key).map(|slot| &bucket.entries[slot].value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let idx = bucket_index(key, self.capacity);
        let bucket = &mut self.buckets[idx];
        match bucket.find(key) {
            Some(slot) => Some(&mut bucket.entries[slot].value),
            None => None,
        }
    }

    /// Inserts `key -> value`, returning the previous value if `key` was
    /// already present.
    pub fn insert(&mut self, key: impl Into<Box<str>>, value: V) -> Option<V> {
        let key = key.into();
        let idx = bucket_index(&key, self.capacity);
        let bucket = &mut self.buckets[idx];
        match bucket.find(&key) {
            Some(slot) => Some(std::mem::replace(&mut bucket.entries[slot].value, value)),
            None => {
                bucket.entries.push(StringEntry { key, value });
                self.len += 1;
                None
            }
        }
    }

    /// Returns the existing value for `key`, or computes and inserts one
    /// via `make` without re-hashing an existing entry.
    pub fn get_or_create(&mut self, key: &str, make: impl FnOnce() -> V) -> &mut V {
        let idx = bucket_index(key, self.capacity);
        let bucket = &mut self.buckets[idx];
        let slot = match bucket.find(key) {
            Some(slot) => slot,
            None => {
                bucket.entries.push(StringEntry {
                    key: key.into(),
                    value: make(),
                });
                self.len += 1;
                bucket.entries.len() - 1
            }
        };
        &mut bucket.entries[slot].value
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let idx = bucket_index(key, self.capacity);
        let bucket = &mut self.buckets[idx];
        let slot = bucket.find(key)?;
        let removed = bucket.entries.swap_remove(slot);
        self.len -= 1;
        Some(removed.value)
    }
}

/// A location of an entry inside a [`FastLinkedStringMap`]'s bucket array:
/// `(bucket index, slot index within that bucket)`.
type Loc = (u32, u32);

struct LinkedEntry<V> {
    key: Box<str>,
    value: V,
    prev: Option<Loc>,
    next: Option<Loc>,
}

struct FastLinkedBucket<V> {
    entries: Vec<LinkedEntry<V>>,
}

impl<V> FastLinkedBucket<V> {
    fn new() -> Self {
        Self {
            entries: Vec::with_capacity(1),
        }
    }

    fn find(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key.as_ref() == key)
    }
}

/// Bounded, insertion-ordered map used as an LRU: once `capacity` distinct
/// keys are live, inserting a new key evicts the oldest one first, handing
/// it to the caller-supplied `on_evict` callback.
///
/// The linked sequence is always a permutation of the live entries: every
/// insert/remove updates `head`/`tail` and the two affected neighbours in
/// the same step that mutates the owning bucket's `Vec`.
pub struct FastLinkedStringMap<V, F: FnMut(Box<str>, V)> {
    capacity: usize,
    buckets: Vec<FastLinkedBucket<V>>,
    len: usize,
    head: Option<Loc>,
    tail: Option<Loc>,
    on_evict: F,
}

impl<V, F: FnMut(Box<str>, V)> FastLinkedStringMap<V, F> {
    /// Creates a map bounded to `capacity` distinct keys. `on_evict` is
    /// called with the oldest key/value whenever an insert of a new key
    /// would exceed that capacity.
    #[must_use]
    pub fn new(capacity: usize, on_evict: F) -> Self {
        let hash_capacity = capacity.max(1);
        Self {
            capacity: hash_capacity,
            buckets: (0..hash_capacity).map(|_| FastLinkedBucket::new()).collect(),
            len: 0,
            head: None,
            tail: None,
            on_evict,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        let idx = bucket_index(key, self.capacity);
        self.buckets[idx].find(key).is_some()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&V> {
        let idx = bucket_index(key, self.capacity);
        let bucket = &self.buckets[idx];
        bucket.find(key).map(|slot| &bucket.entries[slot].value)
    }

    fn entry_mut(&mut self, loc: Loc) -> &mut LinkedEntry<V> {
        &mut self.buckets[loc.0 as usize].entries[loc.1 as usize]
    }

    fn unlink(&mut self, loc: Loc) {
        let (prev, next) = {
            let e = self.entry_mut(loc);
            (e.prev, e.next)
        };
        match prev {
            Some(p) => self.entry_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entry_mut(n).prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_back(&mut self, loc: Loc) {
        let old_tail = self.tail;
        {
            let e = self.entry_mut(loc);
            e.prev = old_tail;
            e.next = None;
        }
        match old_tail {
            Some(t) => self.entry_mut(t).next = Some(loc),
            None => self.head = Some(loc),
        }
        self.tail = Some(loc);
    }

    /// Removes the entry at `loc` from its bucket (via `swap_remove`) and
    /// the linked sequence, fixing up whichever entry moved into `loc`'s
    /// old slot. Returns the removed key/value.
    fn remove_at(&mut self, loc: Loc) -> (Box<str>, V) {
        self.unlink(loc);
        let bucket_idx = loc.0 as usize;
        let slot_idx = loc.1 as usize;
        let last_idx = self.buckets[bucket_idx].entries.len() - 1;
        let removed = self.buckets[bucket_idx].entries.swap_remove(slot_idx);
        self.len -= 1;
        if slot_idx != last_idx {
            let moved_loc = (loc.0, loc.1);
            let (p, n) = {
                let e = &self.buckets[bucket_idx].entries[slot_idx];
                (e.prev, e.next)
            };
            match p {
                Some(pp) => self.entry_mut(pp).next = Some(moved_loc),
                None => self.head = Some(moved_loc),
            }
            match n {
                Some(nn) => self.entry_mut(nn).prev = Some(moved_loc),
                None => self.tail = Some(moved_loc),
            }
        }
        (removed.key, removed.value)
    }

    /// Inserts `key -> value`. If `key` is already present its value is
    /// replaced in place (its position in the insertion order is
    /// unchanged) and the previous value is returned. Otherwise, if the
    /// map is at capacity, the oldest entry is evicted via `on_evict`
    /// before the new entry is appended at the tail.
    pub fn insert(&mut self, key: impl Into<Box<str>>, value: V) -> Option<V> {
        let key = key.into();
        let idx = bucket_index(&key, self.capacity);
        if let Some(slot) = self.buckets[idx].find(&key) {
            return Some(std::mem::replace(
                &mut self.buckets[idx].entries[slot].value,
                value,
            ));
        }

        if self.len >= self.capacity
            && let Some(head_loc) = self.head
        {
            let (ekey, evalue) = self.remove_at(head_loc);
            (self.on_evict)(ekey, evalue);
        }

        let idx = bucket_index(&key, self.capacity);
        let slot_idx = self.buckets[idx].entries.len() as u32;
        self.buckets[idx].entries.push(LinkedEntry {
            key,
            value,
            prev: None,
            next: None,
        });
        let loc = (idx as u32, slot_idx);
        self.push_back(loc);
        self.len += 1;
        None
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let idx = bucket_index(key, self.capacity);
        let slot = self.buckets[idx].find(key)?;
        let (_, value) = self.remove_at((idx as u32, slot as u32));
        Some(value)
    }
}
