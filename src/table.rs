//! The hash table pair behind the dataset, with incremental rehashing.
//!
//! `Dataset` owns two table slots: T0 (the active table) and T1 (the rehash
//! target). In steady state T1 is absent and the cursor is idle. When the
//! load factor crosses a threshold, T1 is allocated at the new size and the
//! cursor starts at the last bucket of T0; every maintenance tick drains one
//! bucket into T1 until the cursor goes negative, at which point T1 becomes
//! the new T0. Lookups consult T1 first; inserts always land in T1 while it
//! exists, so T0 only ever shrinks during a rehash.

use crate::hash::murmurhash2;
use crate::list::DList;
use crate::zset::ZSet;

/// slot count of a fresh table
pub const INITIAL_TABLE_SIZE: usize = 16;
/// start expanding above this load factor
const LOAD_FACTOR_EXPAND: f64 = 0.7;
/// start contracting below this load factor (never below the initial size)
const LOAD_FACTOR_SHRINK: f64 = 0.1;

/// One stored value.
#[derive(Debug)]
pub enum Value {
    /// a string value
    Str(String),
    /// a doubly-linked list of strings
    List(DList),
    /// a sorted set
    ZSet(ZSet),
}

impl Value {
    fn mem_usage(&self) -> usize {
        match self {
            Value::Str(s) => s.capacity(),
            Value::List(list) => list.mem_usage(),
            Value::ZSet(zset) => zset.mem_usage(),
        }
    }
}

/// A key and its typed value, owned by exactly one bucket chain.
#[derive(Debug)]
pub struct Entry {
    /// the key under which the entry is stored
    pub key: String,
    /// the typed payload
    pub value: Value,
}

#[derive(Debug)]
struct Table {
    buckets: Vec<Vec<Entry>>,
    count: usize,
}

impl Table {
    fn new(size: usize) -> Self {
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, Vec::new);
        Table { buckets, count: 0 }
    }

    fn size(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_of(&self, key: &str, seed: u32) -> usize {
        murmurhash2(key.as_bytes(), seed) as usize % self.size()
    }

    fn push(&mut self, entry: Entry, seed: u32) {
        let idx = self.bucket_of(&entry.key, seed);
        self.buckets[idx].push(entry);
        self.count += 1;
    }

    fn find(&self, key: &str, seed: u32) -> Option<&Entry> {
        let idx = self.bucket_of(key, seed);
        self.buckets[idx].iter().find(|e| e.key == key)
    }

    fn find_mut(&mut self, key: &str, seed: u32) -> Option<&mut Entry> {
        let idx = self.bucket_of(key, seed);
        self.buckets[idx].iter_mut().find(|e| e.key == key)
    }

    fn take(&mut self, key: &str, seed: u32) -> Option<Entry> {
        let idx = self.bucket_of(key, seed);
        let pos = self.buckets[idx].iter().position(|e| e.key == key)?;
        self.count -= 1;
        Some(self.buckets[idx].swap_remove(pos))
    }
}

/// The keyspace: two hash tables plus the rehash cursor.
#[derive(Debug)]
pub struct Dataset {
    seed: u32,
    main: Table,
    rehash: Option<Table>,
    /// next bucket of `main` to drain; -1 = not rehashing
    cursor: i64,
}

impl Dataset {
    /// creates an empty dataset hashed with `seed`
    pub fn new(seed: u32) -> Self {
        Dataset {
            seed,
            main: Table::new(INITIAL_TABLE_SIZE),
            rehash: None,
            cursor: -1,
        }
    }

    /// live entry count across both tables
    pub fn len(&self) -> usize {
        self.main.count + self.rehash.as_ref().map_or(0, |t| t.count)
    }

    /// true when no entries are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// true while a rehash is in progress
    pub fn is_rehashing(&self) -> bool {
        self.rehash.is_some()
    }

    /// looks a key up, consulting the rehash table first
    pub fn get(&self, key: &str) -> Option<&Entry> {
        if let Some(rehash) = &self.rehash {
            if let Some(entry) = rehash.find(key, self.seed) {
                return Some(entry);
            }
        }
        self.main.find(key, self.seed)
    }

    /// mutable lookup, rehash table first
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Entry> {
        // borrow-checker friendly: probe the rehash table for existence
        // before handing out the mutable reference
        if let Some(rehash) = &mut self.rehash {
            if rehash.find(key, self.seed).is_some() {
                return rehash.find_mut(key, self.seed);
            }
        }
        self.main.find_mut(key, self.seed)
    }

    /// Adds an entry whose key must not already be present; new entries land
    /// in the rehash table while one exists.
    pub fn add(&mut self, entry: Entry) {
        let seed = self.seed;
        match &mut self.rehash {
            Some(rehash) => rehash.push(entry, seed),
            None => self.main.push(entry, seed),
        }
    }

    /// removes and returns the entry for `key` from whichever table holds it
    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        let seed = self.seed;
        if let Some(rehash) = &mut self.rehash {
            if let Some(entry) = rehash.take(key, seed) {
                return Some(entry);
            }
        }
        self.main.take(key, seed)
    }

    /// One maintenance tick: start a resize when a load-factor threshold is
    /// crossed, otherwise advance an in-progress rehash by one bucket.
    pub fn maintenance(&mut self) {
        match self.rehash {
            None => {
                let size = self.main.size() as f64;
                let count = self.main.count as f64;
                if count > LOAD_FACTOR_EXPAND * size {
                    self.start_rehash(self.main.size() * 2);
                } else if self.main.size() > INITIAL_TABLE_SIZE
                    && count < LOAD_FACTOR_SHRINK * size
                {
                    self.start_rehash(self.main.size() / 2);
                }
            }
            Some(_) => {
                self.rehash_step();
            }
        }
    }

    fn start_rehash(&mut self, new_size: usize) {
        self.cursor = self.main.size() as i64 - 1;
        self.rehash = Some(Table::new(new_size));
    }

    /// Drains the bucket at the cursor into the rehash table. Returns true
    /// while more steps remain.
    fn rehash_step(&mut self) -> bool {
        let Some(rehash) = &mut self.rehash else {
            return false;
        };

        let drained = std::mem::take(&mut self.main.buckets[self.cursor as usize]);
        self.main.count -= drained.len();
        for entry in drained {
            rehash.push(entry, self.seed);
        }
        self.cursor -= 1;

        if self.cursor < 0 {
            if let Some(rehash) = self.rehash.take() {
                self.main = rehash;
            }
            return false;
        }
        true
    }

    /// runs the current rehash (if any) to completion
    #[cfg(test)]
    pub fn finish_rehash(&mut self) {
        while self.rehash_step() {}
    }

    /// iterates every live entry, rehash table first
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        let rehash = self
            .rehash
            .iter()
            .flat_map(|t| t.buckets.iter())
            .flatten();
        rehash.chain(self.main.buckets.iter().flatten())
    }

    /// keys from both tables matching the glob `pattern`
    pub fn keys_matching(&self, pattern: &str) -> Vec<String> {
        self.iter()
            .filter(|e| crate::glob::glob_match(&e.key, pattern))
            .map(|e| e.key.clone())
            .collect()
    }

    /// approximate heap bytes owned by the dataset
    pub fn mem_usage(&self) -> usize {
        let mut total = std::mem::size_of::<Self>();
        let tables = self.rehash.iter().chain(std::iter::once(&self.main));
        for table in tables {
            total += table.buckets.capacity() * std::mem::size_of::<Vec<Entry>>();
            for bucket in &table.buckets {
                total += bucket.capacity() * std::mem::size_of::<Entry>();
                for entry in bucket {
                    total += entry.key.capacity() + entry.value.mem_usage();
                }
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_entry(key: &str, value: &str) -> Entry {
        Entry {
            key: key.to_string(),
            value: Value::Str(value.to_string()),
        }
    }

    fn value_of<'a>(dataset: &'a Dataset, key: &str) -> Option<&'a str> {
        match dataset.get(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Some(s),
            _ => None,
        }
    }

    #[test]
    fn add_get_remove() {
        let mut dataset = Dataset::new(7);
        dataset.add(string_entry("author", "cch137"));
        assert_eq!(value_of(&dataset, "author"), Some("cch137"));
        assert_eq!(dataset.len(), 1);

        let removed = dataset.remove("author").expect("entry present");
        assert_eq!(removed.key, "author");
        assert!(dataset.get("author").is_none());
        assert!(dataset.is_empty());
        assert!(dataset.remove("author").is_none());
    }

    #[test]
    fn count_matches_chain_lengths() {
        let mut dataset = Dataset::new(3);
        for i in 0..100 {
            dataset.add(string_entry(&format!("k{i}"), "v"));
            dataset.maintenance();
        }
        let chained: usize = dataset
            .main
            .buckets
            .iter()
            .map(Vec::len)
            .chain(
                dataset
                    .rehash
                    .iter()
                    .flat_map(|t| t.buckets.iter().map(Vec::len)),
            )
            .sum();
        assert_eq!(chained, dataset.len());
        assert_eq!(dataset.len(), 100);
    }

    #[test]
    fn expansion_triggers_and_preserves_contents() {
        let mut dataset = Dataset::new(42);
        // 12 > 0.7 * 16 starts an expansion on the next tick
        for i in 0..12 {
            dataset.add(string_entry(&format!("k{i}"), &format!("v{i}")));
        }
        assert!(!dataset.is_rehashing());
        dataset.maintenance();
        assert!(dataset.is_rehashing());

        // entries stay reachable mid-rehash
        for i in 0..12 {
            assert_eq!(
                value_of(&dataset, &format!("k{i}")),
                Some(format!("v{i}").as_str())
            );
        }

        dataset.finish_rehash();
        assert!(!dataset.is_rehashing());
        assert_eq!(dataset.main.size(), 32);
        assert_eq!(dataset.len(), 12);
        for i in 0..12 {
            assert_eq!(
                value_of(&dataset, &format!("k{i}")),
                Some(format!("v{i}").as_str())
            );
        }
    }

    #[test]
    fn contraction_triggers_below_threshold() {
        let mut dataset = Dataset::new(1);
        for i in 0..32 {
            dataset.add(string_entry(&format!("k{i}"), "v"));
            dataset.maintenance();
        }
        while dataset.is_rehashing() {
            dataset.maintenance();
        }
        let grown = dataset.main.size();
        assert!(grown > INITIAL_TABLE_SIZE);

        for i in 0..32 {
            dataset.remove(&format!("k{i}"));
        }
        dataset.maintenance();
        assert!(dataset.is_rehashing());
        dataset.finish_rehash();
        assert!(dataset.main.size() < grown);
    }

    #[test]
    fn never_contracts_below_initial_size() {
        let mut dataset = Dataset::new(9);
        for _ in 0..100 {
            dataset.maintenance();
        }
        assert_eq!(dataset.main.size(), INITIAL_TABLE_SIZE);
        assert!(!dataset.is_rehashing());
    }

    #[test]
    fn inserts_during_rehash_land_in_the_new_table() {
        let mut dataset = Dataset::new(5);
        for i in 0..12 {
            dataset.add(string_entry(&format!("k{i}"), "v"));
        }
        dataset.maintenance();
        assert!(dataset.is_rehashing());
        dataset.add(string_entry("fresh", "value"));
        assert_eq!(value_of(&dataset, "fresh"), Some("value"));
        dataset.finish_rehash();
        assert_eq!(value_of(&dataset, "fresh"), Some("value"));
        assert_eq!(dataset.len(), 13);
    }

    #[test]
    fn removal_works_from_either_table_mid_rehash() {
        let mut dataset = Dataset::new(5);
        for i in 0..12 {
            dataset.add(string_entry(&format!("k{i}"), "v"));
        }
        dataset.maintenance();
        dataset.maintenance(); // one bucket drained
        for i in 0..12 {
            assert!(dataset.remove(&format!("k{i}")).is_some(), "k{i}");
        }
        assert!(dataset.is_empty());
    }

    #[test]
    fn keys_matching_filters_over_both_tables() {
        let mut dataset = Dataset::new(11);
        dataset.add(string_entry("user:1", "a"));
        dataset.add(string_entry("user:2", "b"));
        dataset.add(string_entry("admin:x", "c"));
        let mut keys = dataset.keys_matching("user:*");
        keys.sort();
        assert_eq!(keys, ["user:1", "user:2"]);
    }

    #[test]
    fn mem_usage_grows_with_contents() {
        let mut dataset = Dataset::new(2);
        let empty = dataset.mem_usage();
        dataset.add(string_entry("key", &"x".repeat(1024)));
        assert!(dataset.mem_usage() > empty + 1024);
    }
}
