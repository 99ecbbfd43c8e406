//! One size- and TTL-bounded cache tier with LRU bookkeeping.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierLevel {
    L1,
    L2,
    L3,
}

impl TierLevel {
    pub const ALL: [TierLevel; 3] = [TierLevel::L1, TierLevel::L2, TierLevel::L3];

    pub fn as_str(&self) -> &'static str {
        match self {
            TierLevel::L1 => "l1",
            TierLevel::L2 => "l2",
            TierLevel::L3 => "l3",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            TierLevel::L1 => 0,
            TierLevel::L2 => 1,
            TierLevel::L3 => 2,
        }
    }
}

impl fmt::Display for TierLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub payload: Bytes,
    pub created_at: Instant,
    pub expires_at: Instant,
    /// Access sequence number, also the entry's position in the LRU index
    pub last_access: u64,
    pub access_count: u64,
    pub tags: HashSet<String>,
    /// Write version; a higher version of the same key supersedes this one
    pub version: u64,
}

impl Entry {
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Default)]
pub(crate) struct TierState {
    pub entries: HashMap<String, Entry>,
    lru: BTreeMap<u64, String>,
    bytes: usize,
}

impl TierState {
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(&entry.last_access);
        self.bytes -= entry.size();
        Some(entry)
    }

    /// Insert `entry`, evicting least recently used entries until it fits
    /// under `max_bytes`. Returns the number of evicted entries.
    pub fn insert(&mut self, key: String, entry: Entry, max_bytes: usize) -> usize {
        self.remove(&key);

        let mut evicted = 0;
        while self.bytes + entry.size() > max_bytes {
            let Some((_, victim)) = self.lru.pop_first() else {
                break;
            };
            if let Some(old) = self.entries.remove(&victim) {
                self.bytes -= old.size();
                evicted += 1;
            }
        }

        self.bytes += entry.size();
        self.lru.insert(entry.last_access, key.clone());
        self.entries.insert(key, entry);
        evicted
    }

    /// Record an access: bump the count and move the key to the MRU end
    pub fn touch(&mut self, key: &str, sequence: u64) -> Option<&Entry> {
        let entry = self.entries.get_mut(key)?;
        self.lru.remove(&entry.last_access);
        entry.last_access = sequence;
        entry.access_count += 1;
        self.lru.insert(sequence, key.to_string());
        Some(entry)
    }

    /// Remove every entry matching `predicate`, returning how many went
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&str, &Entry) -> bool) -> usize {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, entry)| predicate(key, entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }
}

#[derive(Debug)]
pub(crate) struct Tier {
    pub level: TierLevel,
    pub max_bytes: usize,
    pub ttl: Duration,
    pub state: Mutex<TierState>,
}

impl Tier {
    pub fn new(level: TierLevel, max_bytes: usize, ttl: Duration) -> Self {
        Self {
            level,
            max_bytes,
            ttl,
            state: Mutex::new(TierState::default()),
        }
    }
}
