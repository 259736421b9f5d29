use std::collections::BTreeMap;

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};

use super::TaxonStats;

#[derive(Debug, Default)]
struct TrieNode {
    /// Children sorted by key byte
    children: Vec<(u8, u32)>,
    record: Option<u32>,
}

#[derive(Debug)]
struct Trie {
    nodes: Vec<TrieNode>,
    records: Vec<(String, Mutex<TaxonStats>)>,
}
impl Trie {
    fn find(&self, key: &[u8]) -> Option<u32> {
        let mut node = 0;
        for byte in key {
            let children = &self.nodes[node].children;
            let pos = children.binary_search_by_key(byte, |&(b, _)| b).ok()?;
            node = children[pos].1 as usize;
        }
        self.nodes[node].record
    }

    fn insert(&mut self, key: &str) -> u32 {
        let mut node = 0;
        for &byte in key.as_bytes() {
            let next_id = self.nodes.len() as u32;
            let children = &mut self.nodes[node].children;
            node = match children.binary_search_by_key(&byte, |&(b, _)| b) {
                Ok(pos) => children[pos].1 as usize,
                Err(pos) => {
                    children.insert(pos, (byte, next_id));
                    self.nodes.push(TrieNode::default());
                    next_id as usize
                }
            };
        }
        *self.nodes[node].record.get_or_insert_with(|| {
            self.records
                .push((key.to_string(), Mutex::new(TaxonStats::default())));
            self.records.len() as u32 - 1
        })
    }
}

/// Per-taxon statistics keyed by taxon id in a byte trie
///
/// The trie structure sits behind a read-write lock that is only taken for
/// writing when a taxon is seen for the first time. Each record has its own
/// mutex, so consumers updating different taxa never wait on each other.
#[derive(Debug)]
pub struct StatsTrie {
    trie: RwLock<Trie>,
}
impl Default for StatsTrie {
    fn default() -> Self {
        Self::new()
    }
}
impl StatsTrie {
    #[must_use]
    pub fn new() -> Self {
        Self {
            trie: RwLock::new(Trie {
                nodes: vec![TrieNode::default()],
                records: Vec::new(),
            }),
        }
    }

    /// Applies `f` to the record of `tax_id`, creating the record if needed
    pub fn update<F, R>(&self, tax_id: &str, f: F) -> R
    where
        F: FnOnce(&mut TaxonStats) -> R,
    {
        {
            let trie = self.trie.read();
            if let Some(record) = trie.find(tax_id.as_bytes()) {
                return f(&mut trie.records[record as usize].1.lock());
            }
        }
        let mut trie = self.trie.write();
        let record = trie.insert(tax_id);
        let trie = RwLockWriteGuard::downgrade(trie);
        let out = f(&mut trie.records[record as usize].1.lock());
        out
    }

    /// Copy of the record of `tax_id`
    #[must_use]
    pub fn get(&self, tax_id: &str) -> Option<TaxonStats> {
        let trie = self.trie.read();
        trie.find(tax_id.as_bytes())
            .map(|record| trie.records[record as usize].1.lock().clone())
    }

    /// Number of taxa with a record
    #[must_use]
    pub fn len(&self) -> usize {
        self.trie.read().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the trie into records keyed by taxon id
    #[must_use]
    pub fn into_map(self) -> BTreeMap<String, TaxonStats> {
        self.trie
            .into_inner()
            .records
            .into_iter()
            .map(|(id, stats)| (id, stats.into_inner()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_creates_records() {
        let trie = StatsTrie::new();
        trie.update("562", |s| s.reads += 1);
        trie.update("562", |s| s.reads += 1);
        trie.update("56", |s| s.kmers += 3);
        trie.update("5620", |s| s.contigs += 1);
        assert_eq!(trie.len(), 3);
        assert_eq!(trie.get("562").map(|s| s.reads), Some(2));
        assert_eq!(trie.get("56").map(|s| s.kmers), Some(3));
        assert_eq!(trie.get("5620").map(|s| s.contigs), Some(1));
        assert!(trie.get("5").is_none());
        assert!(trie.get("").is_none());
    }

    #[test]
    fn test_update_returns_closure_result() {
        let trie = StatsTrie::new();
        // first call inserts the record, second finds it
        let created = trie.update("562", |s| {
            s.reads += 1;
            s.reads
        });
        let found = trie.update("562", |s| {
            s.reads += 1;
            s.reads
        });
        assert_eq!((created, found), (1, 2));
    }

    #[test]
    fn test_into_map() {
        let trie = StatsTrie::new();
        for id in ["9606", "562", "1"] {
            trie.update(id, |s| s.reads += 1);
        }
        let map = trie.into_map();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["1", "562", "9606"]);
    }

    #[test]
    fn test_concurrent_updates() {
        let trie = StatsTrie::new();
        std::thread::scope(|s| {
            for _ in 0..4 {
                let trie = &trie;
                s.spawn(move || {
                    for i in 0..1_000u64 {
                        trie.update(&(i % 50).to_string(), |s| s.kmers += 1);
                    }
                });
            }
        });
        assert_eq!(trie.len(), 50);
        let map = trie.into_map();
        assert!(map.values().all(|s| s.kmers == 80));
    }
}
