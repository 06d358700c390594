use std::collections::HashMap;

/// Default number of canonical words kept in the dictionary cache.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Bounded, recency-biased map from canonical word to word id.
///
/// Two generations are kept. New and recently hit entries live in `hot`;
/// when `hot` fills half of the capacity it becomes `cold` and the previous
/// `cold` generation is dropped. A hit in `cold` promotes the entry back to
/// `hot`, so words that keep being used survive rotations.
///
/// Every [`WordCache::clear`] starts a new epoch. Words learned by a
/// transaction that began in an older epoch must not be inserted.
#[derive(Debug)]
pub struct WordCache {
    capacity: usize,
    epoch: u64,
    hot: HashMap<String, u64>,
    cold: HashMap<String, u64>,
}

impl WordCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            epoch: 0,
            hot: HashMap::with_capacity(capacity / 2),
            cold: HashMap::new(),
        }
    }

    pub fn get(&mut self, word: &str) -> Option<u64> {
        if let Some(&id) = self.hot.get(word) {
            return Some(id);
        }
        let id = self.cold.remove(word)?;
        self.insert(word.to_string(), id);
        Some(id)
    }

    pub fn insert(&mut self, word: String, id: u64) {
        if self.hot.len() >= self.capacity / 2 && !self.hot.contains_key(&word)
        {
            self.cold = std::mem::take(&mut self.hot);
        }
        self.hot.insert(word, id);
    }

    pub fn len(&self) -> usize {
        self.hot.len() + self.cold.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn clear(&mut self) {
        self.hot.clear();
        self.cold.clear();
        self.epoch += 1;
    }
}

impl Default for WordCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_after_insert() {
        let mut cache = WordCache::new(10);
        cache.insert("hello".into(), 1);
        assert_eq!(cache.get("hello"), Some(1));
        assert_eq!(cache.get("world"), None);
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut cache = WordCache::new(10);
        for i in 0..100 {
            cache.insert(format!("w{i}"), i);
            assert!(cache.len() <= 10);
        }
        assert_eq!(cache.get("w99"), Some(99));
        assert_eq!(cache.get("w0"), None);
    }

    #[test]
    fn recently_used_entries_survive_rotation() {
        let mut cache = WordCache::new(4);
        cache.insert("keep".into(), 1);
        cache.insert("a".into(), 2);
        // "keep" and "a" rotate to cold on the next insert
        cache.insert("b".into(), 3);
        assert_eq!(cache.get("keep"), Some(1));
        cache.insert("c".into(), 4);
        assert_eq!(cache.get("keep"), Some(1));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn clear_empties_both_generations() {
        let mut cache = WordCache::new(4);
        for i in 0..4 {
            cache.insert(format!("w{i}"), i);
        }
        let before = cache.epoch();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.epoch(), before + 1);
    }
}
