use std::collections::HashMap;

/// Key -> token sum accumulator that remembers first-seen order.
///
/// Ranking sorts stably, so equal sums keep the order in which their keys were
/// first added. That order is the only tie-break.
#[derive(Debug, Clone, Default)]
pub struct TokenTally {
    entries: Vec<(String, u64)>,
    index: HashMap<String, usize>,
}

impl TokenTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: &str, tokens: u64) {
        match self.index.get(key) {
            Some(&pos) => self.entries[pos].1 = self.entries[pos].1.saturating_add(tokens),
            None => {
                self.index.insert(key.to_string(), self.entries.len());
                self.entries.push((key.to_string(), tokens));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.index.get(key).map(|&pos| self.entries[pos].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, t)| *t).sum()
    }

    pub fn entries(&self) -> &[(String, u64)] {
        &self.entries
    }

    /// Top `n` keys by token sum, descending.
    pub fn top(&self, n: usize) -> Vec<(String, u64)> {
        top_n(self.entries.clone(), n)
    }
}

/// Sort `(key, tokens)` pairs by tokens descending and keep the first `n`.
/// Stable: ties keep input order.
pub fn top_n(mut entries: Vec<(String, u64)>, n: usize) -> Vec<(String, u64)> {
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries.truncate(n);
    entries
}
