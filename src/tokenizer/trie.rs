//! Longest-prefix matching over a fixed set of vocabulary strings.
//!
//! Used to keep user-defined pieces atomic during segmentation: whenever the
//! remaining input starts with one of them, the longest such piece is consumed
//! as a single symbol that never takes part in merges.

use std::collections::HashMap;

/// A node in the prefix tree, keyed by Unicode code point.
#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<char, TrieNode>,
    /// True when the path from the root to this node spells a vocabulary word.
    is_final: bool,
}

/// Finds the longest prefix of a string that is a vocabulary word.
///
/// Built once and read-only afterwards, so a single matcher can be shared
/// by any number of threads.
#[derive(Debug, Default)]
pub struct PrefixMatcher {
    root: TrieNode,
}

impl PrefixMatcher {
    /// Build a matcher from a set of vocabulary strings.
    pub fn new<I, S>(vocab: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matcher = Self::default();
        for word in vocab {
            matcher.insert(word.as_ref());
        }
        matcher
    }

    /// Length in code points of the longest vocabulary word that prefixes
    /// `text`, or 0 if none does.
    pub fn find_prefix_len(&self, text: &str) -> usize {
        self.longest_prefix(text).0
    }

    /// Same match as [`find_prefix_len`](Self::find_prefix_len), reported as
    /// a UTF-8 byte length so callers can slice `text` directly.
    pub fn find_prefix_bytes(&self, text: &str) -> usize {
        self.longest_prefix(text).1
    }

    /// Walk the trie along `text`, returning `(code_points, bytes)` of the
    /// longest final node reached.
    fn longest_prefix(&self, text: &str) -> (usize, usize) {
        let mut node = &self.root;
        let mut best = (0, 0);

        for (i, (offset, ch)) in text.char_indices().enumerate() {
            match node.children.get(&ch) {
                Some(child) => {
                    if child.is_final {
                        best = (i + 1, offset + ch.len_utf8());
                    }
                    node = child;
                }
                None => break,
            }
        }

        best
    }

    fn insert(&mut self, word: &str) {
        let mut node = &mut self.root;
        for ch in word.chars() {
            node = node.children.entry(ch).or_default();
        }
        node.is_final = true;
    }
}
