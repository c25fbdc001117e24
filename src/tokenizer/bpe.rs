//! BPE (Byte-Pair Encoding) tokenizer for SentencePiece models.
//!
//! Merges are ranked by the score of the merged piece in the vocabulary
//! (higher score = merged earlier), with ties broken by position so that the
//! leftmost pair wins. The same `(model, text)` always produces the same
//! tokens.
//!
//! Encoding runs in five steps:
//! 1. Replace every space with the `\u{2581}` word-boundary marker.
//! 2. Segment: user-defined pieces are consumed whole (longest match first)
//!    and never merged; everything else starts out as one symbol per code point.
//! 3. Seed a [`MergeQueue`] with every adjacent mergeable pair whose
//!    concatenation is a vocabulary piece.
//! 4. Repeatedly apply the best live candidate, absorbing the right symbol
//!    into the left one and proposing the two new neighbouring pairs.
//! 5. Map each final symbol to an id, spelling unknown symbols out as
//!    `<0xHH>` byte pieces when the model has byte-fallback.
//!
//! Symbols live in a flat arena linked by index. A symbol covers a byte range
//! of the normalized text, which stays contiguous because merges only ever
//! join neighbours; a symbol absorbed by its left neighbour is tombstoned by
//! collapsing its range to empty.

use std::cmp::Ordering;
use std::path::Path;

use tracing::{debug, trace};

use super::byte_fallback::ByteFallbackCodec;
use super::model::{ModelIndex, ParsedModel, PieceKind};
use super::queue::MergeQueue;
use super::trie::PrefixMatcher;
use super::{ModelInfo, Token, TokenBytes, Tokenizer};
use crate::error::TokenizerError;

/// The SentencePiece word-boundary marker character.
pub const SPIECE_UNDERLINE: char = '\u{2581}';

const SYMBOL_BOS: &str = "<bos>";
const SYMBOL_EOS: &str = "<eos>";
const SYMBOL_PAD: &str = "<pad>";

/// Score-based BPE tokenizer over a validated SentencePiece vocabulary.
///
/// Immutable once built; share it behind an `Arc` for concurrent use. Each
/// `encode` call owns its own symbol arena and merge queue.
#[derive(Debug)]
pub struct BpeTokenizer {
    index: ModelIndex,
    bytes: ByteFallbackCodec,
    /// Matches USER_DEFINED pieces during segmentation.
    user_defined: PrefixMatcher,
}

impl BpeTokenizer {
    /// Validate `model` and build the tokenizer.
    ///
    /// Fails with [`TokenizerError::ModelIntegrity`] for a malformed model;
    /// no encode call can fail for that reason afterwards.
    pub fn new(model: ParsedModel) -> Result<Self, TokenizerError> {
        let index = ModelIndex::new(model)?;
        let bytes = ByteFallbackCodec::new(&index)?;
        let user_defined = PrefixMatcher::new(index.user_defined_pieces());

        debug!(
            vocab_size = index.len(),
            user_defined = index.user_defined_pieces().count(),
            byte_fallback = index.byte_fallback(),
            unknown_id = index.unknown_id(),
            "BPE tokenizer initialized"
        );

        Ok(Self {
            index,
            bytes,
            user_defined,
        })
    }

    /// Build a tokenizer from a JSON vocabulary file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TokenizerError> {
        Self::new(ParsedModel::from_file(path)?)
    }

    pub fn index(&self) -> &ModelIndex {
        &self.index
    }

    /// Decode, silently skipping ids outside the vocabulary.
    pub fn decode_lossy(&self, ids: &[u32]) -> String {
        self.decode_with(ids, InvalidIdPolicy::Skip).unwrap_or_default()
    }

    /// Encode `text` and report the raw bytes each token stands for.
    pub fn compute_tokens(&self, text: &str) -> Vec<TokenBytes> {
        self.encode(text)
            .into_iter()
            .map(|token| TokenBytes {
                bytes: self.token_bytes(&token),
                id: token.id,
            })
            .collect()
    }

    /// Bytes a token contributes to the decoded text: the byte value of a
    /// `<0xHH>` piece, otherwise the UTF-8 of its text with markers as spaces.
    pub fn token_bytes(&self, token: &Token) -> Vec<u8> {
        match self.bytes.byte_for_id(token.id) {
            Some(byte) => vec![byte],
            None => replace_separators(&token.text).into_bytes(),
        }
    }

    /// Decode the ids of previously encoded tokens.
    pub fn decode_tokens(&self, tokens: &[Token]) -> Result<String, TokenizerError> {
        let ids: Vec<u32> = tokens.iter().map(|t| t.id).collect();
        self.decode(&ids)
    }

    /// Split normalized text into the initial symbol list.
    fn segment(&self, text: &str) -> Vec<Symbol> {
        let mut symbols = Vec::new();
        let mut pos = 0;

        while pos < text.len() {
            let rest = &text[pos..];
            let (len, no_merge) = match self.user_defined.find_prefix_bytes(rest) {
                0 => (rest.chars().next().map_or(1, char::len_utf8), false),
                n => (n, true),
            };
            let i = symbols.len() as isize;
            symbols.push(Symbol {
                start: pos,
                end: pos + len,
                prev: i - 1,
                next: i + 1,
                no_merge,
            });
            pos += len;
        }

        if let Some(last) = symbols.last_mut() {
            last.next = -1;
        }
        symbols
    }

    /// Run the merge loop to completion over `symbols`.
    fn merge(&self, text: &str, symbols: &mut [Symbol]) -> MergeStats {
        let mut queue: CandidateQueue =
            MergeQueue::new(symbols.len(), compare_candidates as CandidateOrder);

        for i in 1..symbols.len() {
            self.suggest_merge(text, symbols, &mut queue, i as isize - 1, i as isize);
        }

        // Estimated number of stale candidates still queued.
        let mut dead = 0usize;
        let mut stats = MergeStats::default();

        while let Some(candidate) = queue.pop_max() {
            if candidate.is_dead(symbols) {
                dead = dead.saturating_sub(1);
                continue;
            }

            if dead * 3 > queue.len() {
                let removed = queue.remove_func(|c| c.is_dead(symbols));
                trace!(removed, remaining = queue.len(), "compacted merge queue");
                stats.compactions += 1;
                stats.removed += removed;
                dead = 0;
            }

            self.apply_merge(text, symbols, &candidate);
            stats.merges += 1;
            // The absorbed symbol invalidates whatever else referenced it.
            dead += 1;

            let left = candidate.left as isize;
            self.suggest_merge(text, symbols, &mut queue, symbols[candidate.left].prev, left);
            self.suggest_merge(text, symbols, &mut queue, left, symbols[candidate.left].next);
        }

        stats
    }

    /// Absorb `candidate.right` into `candidate.left` and relink the list.
    ///
    /// # Panics
    ///
    /// If the merged text is not a vocabulary piece. Live candidates are only
    /// ever built from known pieces, so this means the arena is corrupted.
    fn apply_merge(&self, text: &str, symbols: &mut [Symbol], candidate: &MergeCandidate) {
        let (l, r) = (candidate.left, candidate.right);
        let merged = &text[symbols[l].start..symbols[r].end];
        if self.index.text_piece_id(merged).is_none() {
            panic!(
                "merge candidate {:?} (symbols {} and {}) is missing from the vocabulary",
                merged, l, r
            );
        }

        let right_next = symbols[r].next;
        symbols[l].end = symbols[r].end;
        symbols[l].next = right_next;
        if right_next >= 0 {
            symbols[right_next as usize].prev = l as isize;
        }
        symbols[r].end = symbols[r].start;
    }

    /// Queue `(left, right)` if both exist, both may merge, and their
    /// concatenation is a vocabulary piece.
    fn suggest_merge(
        &self,
        text: &str,
        symbols: &[Symbol],
        queue: &mut CandidateQueue,
        left: isize,
        right: isize,
    ) {
        if left < 0 || right < 0 {
            return;
        }
        let (l, r) = (left as usize, right as usize);
        if symbols[l].no_merge || symbols[r].no_merge {
            return;
        }

        let merged = &text[symbols[l].start..symbols[r].end];
        if let Some(id) = self.index.text_piece_id(merged) {
            queue.insert(MergeCandidate {
                left: l,
                right: r,
                length: merged.len(),
                score: self.index.score(id).unwrap_or_default(),
            });
        }
    }

    /// Walk the final symbol list and map every symbol to tokens.
    fn resolve(&self, text: &str, symbols: &[Symbol]) -> Vec<Token> {
        let mut tokens = Vec::with_capacity(symbols.len());
        let mut i = 0isize;

        while i >= 0 {
            let sym = &symbols[i as usize];
            let piece = sym.text(text);
            let id = self.index.symbol_to_id(piece);

            if id == self.index.unknown_id() && self.index.byte_fallback() {
                self.bytes.encode_bytes(piece, &mut tokens);
            } else {
                tokens.push(Token {
                    id,
                    text: piece.to_string(),
                });
            }
            i = sym.next;
        }

        tokens
    }

    fn decode_with(&self, ids: &[u32], policy: InvalidIdPolicy) -> Result<String, TokenizerError> {
        let mut text = String::new();
        let mut i = 0;

        while i < ids.len() {
            // Collapse the run of byte pieces starting at `i`.
            let run_end = ids[i..]
                .iter()
                .position(|&id| !self.index.is_byte(id))
                .map_or(ids.len(), |offset| i + offset);
            if run_end > i {
                text.push_str(&self.bytes.decode_run(&ids[i..run_end]));
            }
            if run_end == ids.len() {
                break;
            }

            let id = ids[run_end];
            match self.index.piece(id) {
                Some(piece) => match piece.kind {
                    PieceKind::Control => {}
                    PieceKind::Unknown => text.push_str(self.index.unknown_surface()),
                    _ => text.push_str(&replace_separators(&piece.text)),
                },
                None if policy == InvalidIdPolicy::Reject => {
                    return Err(TokenizerError::InvalidTokenId {
                        id,
                        vocab_size: self.index.len(),
                    });
                }
                None => {}
            }
            i = run_end + 1;
        }

        Ok(text)
    }

    /// Id of a reserved symbol, if it resolves to a CONTROL piece.
    fn control_id(&self, symbol: &str) -> Option<u32> {
        let id = self.index.symbol_to_id(symbol);
        self.index.is_control(id).then_some(id)
    }
}

impl Tokenizer for BpeTokenizer {
    fn encode(&self, text: &str) -> Vec<Token> {
        let text = normalize(text);
        let mut symbols = self.segment(&text);
        if symbols.is_empty() {
            return Vec::new();
        }
        let stats = self.merge(&text, &mut symbols);
        trace!(
            symbols = symbols.len(),
            merges = stats.merges,
            compactions = stats.compactions,
            removed = stats.removed,
            "merge loop finished"
        );
        self.resolve(&text, &symbols)
    }

    fn decode(&self, ids: &[u32]) -> Result<String, TokenizerError> {
        self.decode_with(ids, InvalidIdPolicy::Reject)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            vocabulary_size: self.index.len(),
            beginning_of_sentence_id: self.control_id(SYMBOL_BOS),
            end_of_sentence_id: self.control_id(SYMBOL_EOS),
            pad_id: self.control_id(SYMBOL_PAD),
            unknown_id: self.index.unknown_id(),
        }
    }
}

/// Replace every space with the word-boundary marker.
fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| if c == ' ' { SPIECE_UNDERLINE } else { c })
        .collect()
}

/// Replace every word-boundary marker with a space.
fn replace_separators(text: &str) -> String {
    text.chars()
        .map(|c| if c == SPIECE_UNDERLINE { ' ' } else { c })
        .collect()
}

// ---------------------------------------------------------------------------
// Internal types
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InvalidIdPolicy {
    Reject,
    Skip,
}

/// A symbol in the BPE linked list: the byte range `start..end` of the
/// normalized text. `prev`/`next` of -1 means "no neighbour".
#[derive(Clone, Debug, PartialEq, Eq)]
struct Symbol {
    start: usize,
    end: usize,
    prev: isize,
    next: isize,
    /// User-defined pieces never merge with their neighbours.
    no_merge: bool,
}

impl Symbol {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// Counters from one run of the merge loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct MergeStats {
    merges: usize,
    /// Times the queue was purged of stale candidates.
    compactions: usize,
    /// Stale candidates dropped by those purges.
    removed: usize,
}

/// A queued merge of two adjacent symbols.
#[derive(Clone, Debug, PartialEq)]
struct MergeCandidate {
    left: usize,
    right: usize,
    /// Byte length of the merged text when the candidate was queued.
    length: usize,
    score: f32,
}

impl MergeCandidate {
    /// A candidate is dead once either side was tombstoned or grew through
    /// another merge since it was queued.
    fn is_dead(&self, symbols: &[Symbol]) -> bool {
        let left = symbols[self.left].len();
        let right = symbols[self.right].len();
        left == 0 || right == 0 || left + right != self.length
    }
}

type CandidateOrder = fn(&MergeCandidate, &MergeCandidate) -> Ordering;
type CandidateQueue = MergeQueue<MergeCandidate, CandidateOrder>;

/// Higher score first; on equal scores the leftmost pair first.
fn compare_candidates(a: &MergeCandidate, b: &MergeCandidate) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then_with(|| b.left.cmp(&a.left))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::model::Piece;
    use std::sync::Arc;

    const UNDERLINE: &str = "\u{2581}";

    // -----------------------------------------------------------------------
    // Fixtures
    // -----------------------------------------------------------------------

    /// Minimal vocabulary: `a`, `b`, `ab` (score 1.0) and the marker.
    ///
    ///   0: <unk>  1: a  2: b  3: ab  4: \u{2581}
    fn make_ab_tokenizer() -> BpeTokenizer {
        let pieces = vec![
            Piece::new("<unk>", 0.0, PieceKind::Unknown),
            Piece::new("a", 0.0, PieceKind::Normal),
            Piece::new("b", 0.0, PieceKind::Normal),
            Piece::new("ab", 1.0, PieceKind::Normal),
            Piece::new(UNDERLINE, 0.0, PieceKind::Normal),
        ];
        BpeTokenizer::new(ParsedModel::new(pieces, "<?>", false)).unwrap()
    }

    /// Vocabulary with merge chains up to `hello` and `\u{2581}world`, plus
    /// two user-defined turn markers.
    ///
    /// Merge chains:
    ///   h + e -> he -> hel -> hell -> hello
    ///   \u{2581} + w -> \u{2581}w -> \u{2581}wo -> ... -> \u{2581}world
    fn make_spm_tokenizer() -> BpeTokenizer {
        let u = UNDERLINE;
        let normal = |text: &str, score: f32| Piece::new(text, score, PieceKind::Normal);
        let pieces = vec![
            Piece::new("<pad>", 0.0, PieceKind::Control),              // 0
            Piece::new("<bos>", 0.0, PieceKind::Control),              // 1
            Piece::new("<eos>", 0.0, PieceKind::Control),              // 2
            Piece::new("<unk>", 0.0, PieceKind::Unknown),              // 3
            normal(u, -5.0),                                           // 4
            normal("h", -5.0),                                         // 5
            normal("e", -5.0),                                         // 6
            normal("l", -5.0),                                         // 7
            normal("o", -5.0),                                         // 8
            normal("w", -5.0),                                         // 9
            normal("r", -5.0),                                         // 10
            normal("d", -5.0),                                         // 11
            normal("he", -4.0),                                        // 12
            normal("ll", -4.0),                                        // 13
            normal("lo", -4.0),                                        // 14
            normal("wo", -4.0),                                        // 15
            normal("or", -4.0),                                        // 16
            normal("rl", -4.0),                                        // 17
            normal("ld", -4.0),                                        // 18
            normal("hel", -3.0),                                       // 19
            normal("hell", -2.0),                                      // 20
            normal("hello", -1.0),                                     // 21
            normal(&format!("{}w", u), -3.5),                          // 22
            normal(&format!("{}wo", u), -3.0),                         // 23
            normal(&format!("{}wor", u), -2.5),                        // 24
            normal(&format!("{}worl", u), -1.5),                       // 25
            normal(&format!("{}world", u), -0.5),                      // 26
            Piece::new("<start_of_turn>", 0.0, PieceKind::UserDefined), // 27
            Piece::new("<end_of_turn>", 0.0, PieceKind::UserDefined),   // 28
        ];
        BpeTokenizer::new(ParsedModel::new(pieces, " \u{2047} ", false)).unwrap()
    }

    /// Byte-fallback vocabulary:
    ///
    ///   0: <pad>  1: <unk>  2..=257: <0x00>..<0xFF>
    ///   258: \u{2581}  259: a  260: b  261: ab
    fn make_byte_fallback_tokenizer() -> BpeTokenizer {
        let mut pieces = vec![
            Piece::new("<pad>", 0.0, PieceKind::Control),
            Piece::new("<unk>", 0.0, PieceKind::Unknown),
        ];
        for b in 0..=255u8 {
            pieces.push(Piece::new(format!("<0x{:02X}>", b), 0.0, PieceKind::Byte));
        }
        pieces.push(Piece::new(UNDERLINE, 0.0, PieceKind::Normal));
        pieces.push(Piece::new("a", 0.0, PieceKind::Normal));
        pieces.push(Piece::new("b", 0.0, PieceKind::Normal));
        pieces.push(Piece::new("ab", 1.0, PieceKind::Normal));
        BpeTokenizer::new(ParsedModel::new(pieces, "<?>", true)).unwrap()
    }

    fn token(id: u32, text: &str) -> Token {
        Token {
            id,
            text: text.to_string(),
        }
    }

    fn symbol(start: usize, end: usize, prev: isize, next: isize, no_merge: bool) -> Symbol {
        Symbol {
            start,
            end,
            prev,
            next,
            no_merge,
        }
    }

    fn candidate(left: usize, right: usize, score: f32) -> MergeCandidate {
        MergeCandidate {
            left,
            right,
            length: right - left + 1,
            score,
        }
    }

    fn byte_id(b: u8) -> u32 {
        b as u32 + 2
    }

    fn ids(tokens: &[Token]) -> Vec<u32> {
        tokens.iter().map(|t| t.id).collect()
    }

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    #[test]
    fn test_merge_preferred_over_split() {
        let tok = make_ab_tokenizer();
        let tokens = tok.encode("ab");
        assert_eq!(tokens, vec![token(3, "ab")]);
    }

    #[test]
    fn test_no_merge_across_separator() {
        let tok = make_ab_tokenizer();
        let tokens = tok.encode("a b");
        assert_eq!(ids(&tokens), vec![1, 4, 2]);
        assert_eq!(texts(&tokens), vec!["a", UNDERLINE, "b"]);
    }

    #[test]
    fn test_encode_empty() {
        let tok = make_spm_tokenizer();
        assert!(tok.encode("").is_empty());
        assert!(tok.encode_ids("").is_empty());
    }

    #[test]
    fn test_encode_hello_world() {
        let tok = make_spm_tokenizer();
        let tokens = tok.encode("hello world");
        let world = format!("{}world", UNDERLINE);
        assert_eq!(ids(&tokens), vec![21, 26]);
        assert_eq!(texts(&tokens), vec!["hello", world.as_str()]);
    }

    #[test]
    fn test_encode_repeated_words() {
        let tok = make_spm_tokenizer();
        // No piece starts with the marker followed by "h", so it stays alone.
        let ids = tok.encode_ids("hello hello");
        assert_eq!(ids, vec![21, 4, 21]);
    }

    #[test]
    fn test_equal_scores_merge_leftmost_first() {
        let tok = make_spm_tokenizer();
        // "ll" is available at positions 0 and 1 with the same score.
        assert_eq!(tok.encode_ids("lll"), vec![13, 7]);
        assert_eq!(tok.encode_ids("llll"), vec![13, 13]);
    }

    #[test]
    fn test_higher_score_beats_position() {
        let tok = make_spm_tokenizer();
        // "he" and "lo" tie at -4; "he" is leftmost, and the follow-up "hel"
        // (-3) takes the "l" before "lo" is popped.
        assert_eq!(tok.encode_ids("helo"), vec![19, 8]);
    }

    #[test]
    fn test_long_input_merges_every_word() {
        let tok = make_spm_tokenizer();
        let input = "hello ".repeat(200);
        let ids = tok.encode_ids(&input);
        assert_eq!(ids.len(), 400);
        for pair in ids.chunks(2) {
            assert_eq!(pair, &[21, 4]);
        }
    }

    #[test]
    fn test_long_run_of_identical_pairs() {
        let tok = make_spm_tokenizer();
        let ids = tok.encode_ids(&"l".repeat(1001));
        assert_eq!(ids.len(), 501);
        assert!(ids[..500].iter().all(|&id| id == 13));
        assert_eq!(ids[500], 7);
    }

    #[test]
    fn test_user_defined_pieces_are_atomic() {
        let tok = make_spm_tokenizer();
        let tokens = tok.encode("<start_of_turn>hello<end_of_turn>");
        assert_eq!(ids(&tokens), vec![27, 21, 28]);
        assert_eq!(texts(&tokens), vec!["<start_of_turn>", "hello", "<end_of_turn>"]);
    }

    #[test]
    fn test_user_defined_piece_blocks_merge() {
        let tok = make_spm_tokenizer();
        // Without the marker in between, "he" would merge.
        assert_eq!(tok.encode_ids("h<end_of_turn>e"), vec![5, 28, 6]);
    }

    #[test]
    fn test_control_text_is_not_special_in_input() {
        let tok = make_spm_tokenizer();
        // "<bos>" is CONTROL, not USER_DEFINED: it is segmented as plain text.
        let tokens = tok.encode("<bos>");
        assert_eq!(ids(&tokens), vec![3, 3, 8, 3, 3]);
        assert_eq!(texts(&tokens), vec!["<", "b", "o", "s", ">"]);
    }

    #[test]
    fn test_unknown_without_byte_fallback() {
        let tok = make_spm_tokenizer();
        let tokens = tok.encode("x\u{4e16}");
        assert_eq!(tokens, vec![token(3, "x"), token(3, "\u{4e16}")]);
    }

    #[test]
    fn test_only_space() {
        let tok = make_spm_tokenizer();
        assert_eq!(tok.encode_ids(" "), vec![4]);
        assert_eq!(tok.encode_ids("  "), vec![4, 4]);
    }

    #[test]
    fn test_deterministic() {
        let tok = make_spm_tokenizer();
        let text = "hello world hello<end_of_turn> lll world";
        let first = tok.encode(text);
        for _ in 0..10 {
            assert_eq!(tok.encode(text), first);
        }
    }

    // -----------------------------------------------------------------------
    // Byte fallback
    // -----------------------------------------------------------------------

    #[test]
    fn test_byte_fallback_spells_out_unknown() {
        let tok = make_byte_fallback_tokenizer();
        let tokens = tok.encode("\u{e9}"); // 0xC3 0xA9
        assert_eq!(ids(&tokens), vec![byte_id(0xC3), byte_id(0xA9)]);
        assert_eq!(texts(&tokens), vec!["<0xC3>", "<0xA9>"]);
    }

    #[test]
    fn test_byte_fallback_mixed_with_pieces() {
        let tok = make_byte_fallback_tokenizer();
        let tokens = tok.encode("ab \u{e9}");
        assert_eq!(ids(&tokens), vec![261, 258, byte_id(0xC3), byte_id(0xA9)]);
    }

    #[test]
    fn test_byte_fallback_total_coverage() {
        let tok = make_byte_fallback_tokenizer();
        for text in ["\u{65e5}\u{672c}\u{8a9e}", "\u{1F600}", "xyz", "\u{0}\u{7f}"] {
            let tokens = tok.encode(text);
            assert_eq!(tokens.len(), text.len(), "text {:?}", text);
            assert!(tokens.iter().all(|t| tok.index().is_byte(t.id)));
        }
    }

    #[test]
    fn test_byte_fallback_never_emits_unknown() {
        let tok = make_byte_fallback_tokenizer();
        let unk = tok.index().unknown_id();
        let tokens = tok.encode("q\u{2603} ab z");
        assert!(tokens.iter().all(|t| t.id != unk));
    }

    // -----------------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------------

    #[test]
    fn test_decode_empty() {
        let tok = make_spm_tokenizer();
        assert_eq!(tok.decode(&[]).unwrap(), "");
        assert_eq!(tok.decode_lossy(&[]), "");
    }

    #[test]
    fn test_decode_replaces_marker() {
        let tok = make_spm_tokenizer();
        assert_eq!(tok.decode(&[21, 26]).unwrap(), "hello world");
        assert_eq!(tok.decode(&[4, 4]).unwrap(), "  ");
    }

    #[test]
    fn test_decode_control_contributes_nothing() {
        let tok = make_spm_tokenizer();
        assert_eq!(tok.decode(&[1, 21, 2, 0]).unwrap(), "hello");
        assert_eq!(tok.decode(&[1, 2]).unwrap(), "");
    }

    #[test]
    fn test_decode_unknown_surface() {
        let tok = make_spm_tokenizer();
        assert_eq!(tok.decode(&[21, 3]).unwrap(), "hello \u{2047} ");
        let tok = make_byte_fallback_tokenizer();
        assert_eq!(tok.decode(&[1]).unwrap(), "<?>");
    }

    #[test]
    fn test_decode_user_defined_as_text() {
        let tok = make_spm_tokenizer();
        assert_eq!(tok.decode(&[27, 21]).unwrap(), "<start_of_turn>hello");
    }

    #[test]
    fn test_decode_byte_runs() {
        let tok = make_byte_fallback_tokenizer();
        let ids = [
            byte_id(b'h'),
            byte_id(b'i'),
            258,
            byte_id(0xE2),
            byte_id(0x98),
            byte_id(0x83),
            259,
        ];
        assert_eq!(tok.decode(&ids).unwrap(), "hi \u{2603}a");
    }

    #[test]
    fn test_decode_partial_byte_run_is_lenient() {
        let tok = make_byte_fallback_tokenizer();
        assert_eq!(tok.decode(&[byte_id(0xC3)]).unwrap(), "\u{FFFD}");
        // A non-byte id splits the run; each half decodes on its own.
        assert_eq!(
            tok.decode(&[byte_id(0xC3), 259, byte_id(0xA9)]).unwrap(),
            "\u{FFFD}a\u{FFFD}"
        );
    }

    #[test]
    fn test_decode_out_of_range_id_is_rejected() {
        let tok = make_spm_tokenizer();
        match tok.decode(&[21, 9999]) {
            Err(TokenizerError::InvalidTokenId { id, vocab_size }) => {
                assert_eq!(id, 9999);
                assert_eq!(vocab_size, 29);
            }
            other => panic!("expected InvalidTokenId, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_lossy_skips_out_of_range_id() {
        let tok = make_spm_tokenizer();
        assert_eq!(tok.decode_lossy(&[9999]), "");
        assert_eq!(tok.decode_lossy(&[21, 9999, 26]), "hello world");
    }

    #[test]
    fn test_decode_invalid_id_inside_byte_run() {
        let tok = make_byte_fallback_tokenizer();
        let ids = [byte_id(0xC3), 70_000, byte_id(0xA9)];
        assert!(matches!(
            tok.decode(&ids),
            Err(TokenizerError::InvalidTokenId { id: 70_000, .. })
        ));
        assert_eq!(tok.decode_lossy(&ids), "\u{FFFD}\u{FFFD}");
    }

    #[test]
    fn test_decode_tokens() {
        let tok = make_spm_tokenizer();
        let tokens = tok.encode("hello world");
        assert_eq!(tok.decode_tokens(&tokens).unwrap(), "hello world");
    }

    // -----------------------------------------------------------------------
    // Token bytes
    // -----------------------------------------------------------------------

    #[test]
    fn test_compute_tokens_with_byte_fallback() {
        let tok = make_byte_fallback_tokenizer();
        let computed = tok.compute_tokens("ab \u{e9}");
        let expected = vec![
            TokenBytes {
                id: 261,
                bytes: b"ab".to_vec(),
            },
            TokenBytes {
                id: 258,
                bytes: b" ".to_vec(),
            },
            TokenBytes {
                id: byte_id(0xC3),
                bytes: vec![0xC3],
            },
            TokenBytes {
                id: byte_id(0xA9),
                bytes: vec![0xA9],
            },
        ];
        assert_eq!(computed, expected);
    }

    #[test]
    fn test_compute_tokens_replaces_marker() {
        let tok = make_spm_tokenizer();
        let bytes: Vec<Vec<u8>> = tok
            .compute_tokens("hello world")
            .into_iter()
            .map(|t| t.bytes)
            .collect();
        assert_eq!(bytes, vec![b"hello".to_vec(), b" world".to_vec()]);
    }

    #[test]
    fn test_token_bytes_of_unknown_keeps_symbol_text() {
        let tok = make_spm_tokenizer();
        assert_eq!(tok.token_bytes(&token(3, "\u{e9}")), "\u{e9}".as_bytes());
        assert!(tok.compute_tokens("").is_empty());
    }

    #[test]
    fn test_token_bytes_concatenate_to_input() {
        let tok = make_byte_fallback_tokenizer();
        let text = "ab \u{1F600} ba";
        let joined: Vec<u8> = tok
            .compute_tokens(text)
            .into_iter()
            .flat_map(|t| t.bytes)
            .collect();
        assert_eq!(joined, text.as_bytes());
    }

    // -----------------------------------------------------------------------
    // Round trips
    // -----------------------------------------------------------------------

    #[test]
    fn test_round_trip_with_byte_fallback() {
        let tok = make_byte_fallback_tokenizer();
        for text in [
            "ab",
            "a b",
            "ab ab ba",
            "hello \u{4e16}\u{754c}",
            "emoji \u{1F600} ok",
            "tab\tnew\nline",
            "",
        ] {
            let ids = tok.encode_ids(text);
            assert_eq!(tok.decode(&ids).unwrap(), text, "text {:?}", text);
        }
    }

    #[test]
    fn test_round_trip_in_vocab_text() {
        let tok = make_spm_tokenizer();
        for text in ["hello world", "hello  world", "<start_of_turn>hello world<end_of_turn>"] {
            let ids = tok.encode_ids(text);
            assert_eq!(tok.decode(&ids).unwrap(), text);
        }
    }

    #[test]
    fn test_chunked_decode_matches_whole() {
        let tok = make_spm_tokenizer();
        let ids = tok.encode_ids("hello world<end_of_turn>hello");
        let whole = tok.decode(&ids).unwrap();
        let chunked: String = ids
            .iter()
            .map(|&id| tok.decode(&[id]).unwrap())
            .collect();
        assert_eq!(chunked, whole);
    }

    // -----------------------------------------------------------------------
    // Model info
    // -----------------------------------------------------------------------

    #[test]
    fn test_model_info() {
        let tok = make_spm_tokenizer();
        let info = tok.model_info();
        assert_eq!(
            info,
            ModelInfo {
                vocabulary_size: 29,
                beginning_of_sentence_id: Some(1),
                end_of_sentence_id: Some(2),
                pad_id: Some(0),
                unknown_id: 3,
            }
        );
    }

    #[test]
    fn test_model_info_absent_symbols() {
        let tok = make_byte_fallback_tokenizer();
        let info = tok.model_info();
        assert_eq!(info.vocabulary_size, 262);
        assert_eq!(info.beginning_of_sentence_id, None);
        assert_eq!(info.end_of_sentence_id, None);
        assert_eq!(info.pad_id, Some(0));
        assert_eq!(info.unknown_id, 1);
    }

    #[test]
    fn test_model_info_ignores_non_control_symbols() {
        let pieces = vec![
            Piece::new("<unk>", 0.0, PieceKind::Unknown),
            Piece::new("<bos>", 0.0, PieceKind::Normal),
        ];
        let tok = BpeTokenizer::new(ParsedModel::new(pieces, "", false)).unwrap();
        assert_eq!(tok.model_info().beginning_of_sentence_id, None);
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[test]
    fn test_incomplete_byte_table_fails_at_load() {
        let mut pieces = vec![Piece::new("<unk>", 0.0, PieceKind::Unknown)];
        for b in 0..200u8 {
            pieces.push(Piece::new(format!("<0x{:02X}>", b), 0.0, PieceKind::Byte));
        }
        let result = BpeTokenizer::new(ParsedModel::new(pieces, "", true));
        assert!(matches!(result, Err(TokenizerError::ModelIntegrity(_))));
    }

    #[test]
    fn test_malformed_byte_piece_fails_at_load() {
        let mut pieces = vec![Piece::new("<unk>", 0.0, PieceKind::Unknown)];
        for b in 0..=255u8 {
            pieces.push(Piece::new(format!("<0x{:02X}>", b), 0.0, PieceKind::Byte));
        }
        pieces.push(Piece::new("<byte?>", 0.0, PieceKind::Byte));
        let result = BpeTokenizer::new(ParsedModel::new(pieces, "", true));
        assert!(matches!(result, Err(TokenizerError::ModelIntegrity(_))));
    }

    #[test]
    fn test_missing_unknown_fails_at_load() {
        let pieces = vec![Piece::new("a", 0.0, PieceKind::Normal)];
        let result = BpeTokenizer::new(ParsedModel::new(pieces, "", false));
        assert!(matches!(result, Err(TokenizerError::ModelIntegrity(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ab.json");
        let model = ParsedModel::new(
            vec![
                Piece::new("<unk>", 0.0, PieceKind::Unknown),
                Piece::new("a", 0.0, PieceKind::Normal),
                Piece::new("b", 0.0, PieceKind::Normal),
                Piece::new("ab", 1.0, PieceKind::Normal),
            ],
            "",
            false,
        );
        std::fs::write(&path, serde_json::to_string(&model).unwrap()).unwrap();

        let tok = BpeTokenizer::from_file(&path).unwrap();
        assert_eq!(tok.encode_ids("ab"), vec![3]);
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    #[test]
    fn test_segment_links_and_flags() {
        let tok = make_spm_tokenizer();
        let text = normalize("h<end_of_turn>\u{e9}");
        let symbols = tok.segment(&text);
        assert_eq!(
            symbols,
            vec![
                symbol(0, 1, -1, 1, false),
                symbol(1, 14, 0, 2, true),
                symbol(14, 16, 1, -1, false),
            ]
        );
    }

    #[test]
    fn test_normalize_and_replace_separators() {
        assert_eq!(normalize("a b  c"), format!("a{u}b{u}{u}c", u = UNDERLINE));
        assert_eq!(replace_separators(&normalize(" x ")), " x ");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_compare_candidates() {
        let c = |left: usize, score: f32| candidate(left, left + 1, score);
        assert_eq!(compare_candidates(&c(5, 2.0), &c(0, 1.0)), Ordering::Greater);
        assert_eq!(compare_candidates(&c(0, 1.0), &c(1, 1.0)), Ordering::Greater);
        assert_eq!(compare_candidates(&c(1, 1.0), &c(0, 1.0)), Ordering::Less);
    }

    #[test]
    fn test_candidate_staleness() {
        let tok = make_spm_tokenizer();
        let text = normalize("hel");
        let mut symbols = tok.segment(&text);
        let he = candidate(0, 1, -4.0);
        let el = candidate(1, 2, -4.0);
        assert!(!he.is_dead(&symbols));

        tok.apply_merge(&text, &mut symbols, &he);
        assert!(he.is_dead(&symbols));
        assert!(el.is_dead(&symbols));
        assert_eq!(symbols[0].text(&text), "he");
        assert_eq!(symbols[0].next, 2);
        assert_eq!(symbols[2].prev, 0);
        assert_eq!(symbols[1].len(), 0);
    }

    #[test]
    fn test_merge_loop_compacts_stale_candidates() {
        // Pieces of 1, 2, 4, ... 4096 "a"s: every merge doubles a symbol and
        // leaves the candidates of its old neighbours stale.
        let mut pieces = vec![
            Piece::new("<unk>", 0.0, PieceKind::Unknown),
            Piece::new("a", 0.0, PieceKind::Normal),
        ];
        for p in 1..=12 {
            pieces.push(Piece::new("a".repeat(1 << p), p as f32, PieceKind::Normal));
        }
        let tok = BpeTokenizer::new(ParsedModel::new(pieces, "", false)).unwrap();

        let text = "a".repeat(4096);
        let mut symbols = tok.segment(&text);
        let stats = tok.merge(&text, &mut symbols);
        assert_eq!(stats.merges, 4095);
        assert!(stats.compactions > 0, "stats: {:?}", stats);
        assert!(stats.removed > 0, "stats: {:?}", stats);

        assert_eq!(tok.encode_ids(&text), vec![13]);
        assert_eq!(tok.encode_ids(&"a".repeat(100)), vec![7, 6, 3]);
    }

    #[test]
    fn test_merge_loop_without_stale_candidates() {
        let tok = make_ab_tokenizer();
        let text = normalize("ab");
        let mut symbols = tok.segment(&text);
        let stats = tok.merge(&text, &mut symbols);
        assert_eq!(
            stats,
            MergeStats {
                merges: 1,
                compactions: 0,
                removed: 0,
            }
        );
    }

    #[test]
    #[should_panic(expected = "missing from the vocabulary")]
    fn test_merge_of_unknown_piece_panics() {
        let tok = make_spm_tokenizer();
        let text = normalize("xy");
        let mut symbols = tok.segment(&text);
        let bogus = candidate(0, 1, 0.0);
        tok.apply_merge(&text, &mut symbols, &bogus);
    }

    // -----------------------------------------------------------------------
    // Thread safety
    // -----------------------------------------------------------------------

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BpeTokenizer>();
    }

    #[test]
    fn test_concurrent_encode_matches_sequential() {
        let tok = Arc::new(make_spm_tokenizer());
        let text = "hello world <start_of_turn>hello hello world";
        let expected = tok.encode(text);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tok = Arc::clone(&tok);
                std::thread::spawn(move || {
                    (0..50).map(|_| tok.encode(text)).collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            for tokens in handle.join().unwrap() {
                assert_eq!(tokens, expected);
            }
        }
    }

    #[test]
    fn test_tokenizer_trait_object() {
        let tok = make_ab_tokenizer();
        let tok: &dyn Tokenizer = &tok;
        assert_eq!(tok.encode_ids("ab"), vec![3]);
        assert_eq!(tok.decode(&[3, 4, 1]).unwrap(), "ab a");
        assert_eq!(tok.vocab_size(), 5);
    }
}
