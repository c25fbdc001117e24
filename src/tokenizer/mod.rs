//! Tokenizer trait and utilities for encoding text to tokens.
//!
//! This module defines the [`Tokenizer`] trait implemented by [`BpeTokenizer`],
//! the [`Token`] and [`ModelInfo`] values it produces, and batch helpers.

pub mod bpe;
pub mod byte_fallback;
pub mod model;
pub mod queue;
pub mod trie;

pub use bpe::BpeTokenizer;
pub use model::{ModelIndex, ParsedModel, Piece, PieceKind};

use rayon::prelude::*;
use serde::Serialize;

use crate::error::TokenizerError;

/// One encoded token: the vocabulary id and the symbol text that produced it.
///
/// `text` keeps the `\u{2581}` word-boundary marker; byte-fallback tokens
/// carry their `<0xHH>` piece text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Token {
    pub id: u32,
    pub text: String,
}

/// The raw bytes one token stands for in decoded output.
///
/// A byte-fallback token carries its single byte value; any other token
/// carries the UTF-8 of its text with `\u{2581}` turned back into a space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TokenBytes {
    pub id: u32,
    pub bytes: Vec<u8>,
}

/// Summary of a loaded vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub vocabulary_size: usize,
    /// Id of `<bos>`, present only if it is a CONTROL piece.
    pub beginning_of_sentence_id: Option<u32>,
    pub end_of_sentence_id: Option<u32>,
    pub pad_id: Option<u32>,
    pub unknown_id: u32,
}

/// A tokenizer that converts text to tokens and ids back to text.
///
/// All implementations must be thread-safe (`Send + Sync`) for concurrent use
/// across multiple threads.
pub trait Tokenizer: Send + Sync {
    /// Encode text into a sequence of tokens. Never fails.
    fn encode(&self, text: &str) -> Vec<Token>;

    /// Decode a sequence of token ids back into text.
    ///
    /// Fails with [`TokenizerError::InvalidTokenId`] on an id outside the
    /// vocabulary.
    fn decode(&self, ids: &[u32]) -> Result<String, TokenizerError>;

    fn model_info(&self) -> ModelInfo;

    /// Encode text, keeping only the ids.
    fn encode_ids(&self, text: &str) -> Vec<u32> {
        self.encode(text).into_iter().map(|t| t.id).collect()
    }

    /// Return the total vocabulary size.
    fn vocab_size(&self) -> usize {
        self.model_info().vocabulary_size
    }
}

/// Encode a batch of texts in parallel.
///
/// Each text is encoded independently. Returns one token list per input text,
/// in input order.
pub fn encode_batch(tokenizer: &dyn Tokenizer, texts: &[&str]) -> Vec<Vec<Token>> {
    texts.par_iter().map(|text| tokenizer.encode(text)).collect()
}

/// Total number of tokens across `texts`.
pub fn count_tokens(tokenizer: &dyn Tokenizer, texts: &[&str]) -> usize {
    texts.par_iter().map(|text| tokenizer.encode(text).len()).sum()
}
