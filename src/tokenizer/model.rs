//! Vocabulary pieces and the read-only index built over them.
//!
//! A [`ParsedModel`] is what a model-file deserializer hands over: the ordered
//! piece list plus a few trainer/normalizer settings. [`ModelIndex`] validates
//! it once and answers every lookup the encoder and decoder need.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::TokenizerError;

/// Category of a vocabulary piece.
///
/// Numeric codes follow the SentencePiece model proto (and the GGUF
/// `tokenizer.ggml.token_type` array), see [`PieceKind::from_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PieceKind {
    Normal,
    Unknown,
    Control,
    UserDefined,
    Unused,
    Byte,
}

impl PieceKind {
    /// Map a SentencePiece type code (1..=6) to a kind.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Normal),
            2 => Some(Self::Unknown),
            3 => Some(Self::Control),
            4 => Some(Self::UserDefined),
            5 => Some(Self::Unused),
            6 => Some(Self::Byte),
            _ => None,
        }
    }

    /// Kinds that participate in text lookup and merging.
    fn is_text_piece(self) -> bool {
        matches!(self, Self::Normal | Self::UserDefined | Self::Unused)
    }
}

/// One vocabulary entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub text: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default = "default_kind")]
    pub kind: PieceKind,
}

impl Piece {
    pub fn new(text: impl Into<String>, score: f32, kind: PieceKind) -> Self {
        Self {
            text: text.into(),
            score,
            kind,
        }
    }
}

fn default_kind() -> PieceKind {
    PieceKind::Normal
}

/// Segmentation algorithm a model was trained for. Only BPE is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelType {
    Unigram,
    #[default]
    Bpe,
    Word,
    Char,
}

/// Normalizer settings carried by the model. Any enabled option is rejected
/// at load time: only space to whitespace-marker substitution is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerOptions {
    pub add_dummy_prefix: bool,
    pub remove_extra_whitespaces: bool,
}

/// An already-deserialized vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedModel {
    pub pieces: Vec<Piece>,
    #[serde(default = "default_unknown_surface")]
    pub unknown_surface: String,
    #[serde(default)]
    pub byte_fallback: bool,
    #[serde(default)]
    pub model_type: ModelType,
    #[serde(default)]
    pub normalizer: NormalizerOptions,
}

/// SentencePiece's default rendering of the unknown piece: " ⁇ ".
pub const DEFAULT_UNKNOWN_SURFACE: &str = " \u{2047} ";

fn default_unknown_surface() -> String {
    DEFAULT_UNKNOWN_SURFACE.to_string()
}

impl ParsedModel {
    /// A BPE model with default settings over `pieces`.
    pub fn new(
        pieces: Vec<Piece>,
        unknown_surface: impl Into<String>,
        byte_fallback: bool,
    ) -> Self {
        Self {
            pieces,
            unknown_surface: unknown_surface.into(),
            byte_fallback,
            model_type: ModelType::Bpe,
            normalizer: NormalizerOptions::default(),
        }
    }

    /// Parse a JSON vocabulary export.
    pub fn from_json_str(json: &str) -> Result<Self, TokenizerError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON vocabulary export from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TokenizerError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }
}

/// Read-only lookup over a validated vocabulary.
///
/// Invariants established by [`ModelIndex::new`]:
/// - the model type is BPE and no normalizer option is enabled;
/// - there is exactly one UNKNOWN piece;
/// - BYTE pieces only appear when byte-fallback is enabled;
/// - every piece id fits in a `u32`.
#[derive(Debug)]
pub struct ModelIndex {
    pieces: Vec<Piece>,
    /// NORMAL, USER_DEFINED and UNUSED pieces: text -> id.
    text_ids: HashMap<String, u32>,
    /// UNKNOWN, CONTROL and BYTE pieces: text -> id.
    reserved_ids: HashMap<String, u32>,
    unknown_id: u32,
    unknown_surface: String,
    byte_fallback: bool,
}

impl ModelIndex {
    pub fn new(model: ParsedModel) -> Result<Self, TokenizerError> {
        if model.model_type != ModelType::Bpe {
            return Err(TokenizerError::ModelIntegrity(format!(
                "model type {:?} not supported, only BPE is supported",
                model.model_type
            )));
        }
        if model.normalizer.add_dummy_prefix || model.normalizer.remove_extra_whitespaces {
            return Err(TokenizerError::ModelIntegrity(format!(
                "normalizer options not supported: {:?}",
                model.normalizer
            )));
        }
        if model.pieces.is_empty() {
            return Err(TokenizerError::ModelIntegrity("model has no pieces".to_string()));
        }
        if u32::try_from(model.pieces.len()).is_err() {
            return Err(TokenizerError::ModelIntegrity(format!(
                "{} pieces exceed the u32 id space",
                model.pieces.len()
            )));
        }

        let mut text_ids = HashMap::with_capacity(model.pieces.len());
        let mut reserved_ids = HashMap::new();
        let mut unknown_id = None;

        for (i, piece) in model.pieces.iter().enumerate() {
            let id = i as u32;

            if piece.kind.is_text_piece() {
                if let Some(previous) = text_ids.insert(piece.text.clone(), id) {
                    warn!(
                        piece = %piece.text,
                        previous,
                        id,
                        "duplicate piece text, later id takes precedence"
                    );
                }
            } else {
                reserved_ids.insert(piece.text.clone(), id);
            }

            match piece.kind {
                PieceKind::Unknown => {
                    if let Some(first) = unknown_id {
                        return Err(TokenizerError::ModelIntegrity(format!(
                            "unknown piece redefined at id {} (first defined at id {})",
                            id, first
                        )));
                    }
                    unknown_id = Some(id);
                }
                PieceKind::Byte if !model.byte_fallback => {
                    return Err(TokenizerError::ModelIntegrity(format!(
                        "byte piece {:?} found although byte_fallback is disabled",
                        piece.text
                    )));
                }
                _ => {}
            }
        }

        let unknown_id = unknown_id.ok_or_else(|| {
            TokenizerError::ModelIntegrity("unknown piece is not defined".to_string())
        })?;

        Ok(Self {
            pieces: model.pieces,
            text_ids,
            reserved_ids,
            unknown_id,
            unknown_surface: model.unknown_surface,
            byte_fallback: model.byte_fallback,
        })
    }

    /// Number of pieces in the vocabulary.
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn piece(&self, id: u32) -> Option<&Piece> {
        self.pieces.get(id as usize)
    }

    pub fn kind(&self, id: u32) -> Option<PieceKind> {
        self.piece(id).map(|p| p.kind)
    }

    pub fn score(&self, id: u32) -> Option<f32> {
        self.piece(id).map(|p| p.score)
    }

    /// Id of a NORMAL, USER_DEFINED or UNUSED piece with exactly this text.
    /// This is the lookup merge candidates are checked against.
    pub fn text_piece_id(&self, text: &str) -> Option<u32> {
        self.text_ids.get(text).copied()
    }

    /// Resolve final symbol text to an id: reserved pieces first, then text
    /// pieces, else the unknown id.
    pub fn symbol_to_id(&self, text: &str) -> u32 {
        self.reserved_ids
            .get(text)
            .or_else(|| self.text_ids.get(text))
            .copied()
            .unwrap_or(self.unknown_id)
    }

    pub fn unknown_id(&self) -> u32 {
        self.unknown_id
    }

    pub fn unknown_surface(&self) -> &str {
        &self.unknown_surface
    }

    pub fn byte_fallback(&self) -> bool {
        self.byte_fallback
    }

    pub fn is_control(&self, id: u32) -> bool {
        self.kind(id) == Some(PieceKind::Control)
    }

    pub fn is_byte(&self, id: u32) -> bool {
        self.kind(id) == Some(PieceKind::Byte)
    }

    /// Texts of USER_DEFINED pieces, in id order.
    pub fn user_defined_pieces(&self) -> impl Iterator<Item = &str> {
        self.pieces
            .iter()
            .filter(|p| p.kind == PieceKind::UserDefined)
            .map(|p| p.text.as_str())
    }

    /// `(id, piece)` for every BYTE piece, in id order.
    pub fn byte_pieces(&self) -> impl Iterator<Item = (u32, &Piece)> {
        self.pieces
            .iter()
            .enumerate()
            .filter(|(_, p)| p.kind == PieceKind::Byte)
            .map(|(i, p)| (i as u32, p))
    }
}
