//! Mapping between raw byte values and the reserved `<0xHH>` byte pieces.

use std::collections::HashMap;

use super::model::ModelIndex;
use super::Token;
use crate::error::TokenizerError;

/// Bidirectional byte <-> byte-piece table.
///
/// Empty when the model does not declare byte-fallback. When it does, all
/// 256 byte values are guaranteed to be present.
#[derive(Debug, Default)]
pub struct ByteFallbackCodec {
    /// Indexed by byte value.
    byte_to_token: Vec<Option<Token>>,
    id_to_byte: HashMap<u32, u8>,
}

impl ByteFallbackCodec {
    /// Build the table from the BYTE pieces of `index`.
    ///
    /// Fails if a BYTE piece is not of the form `<0xHH>`, or if
    /// byte-fallback is declared but some byte value has no piece.
    pub fn new(index: &ModelIndex) -> Result<Self, TokenizerError> {
        let mut byte_to_token = vec![None; 256];
        let mut id_to_byte = HashMap::new();

        for (id, piece) in index.byte_pieces() {
            let byte = parse_byte_piece(&piece.text).ok_or_else(|| {
                TokenizerError::ModelIntegrity(format!(
                    "byte piece {:?} at id {} is not of the form <0xHH>",
                    piece.text, id
                ))
            })?;
            byte_to_token[byte as usize] = Some(Token {
                id,
                text: piece.text.clone(),
            });
            id_to_byte.insert(id, byte);
        }

        if index.byte_fallback() {
            if let Some(missing) = byte_to_token.iter().position(Option::is_none) {
                return Err(TokenizerError::ModelIntegrity(format!(
                    "byte value 0x{:02x} not found",
                    missing
                )));
            }
        }

        Ok(Self {
            byte_to_token,
            id_to_byte,
        })
    }

    /// Token for a single byte value, if the table has one.
    pub fn token_for_byte(&self, byte: u8) -> Option<&Token> {
        self.byte_to_token[byte as usize].as_ref()
    }

    /// Byte value encoded by a byte-piece id.
    pub fn byte_for_id(&self, id: u32) -> Option<u8> {
        self.id_to_byte.get(&id).copied()
    }

    /// Append one token per UTF-8 byte of `text`.
    pub fn encode_bytes(&self, text: &str, output: &mut Vec<Token>) {
        output.extend(
            text.bytes()
                .filter_map(|b| self.token_for_byte(b))
                .cloned(),
        );
    }

    /// Decode a run of byte-piece ids as UTF-8, replacing invalid or
    /// truncated sequences with U+FFFD.
    pub fn decode_run(&self, ids: &[u32]) -> String {
        let bytes: Vec<u8> = ids.iter().filter_map(|&id| self.byte_for_id(id)).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Parse a byte piece surface `<0xHH>` into its byte value.
pub fn parse_byte_piece(text: &str) -> Option<u8> {
    let hex = text.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}
