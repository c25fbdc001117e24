//! Tokenizer resolution from the CLI `--model` argument.
//!
//! Detects whether the argument is a vocabulary file path or a registry
//! name, and returns the loaded tokenizer.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::TokenizerError;
use crate::registry::TokenizerRegistry;
use crate::tokenizer::BpeTokenizer;

/// Resolve a `--model` argument to a tokenizer.
///
/// Detection heuristic:
/// - Contains `/` or `\` → treat as file path
/// - Ends with `.json` (case-insensitive) → treat as file path
/// - Otherwise → model or tokenizer name looked up in `registry`
pub fn resolve_model(
    input: &str,
    registry: &TokenizerRegistry,
) -> Result<Arc<BpeTokenizer>, TokenizerError> {
    let lower = input.to_ascii_lowercase();
    if input.contains('/') || input.contains('\\') || lower.ends_with(".json") {
        let path = PathBuf::from(input);
        if !path.exists() {
            return Err(TokenizerError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Vocabulary file not found: {}", path.display()),
            )));
        }
        return Ok(Arc::new(BpeTokenizer::from_file(&path)?));
    }

    registry.load(input)
}
