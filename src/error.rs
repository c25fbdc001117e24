use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vocabulary parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Model integrity error: {0}")]
    ModelIntegrity(String),

    #[error("Invalid token id {id}: vocabulary has {vocab_size} pieces")]
    InvalidTokenId { id: u32, vocab_size: usize },

    #[error("Registry error: {0}")]
    Registry(String),
}
