pub mod error;
pub mod tokenizer;
pub mod registry;
pub mod cli;

pub use error::TokenizerError;
pub use registry::{TokenizerCatalog, TokenizerRegistry};
pub use tokenizer::{
    count_tokens, encode_batch, BpeTokenizer, ModelInfo, ParsedModel, Token, TokenBytes, Tokenizer,
};
