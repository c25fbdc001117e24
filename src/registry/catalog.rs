//! Catalog of generative model names and the tokenizer vocabularies they use.

use crate::error::TokenizerError;

/// A tokenizer vocabulary known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizerSource {
    /// Tokenizer name: "gemma3"
    pub name: String,
    /// Vocabulary file name inside the tokenizers directory: "gemma3.json"
    pub file: String,
    /// Where the SentencePiece model this vocabulary was exported from lives.
    pub upstream: Option<String>,
}

impl TokenizerSource {
    pub fn new(name: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            upstream: None,
        }
    }
}

/// Models with a local tokenizer.
const BUILTIN_MODELS: &[(&str, &str)] = &[
    ("gemini-2.5-pro", "gemma3"),
    ("gemini-2.5-flash", "gemma3"),
    ("gemini-2.5-flash-lite", "gemma3"),
    ("gemini-2.0-flash", "gemma3"),
    ("gemini-2.0-flash-lite", "gemma3"),
    // Dated and preview releases
    ("gemini-3-pro-preview", "gemma3"),
    ("gemini-2.5-pro-preview-06-05", "gemma3"),
    ("gemini-2.5-pro-preview-05-06", "gemma3"),
    ("gemini-2.5-pro-exp-03-25", "gemma3"),
    ("gemini-live-2.5-flash", "gemma3"),
    ("gemini-2.5-flash-preview-05-20", "gemma3"),
    ("gemini-2.5-flash-preview-04-17", "gemma3"),
    ("gemini-2.5-flash-lite-preview-06-17", "gemma3"),
    ("gemini-2.0-flash-001", "gemma3"),
    ("gemini-2.0-flash-lite-001", "gemma3"),
];

/// (name, vocabulary file, upstream model)
const BUILTIN_TOKENIZERS: &[(&str, &str, &str)] = &[
    (
        "gemma2",
        "gemma2.json",
        "https://raw.githubusercontent.com/google/gemma_pytorch/33b652c465537c6158f9a472ea5700e5e770ad3f/tokenizer/tokenizer.model",
    ),
    (
        "gemma3",
        "gemma3.json",
        "https://raw.githubusercontent.com/google/gemma_pytorch/014acb7ac4563a5f77c76d7ff98f31b568c16508/tokenizer/gemma3_cleaned_262144_v2.spiece.model",
    ),
];

/// Immutable mapping from model names to tokenizers, and from tokenizer
/// names to vocabulary files.
///
/// Model names match exactly; tokenizer names match case-insensitively.
#[derive(Debug, Clone)]
pub struct TokenizerCatalog {
    models: Vec<(String, String)>,
    tokenizers: Vec<TokenizerSource>,
}

impl TokenizerCatalog {
    /// Build a custom catalog. Every model must map to a tokenizer listed in
    /// `tokenizers`, otherwise lookups for it fail.
    pub fn new(models: Vec<(String, String)>, tokenizers: Vec<TokenizerSource>) -> Self {
        Self { models, tokenizers }
    }

    /// The catalog of supported Gemini models.
    pub fn builtin() -> Self {
        let models = BUILTIN_MODELS
            .iter()
            .map(|(model, tokenizer)| (model.to_string(), tokenizer.to_string()))
            .collect();
        let tokenizers = BUILTIN_TOKENIZERS
            .iter()
            .map(|(name, file, upstream)| TokenizerSource {
                upstream: Some(upstream.to_string()),
                ..TokenizerSource::new(*name, *file)
            })
            .collect();
        Self::new(models, tokenizers)
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|(model, _)| model.as_str())
    }

    pub fn tokenizers(&self) -> &[TokenizerSource] {
        &self.tokenizers
    }

    /// Tokenizer name used by `model`.
    pub fn tokenizer_for_model(&self, model: &str) -> Result<&str, TokenizerError> {
        self.find_model(model).ok_or_else(|| {
            TokenizerError::Registry(format!(
                "Model '{}' is not supported for local tokenization. Supported models: {}",
                model,
                self.model_names().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    /// Vocabulary source of the tokenizer called `name`.
    pub fn source(&self, name: &str) -> Result<&TokenizerSource, TokenizerError> {
        self.find_tokenizer(name).ok_or_else(|| {
            TokenizerError::Registry(format!(
                "Unknown tokenizer '{}'. Known tokenizers: {}",
                name,
                self.tokenizer_names().join(", ")
            ))
        })
    }

    /// Resolve a model name or a tokenizer name to a vocabulary source.
    ///
    /// Model names take precedence.
    pub fn resolve(&self, name: &str) -> Result<&TokenizerSource, TokenizerError> {
        if let Some(tokenizer) = self.find_model(name) {
            return self.source(tokenizer);
        }
        self.find_tokenizer(name).ok_or_else(|| {
            TokenizerError::Registry(format!(
                "Unknown model or tokenizer '{}'.\n\n\
                 Supported models: {}\n\
                 Known tokenizers: {}",
                name,
                self.model_names().collect::<Vec<_>>().join(", "),
                self.tokenizer_names().join(", ")
            ))
        })
    }

    fn find_model(&self, model: &str) -> Option<&str> {
        self.models
            .iter()
            .find(|(name, _)| name == model)
            .map(|(_, tokenizer)| tokenizer.as_str())
    }

    fn find_tokenizer(&self, name: &str) -> Option<&TokenizerSource> {
        self.tokenizers
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    fn tokenizer_names(&self) -> Vec<&str> {
        self.tokenizers.iter().map(|t| t.name.as_str()).collect()
    }
}

impl Default for TokenizerCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
