//! Tokenizer registry for resolving model names to loaded tokenizers.
//!
//! The registry maps names like `"gemini-2.5-flash"` or `"gemma3"` to JSON
//! vocabulary files in a local directory and keeps each loaded tokenizer for
//! the lifetime of the registry. Nothing is fetched over the network.
//!
//! # Tokenizers Directory
//!
//! Vocabularies are read from (in priority order):
//! 1. `STRATA_TOKENIZERS_DIR` environment variable (if set)
//! 2. `~/.strata/tokenizers/` (default)

pub mod catalog;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::info;

pub use catalog::{TokenizerCatalog, TokenizerSource};

use crate::error::TokenizerError;
use crate::tokenizer::BpeTokenizer;

/// One lazily filled cache entry. Holding its lock while loading makes
/// concurrent first requests for the same tokenizer wait for a single load.
type Slot = Arc<Mutex<Option<Arc<BpeTokenizer>>>>;

/// Tokenizer registry: resolves names to vocabulary files and memoizes loads.
pub struct TokenizerRegistry {
    catalog: TokenizerCatalog,
    tokenizers_dir: PathBuf,
    /// Keyed by canonical tokenizer name.
    loaded: Mutex<HashMap<String, Slot>>,
}

impl TokenizerRegistry {
    /// Create a registry using the default tokenizers directory.
    ///
    /// Resolution order:
    /// 1. `STRATA_TOKENIZERS_DIR` environment variable
    /// 2. `~/.strata/tokenizers/`
    pub fn new(catalog: TokenizerCatalog) -> Self {
        let dir = if let Ok(dir) = std::env::var("STRATA_TOKENIZERS_DIR") {
            PathBuf::from(dir)
        } else {
            dirs_default_tokenizers()
        };
        Self::with_dir(catalog, dir)
    }

    /// Create a registry with a custom tokenizers directory.
    pub fn with_dir(catalog: TokenizerCatalog, dir: PathBuf) -> Self {
        Self {
            catalog,
            tokenizers_dir: dir,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// The directory vocabulary files are read from.
    pub fn tokenizers_dir(&self) -> &Path {
        &self.tokenizers_dir
    }

    pub fn catalog(&self) -> &TokenizerCatalog {
        &self.catalog
    }

    /// Resolve a model or tokenizer name to a local vocabulary path.
    ///
    /// Returns `Err` with a helpful message if the name is unknown or the
    /// vocabulary file is not present.
    pub fn resolve_path(&self, name: &str) -> Result<PathBuf, TokenizerError> {
        let source = self.catalog.resolve(name)?;
        let path = self.tokenizers_dir.join(&source.file);

        if path.exists() {
            return Ok(path);
        }

        let upstream = source
            .upstream
            .as_deref()
            .map(|url| format!("\nExported from: {}", url))
            .unwrap_or_default();

        Err(TokenizerError::Registry(format!(
            "Tokenizer '{}' (for '{}') not found locally.\n\n\
             Place the JSON vocabulary at:\n  \
             {}\n\n\
             Or set STRATA_TOKENIZERS_DIR to the directory containing {}{}",
            source.name,
            name,
            path.display(),
            source.file,
            upstream
        )))
    }

    /// Load the tokenizer for a model or tokenizer name.
    ///
    /// Each tokenizer is loaded at most once per registry, even when several
    /// threads ask for it at the same time; later calls share the same
    /// instance. A failed load is not remembered and the next call retries.
    pub fn load(&self, name: &str) -> Result<Arc<BpeTokenizer>, TokenizerError> {
        let source = self.catalog.resolve(name)?;

        let slot = {
            let mut loaded = self
                .loaded
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(loaded.entry(source.name.clone()).or_default())
        };

        let mut cached = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(tokenizer) = cached.as_ref() {
            return Ok(Arc::clone(tokenizer));
        }

        let path = self.resolve_path(name)?;
        let tokenizer = Arc::new(BpeTokenizer::from_file(&path)?);
        info!(
            tokenizer = %source.name,
            path = %path.display(),
            vocab_size = tokenizer.index().len(),
            "loaded tokenizer"
        );

        *cached = Some(Arc::clone(&tokenizer));
        Ok(tokenizer)
    }

    /// Whether the tokenizer behind `name` has already been loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        let Ok(source) = self.catalog.resolve(name) else {
            return false;
        };
        let slot = {
            let loaded = self
                .loaded
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match loaded.get(&source.name) {
                Some(slot) => Arc::clone(slot),
                None => return false,
            }
        };
        let cached = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        cached.is_some()
    }
}

impl Default for TokenizerRegistry {
    fn default() -> Self {
        Self::new(TokenizerCatalog::builtin())
    }
}

/// Default tokenizers directory: `~/.strata/tokenizers/`
fn dirs_default_tokenizers() -> PathBuf {
    if let Some(home) = home_dir() {
        home.join(".strata").join("tokenizers")
    } else {
        PathBuf::from(".strata/tokenizers")
    }
}

/// Get the user's home directory.
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
