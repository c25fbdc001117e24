//! Input handling and logging setup for the `strata-tokenize` binary.

pub mod model;

use std::io::Read;
use std::path::Path;

/// Send `tracing` events from the tokenizer to stderr so they never mix
/// with tokens printed on stdout.
///
/// `RUST_LOG` picks the level (e.g. `strata_tokenizer=trace` shows merge loop
/// statistics); without it only warnings such as duplicate vocabulary pieces
/// are shown. `--log-disable` skips installing a subscriber at all.
pub fn init_logging(disable: bool) {
    use tracing_subscriber::EnvFilter;

    if disable {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    // A second call keeps the subscriber that is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Text to encode, or the id list to decode.
///
/// `--prompt` wins over `--file`, which wins over `--stdin`; clap already
/// rejects combining them, so the order only matters for library callers.
pub fn read_input(
    prompt: Option<&str>,
    file: Option<&Path>,
    use_stdin: bool,
) -> Result<String, String> {
    match (prompt, file) {
        (Some(text), _) => Ok(text.to_string()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read file '{}': {}", path.display(), e)),
        (None, None) if use_stdin => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| format!("Failed to read stdin: {}", e))?;
            Ok(buf)
        }
        (None, None) => {
            Err("No input provided. Use --prompt, --file, or --stdin (or --info)".to_string())
        }
    }
}

/// Parse token ids separated by commas and/or whitespace.
///
/// Surrounding brackets are accepted, so the `--ids` output of an encode run
/// can be fed straight back in.
pub fn parse_ids(input: &str) -> Result<Vec<u32>, String> {
    let trimmed = input.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);

    inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| format!("Invalid token id '{}'", part))
        })
        .collect()
}
