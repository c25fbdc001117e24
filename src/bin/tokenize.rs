//! strata-tokenize: Tokenize text (or decode ids) with a local BPE vocabulary.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use serde::Serialize;

use strata_tokenizer::cli;
use strata_tokenizer::registry::{TokenizerCatalog, TokenizerRegistry};
use strata_tokenizer::tokenizer::{ModelInfo, Tokenizer};

#[derive(Parser)]
#[command(name = "strata-tokenize", about = "Tokenize text with a local BPE vocabulary")]
struct Args {
    /// Model or tokenizer name, or path to a JSON vocabulary
    /// (e.g., "gemini-2.5-flash", "gemma3" or "./gemma3.json")
    #[arg(short = 'm', long)]
    model: String,

    /// Text to tokenize
    #[arg(short = 'p', long, conflicts_with_all = ["file", "stdin"])]
    prompt: Option<String>,

    /// Read text from file
    #[arg(short = 'f', long, conflicts_with = "stdin")]
    file: Option<PathBuf>,

    /// Read text from stdin
    #[arg(long)]
    stdin: bool,

    /// Treat the input as token ids ("1, 2, 3" or "[1, 2, 3]") and decode them
    #[arg(long)]
    decode: bool,

    /// Output only token IDs in list format: [1, 2, 3]
    #[arg(long)]
    ids: bool,

    /// Print total token count
    #[arg(long)]
    show_count: bool,

    /// Print vocabulary information instead of tokenizing
    #[arg(long)]
    info: bool,

    /// Output format: text or json
    #[arg(long, default_value = "text", value_parser = validate_output_format)]
    output_format: String,

    /// Suppress all logging
    #[arg(long)]
    log_disable: bool,
}

fn validate_output_format(s: &str) -> Result<String, String> {
    match s {
        "text" | "json" => Ok(s.to_string()),
        _ => Err(format!("Unknown output format '{}'. Options: text, json", s)),
    }
}

#[derive(Serialize)]
struct EncodeOutput {
    tokens: Vec<TokenEntry>,
    count: usize,
}

/// One token as printed by `--output-format json`.
#[derive(Serialize)]
struct TokenEntry {
    id: u32,
    text: String,
    /// Bytes this token contributes to decoded output.
    bytes: Vec<u8>,
}

#[derive(Serialize)]
struct DecodeOutput {
    ids: Vec<u32>,
    text: String,
}

fn main() {
    let args = Args::parse();
    cli::init_logging(args.log_disable);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let registry = TokenizerRegistry::new(TokenizerCatalog::builtin());
    let tokenizer = cli::model::resolve_model(&args.model, &registry)?;
    let json = args.output_format == "json";

    if args.info {
        print_info(&tokenizer.model_info(), json)?;
        return Ok(());
    }

    let input = cli::read_input(args.prompt.as_deref(), args.file.as_deref(), args.stdin)?;

    if args.decode {
        let ids = cli::parse_ids(&input)?;
        let text = tokenizer.decode(&ids)?;
        if json {
            let output = DecodeOutput { ids, text };
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", text);
        }
        return Ok(());
    }

    let tokens = tokenizer.encode(&input);

    if json {
        let entries: Vec<TokenEntry> = tokens
            .into_iter()
            .map(|token| TokenEntry {
                bytes: tokenizer.token_bytes(&token),
                id: token.id,
                text: token.text,
            })
            .collect();
        let output = EncodeOutput {
            count: entries.len(),
            tokens: entries,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if args.ids {
        let id_strs: Vec<String> = tokens.iter().map(|t| t.id.to_string()).collect();
        println!("[{}]", id_strs.join(", "));
    } else {
        for token in &tokens {
            println!("{:>6} -> '{}'", token.id, token.text);
        }
    }

    if args.show_count {
        println!("Total number of tokens: {}", tokens.len());
    }

    Ok(())
}

fn print_info(info: &ModelInfo, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(info)?);
        return Ok(());
    }

    let show = |id: Option<u32>| id.map_or_else(|| "-".to_string(), |id| id.to_string());
    println!("Vocabulary size: {}", info.vocabulary_size);
    println!("BOS id:          {}", show(info.beginning_of_sentence_id));
    println!("EOS id:          {}", show(info.end_of_sentence_id));
    println!("PAD id:          {}", show(info.pad_id));
    println!("UNK id:          {}", info.unknown_id);
    Ok(())
}
