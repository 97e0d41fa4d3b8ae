//! pqseal CLI - envelope encryption of JSON records
//!
//! Records written by this tool use the bundled demo key pair so that they
//! can be read back by a later invocation. They are not confidential.

use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use pqseal::{Crypto, CryptoConfig, file_ops};

#[derive(Parser)]
#[command(name = "pqseal")]
#[command(version)]
#[command(about = "Envelope encryption for JSON records.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a JSON mapping into a record file
    #[command(alias = "e")]
    Encrypt {
        /// Path to the JSON file to encrypt
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the record file to write
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Seal every top-level mapping as its own section inside an
        /// outer envelope
        #[arg(short, long)]
        sections: bool,
    },

    /// Decrypt a record file
    #[command(alias = "d")]
    Decrypt {
        /// Path to the record file to decrypt
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to write the recovered JSON to
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Recover a legacy (pre-envelope) blob without any key
    Decode {
        /// Path to the file holding the blob
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to write the recovered JSON to
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Encrypt {
            input,
            output,
            sections,
        } => Crypto::from_config(&CryptoConfig::legacy_demo())
            .and_then(|crypto| file_ops::encrypt_file(&input, &output, &crypto, sections)),
        Commands::Decrypt { input, output } => Crypto::from_config(&CryptoConfig::legacy_demo())
            .and_then(|crypto| file_ops::decrypt_file(&input, &output, &crypto)),
        Commands::Decode { input, output } => file_ops::decode_file(&input, &output),
    };

    if let Err(e) = result {
        let mut message = e.to_string();
        let mut source = e.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        eprintln!("Error: {}", message);
        process::exit(1);
    }
}
