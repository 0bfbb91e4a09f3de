//! Transaction operations command.

use super::{load_keypair, load_public_key, read_file};
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use minledger_core::{Amount, Transaction};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct TxArgs {
    #[command(subcommand)]
    command: TxCommand,
}

#[derive(Subcommand)]
enum TxCommand {
    /// Build a transaction and sign it
    New {
        /// Directory holding key files
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Input as NAME=AMOUNT (repeatable)
        #[arg(long = "input", value_parser = parse_party)]
        inputs: Vec<(String, Amount)>,

        /// Output as NAME=AMOUNT (repeatable)
        #[arg(long = "output", value_parser = parse_party)]
        outputs: Vec<(String, Amount)>,

        /// Key that must co-sign (repeatable)
        #[arg(long = "required")]
        required: Vec<String>,

        /// Key to sign with (repeatable)
        #[arg(long = "sign")]
        signers: Vec<String>,

        /// Write the transaction here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Add a signature to an existing transaction file
    Sign {
        /// Transaction JSON file, rewritten in place
        file: PathBuf,

        /// Key to sign with
        #[arg(short, long)]
        key: String,

        /// Directory holding key files
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },
    /// Check a transaction's signatures and amounts
    Verify {
        /// Transaction JSON file
        file: PathBuf,
    },
}

pub fn run(args: TxArgs) -> Result<()> {
    match args.command {
        TxCommand::New {
            data_dir,
            inputs,
            outputs,
            required,
            signers,
            out,
        } => {
            let tx = build_tx(&data_dir, &inputs, &outputs, &required, &signers)?;
            match out {
                Some(path) => {
                    write_tx(&path, &tx)?;
                    println!(
                        "{}  Saved transaction to: {}",
                        "✓".green().bold(),
                        path.display().to_string().bright_black()
                    );
                }
                None => println!("{}", tx.to_json()),
            }
            Ok(())
        }
        TxCommand::Sign {
            file,
            key,
            data_dir,
        } => sign_tx(&file, &data_dir, &key),
        TxCommand::Verify { file } => verify_tx(&file),
    }
}

/// Parse `NAME=AMOUNT`. The amount keeps its spelling (`1.0` stays `1.0`).
fn parse_party(s: &str) -> std::result::Result<(String, Amount), String> {
    let (name, amount) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=AMOUNT, got '{}'", s))?;
    let amount = amount.parse::<Amount>().map_err(|e| e.to_string())?;
    Ok((name.to_string(), amount))
}

fn build_tx(
    data_dir: &Path,
    inputs: &[(String, Amount)],
    outputs: &[(String, Amount)],
    required: &[String],
    signers: &[String],
) -> Result<Transaction> {
    let keys_dir = data_dir.join("keys");
    let mut tx = Transaction::new();
    for (name, amount) in inputs {
        tx.add_input(&load_public_key(&keys_dir, name)?, amount.clone());
    }
    for (name, amount) in outputs {
        tx.add_output(&load_public_key(&keys_dir, name)?, amount.clone());
    }
    for name in required {
        tx.add_required(&load_public_key(&keys_dir, name)?);
    }
    for name in signers {
        tx.sign(&load_keypair(&keys_dir, name)?)
            .with_context(|| format!("Failed to sign with '{}'", name))?;
    }
    Ok(tx)
}

fn write_tx(path: &Path, tx: &Transaction) -> Result<()> {
    fs::write(path, tx.to_json()).with_context(|| format!("Failed to write {}", path.display()))
}

fn load_tx(path: &Path) -> Result<Transaction> {
    let json = read_file(path)?;
    Transaction::from_json(&json)
        .with_context(|| format!("Invalid transaction JSON in {}", path.display()))
}

fn sign_tx(file: &Path, data_dir: &Path, key: &str) -> Result<()> {
    let mut tx = load_tx(file)?;
    let keypair = load_keypair(&data_dir.join("keys"), key)?;
    tx.sign(&keypair)?;
    write_tx(file, &tx)?;

    println!(
        "{}  Signed {} with '{}'",
        "✓".green().bold(),
        file.display().to_string().bright_black(),
        key.bright_yellow()
    );
    Ok(())
}

fn verify_tx(file: &Path) -> Result<()> {
    let tx = load_tx(file)?;

    println!();
    println!("{}", "Transaction:".bold().cyan());
    println!();
    println!(
        "  Inputs:     {} (total {})",
        tx.inputs().len().to_string().bright_cyan(),
        tx.total_input()
    );
    println!(
        "  Outputs:    {} (total {})",
        tx.outputs().len().to_string().bright_cyan(),
        tx.total_output()
    );
    println!("  Required:   {}", tx.required().len().to_string().bright_cyan());
    println!(
        "  Signatures: {}",
        tx.signatures().len().to_string().bright_cyan()
    );
    println!();

    match tx.validate() {
        Ok(()) => {
            println!("{}  Transaction is valid", "✓".green().bold());
            Ok(())
        }
        Err(reason) => {
            println!("{}  Transaction is invalid: {}", "✗".red().bold(), reason);
            bail!("transaction is invalid: {}", reason)
        }
    }
}
