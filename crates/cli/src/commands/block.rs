//! Block operations command.

use super::read_file;
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use minledger_core::{Block, Transaction};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct BlockArgs {
    #[command(subcommand)]
    command: BlockCommand,
}

#[derive(Subcommand)]
enum BlockCommand {
    /// Build a block from transaction files
    New {
        /// Transaction JSON file (repeatable)
        #[arg(long = "tx")]
        txs: Vec<PathBuf>,

        /// Block JSON file to link to as the parent
        #[arg(short, long)]
        parent: Option<PathBuf>,

        /// Write the block here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Check a block's transactions and its link to the parent
    Verify {
        /// Block JSON file
        file: PathBuf,

        /// Also check every ancestor
        #[arg(short, long)]
        all: bool,
    },
    /// Print the block hash
    Hash {
        /// Block JSON file
        file: PathBuf,
    },
}

pub fn run(args: BlockArgs) -> Result<()> {
    match args.command {
        BlockCommand::New { txs, parent, out } => {
            let json = build_block(&txs, parent.as_deref())?.to_json()?;
            match out {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!(
                        "{}  Saved block to: {}",
                        "✓".green().bold(),
                        path.display().to_string().bright_black()
                    );
                }
                None => println!("{}", json),
            }
            Ok(())
        }
        BlockCommand::Verify { file, all } => verify_block(&file, all),
        BlockCommand::Hash { file } => {
            println!("{}", load_block(&file)?.hash().to_hex());
            Ok(())
        }
    }
}

fn load_block(path: &Path) -> Result<Block> {
    let json = read_file(path)?;
    Block::from_json(&json).with_context(|| format!("Invalid block JSON in {}", path.display()))
}

fn build_block(txs: &[PathBuf], parent: Option<&Path>) -> Result<Block> {
    let parent = parent.map(load_block).transpose()?.map(Block::into_ref);
    let mut block = Block::new(Vec::new(), parent);
    for path in txs {
        let tx = Transaction::from_json(&read_file(path)?)
            .with_context(|| format!("Invalid transaction JSON in {}", path.display()))?;
        block.add_tx(&tx);
    }
    Ok(block)
}

fn verify_block(file: &Path, all: bool) -> Result<()> {
    let block = load_block(file)?;
    let tx_count = block
        .transactions()
        .map(|txs| txs.len().to_string())
        .unwrap_or_else(|_| "?".to_string());

    println!();
    println!("{}", "Block:".bold().cyan());
    println!();
    println!("  Hash:          {}", block.hash().to_hex().bright_yellow());
    match block.previous_hash() {
        Some(previous) => println!("  Previous hash: {}", previous.to_hex().bright_black()),
        None => println!("  Previous hash: {}", "(root)".bright_black()),
    }
    println!("  Depth:         {}", block.depth().to_string().bright_cyan());
    println!("  Transactions:  {}", tx_count.bright_cyan());
    println!();

    if let Err(reason) = block.validate() {
        println!("{}  Block is invalid: {}", "✗".red().bold(), reason);
        bail!("block is invalid: {}", reason);
    }

    if all {
        for (distance, ancestor) in block.ancestors().enumerate() {
            if let Err(reason) = ancestor.read().validate() {
                println!(
                    "{}  Ancestor {} is invalid: {}",
                    "✗".red().bold(),
                    distance + 1,
                    reason
                );
                bail!("ancestor {} is invalid: {}", distance + 1, reason);
            }
        }
    }

    println!("{}  Block is valid", "✓".green().bold());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use minledger_core::{KeyConfig, KeyPair};

    fn signed_transfer(from: &KeyPair, to: &KeyPair) -> Transaction {
        Transaction::new()
            .with_input(&from.public_key, 1)
            .with_output(&to.public_key, 1)
            .signed(from)
            .unwrap()
    }

    #[test]
    fn test_build_and_verify_chain() {
        let dir = tempfile::tempdir().unwrap();
        let alice = KeyPair::generate_with(&KeyConfig { bits: 1024 }).unwrap();
        let bob = KeyPair::generate_with(&KeyConfig { bits: 1024 }).unwrap();

        let tx_file = dir.path().join("tx.json");
        fs::write(&tx_file, signed_transfer(&alice, &bob).to_json()).unwrap();

        let root_file = dir.path().join("root.json");
        let root = build_block(&[tx_file.clone()], None).unwrap();
        fs::write(&root_file, root.to_json().unwrap()).unwrap();

        let child_file = dir.path().join("child.json");
        let child = build_block(&[tx_file], Some(&root_file)).unwrap();
        assert_eq!(child.previous_hash(), Some(root.hash()));
        fs::write(&child_file, child.to_json().unwrap()).unwrap();

        verify_block(&child_file, true).unwrap();
        assert_eq!(load_block(&child_file).unwrap().hash(), child.hash());
    }

    #[test]
    fn test_verify_rejects_invalid_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let alice = KeyPair::generate_with(&KeyConfig { bits: 1024 }).unwrap();
        let bob = KeyPair::generate_with(&KeyConfig { bits: 1024 }).unwrap();

        let mut root = Block::root(Vec::new());
        root.add_tx(&Transaction::new().with_input(&alice.public_key, 1));
        let root = root.into_ref();
        let mut child = Block::child(Vec::new(), &root);
        child.add_tx(&signed_transfer(&bob, &alice));

        let file = dir.path().join("child.json");
        fs::write(&file, child.to_json().unwrap()).unwrap();

        verify_block(&file, false).unwrap();
        assert!(verify_block(&file, true).is_err());
    }
}
