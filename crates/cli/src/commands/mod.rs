//! CLI commands module.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use minledger_core::KeyPair;
use std::fs;
use std::path::Path;

mod block;
mod key;
mod tx;

#[derive(Subcommand)]
pub enum Commands {
    /// Key management
    Key(key::KeyArgs),
    /// Transaction operations
    Tx(tx::TxArgs),
    /// Block operations
    Block(block::BlockArgs),
}

pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Key(args) => key::run(args),
        Commands::Tx(args) => tx::run(args),
        Commands::Block(args) => block::run(args),
    }
}

fn private_key_path(keys_dir: &Path, name: &str) -> std::path::PathBuf {
    keys_dir.join(format!("{}.pem", name))
}

fn public_key_path(keys_dir: &Path, name: &str) -> std::path::PathBuf {
    keys_dir.join(format!("{}.pub.pem", name))
}

/// Load a private key written by `minledger key new`.
fn load_keypair(keys_dir: &Path, name: &str) -> Result<KeyPair> {
    let key_file = private_key_path(keys_dir, name);
    if !key_file.exists() {
        bail!(
            "Key file not found: {}. Use 'minledger key new' to create one.",
            key_file.display()
        );
    }

    let pem = fs::read_to_string(&key_file)
        .with_context(|| format!("Failed to read {}", key_file.display()))?;
    KeyPair::from_pem(&pem)
        .with_context(|| format!("Invalid private key in {}", key_file.display()))
}

/// Load a public key, from `<name>.pub.pem` or else from the private key.
fn load_public_key(keys_dir: &Path, name: &str) -> Result<minledger_core::PublicKey> {
    let pub_file = public_key_path(keys_dir, name);
    if pub_file.exists() {
        let pem = fs::read_to_string(&pub_file)
            .with_context(|| format!("Failed to read {}", pub_file.display()))?;
        return minledger_core::PublicKey::from_pem(&pem)
            .with_context(|| format!("Invalid public key in {}", pub_file.display()));
    }
    Ok(load_keypair(keys_dir, name)?.public_key)
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
