//! Key management command.

use super::{private_key_path, public_key_path};
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use minledger_core::crypto::DEFAULT_KEY_BITS;
use minledger_core::{hash, KeyConfig, KeyPair};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct KeyArgs {
    #[command(subcommand)]
    command: KeyCommand,
}

#[derive(Subcommand)]
enum KeyCommand {
    /// Generate a new RSA keypair
    New {
        /// Name for the key files
        name: String,

        /// Directory to store key files
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// RSA modulus size in bits
        #[arg(short, long, default_value_t = DEFAULT_KEY_BITS)]
        bits: usize,
    },
    /// List all keypairs
    List {
        /// Directory to store key files
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,
    },
}

pub fn run(args: KeyArgs) -> Result<()> {
    match args.command {
        KeyCommand::New {
            name,
            data_dir,
            bits,
        } => new_keypair(data_dir, name, bits),
        KeyCommand::List { data_dir } => list_keypairs(data_dir),
    }
}

fn new_keypair(data_dir: PathBuf, name: String, bits: usize) -> Result<()> {
    let keys_dir = data_dir.join("keys");
    let private_file = private_key_path(&keys_dir, &name);
    let public_file = public_key_path(&keys_dir, &name);
    if private_file.exists() {
        bail!("Key file already exists: {}", private_file.display());
    }

    println!("{}", "Generating keypair...".bold().cyan());
    let keypair = KeyPair::generate_with(&KeyConfig { bits })
        .with_context(|| format!("Failed to generate a {}-bit keypair", bits))?;

    fs::create_dir_all(&keys_dir)
        .with_context(|| format!("Failed to create key directory: {:?}", keys_dir))?;
    write_private_key(&private_file, &keypair.to_pem()?)?;
    fs::write(&public_file, keypair.public_key.to_pem())?;

    println!();
    println!("  Name:        {}", name.bright_yellow());
    println!("  Bits:        {}", bits.to_string().bright_cyan());
    println!(
        "  Fingerprint: {}",
        fingerprint(keypair.public_key.to_pem()).bright_black()
    );
    println!();
    println!(
        "{}  Saved private key to: {}",
        "✓".green().bold(),
        private_file.display().to_string().bright_black()
    );
    println!(
        "{}  Saved public key to:  {}",
        "✓".green().bold(),
        public_file.display().to_string().bright_black()
    );
    println!();
    println!("{}", "Keep your private key safe!".yellow().bold());

    Ok(())
}

fn list_keypairs(data_dir: PathBuf) -> Result<()> {
    let keys_dir = data_dir.join("keys");

    if !keys_dir.exists() {
        println!("{}", "No keypairs found.".yellow());
        println!(
            "Use {} to create a new keypair.",
            "minledger key new".bright_cyan()
        );
        return Ok(());
    }

    println!("{}", "Saved Keypairs:".bold().cyan());
    println!();

    let mut names: Vec<String> = fs::read_dir(&keys_dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            file_name
                .strip_suffix(".pub.pem")
                .map(str::to_owned)
        })
        .collect();
    names.sort();

    for name in &names {
        let pem = fs::read_to_string(public_key_path(&keys_dir, name))?;
        println!(
            "  {} {}",
            format!("{}:", name).bright_black(),
            fingerprint(&pem).bright_yellow()
        );
    }

    if names.is_empty() {
        println!("  {}", "No keypairs found.".yellow());
    }

    println!();
    Ok(())
}

/// Write a private key readable only by its owner.
fn write_private_key(path: &Path, pem: &str) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(pem.as_bytes())?;
    Ok(())
}

/// Short SHA-256 fingerprint of a PEM key for display.
fn fingerprint(pem: &str) -> String {
    hash(pem.as_bytes()).to_hex()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{load_keypair, load_public_key};

    #[test]
    fn test_new_keypair_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        new_keypair(dir.path().to_path_buf(), "alice".into(), 1024).unwrap();

        let keys_dir = dir.path().join("keys");
        let keypair = load_keypair(&keys_dir, "alice").unwrap();
        let public_key = load_public_key(&keys_dir, "alice").unwrap();
        assert_eq!(keypair.public_key, public_key);
        assert_eq!(public_key.bits(), 1024);

        list_keypairs(dir.path().to_path_buf()).unwrap();
    }

    #[test]
    fn test_new_keypair_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        new_keypair(dir.path().to_path_buf(), "alice".into(), 1024).unwrap();
        assert!(new_keypair(dir.path().to_path_buf(), "alice".into(), 1024).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_private_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        new_keypair(dir.path().to_path_buf(), "alice".into(), 1024).unwrap();

        let keys_dir = dir.path().join("keys");
        let mode = |path: PathBuf| fs::metadata(path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(private_key_path(&keys_dir, "alice")), 0o600);
    }

    #[test]
    fn test_missing_key_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_keypair(dir.path(), "nobody").is_err());
    }
}
