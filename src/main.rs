//! sealdb - inspect and convert encrypted page stores

use anyhow::{bail, Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use log::warn;
use sealdb::codec::KeySecret;
use sealdb::database::{Database, ExecuteResult};
use sealdb::storage::PageId;
use std::path::{Path, PathBuf};

const DUMP_WIDTH: usize = 32;

/// sealdb - transparent page encryption for file-backed page stores
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Key of the database: a passphrase, or x'<64 hex digits>' for a raw key
    #[arg(short, long, global = true, env = "SEALDB_KEY", hide_env_values = true)]
    key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show whether a database is encrypted and with which parameters
    Info { path: PathBuf },
    /// Authenticate every page of an encrypted database
    Verify { path: PathBuf },
    /// Encrypt a plaintext database in place
    Encrypt {
        path: PathBuf,
        #[arg(long, env = "SEALDB_NEW_KEY", hide_env_values = true)]
        new_key: String,
    },
    /// Decrypt an encrypted database in place
    Decrypt { path: PathBuf },
    /// Re-encrypt a database under a new key
    Rekey {
        path: PathBuf,
        #[arg(long, env = "SEALDB_NEW_KEY", hide_env_values = true)]
        new_key: String,
    },
    /// Print the decrypted payload of one page as hex
    Dump {
        path: PathBuf,
        #[arg(short, long, default_value = "1")]
        page: u32,
    },
    /// Run key statements against a database
    Exec {
        path: PathBuf,
        #[arg(required = true)]
        statements: Vec<String>,
    },
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let key = args
        .key
        .as_deref()
        .map(KeySecret::parse)
        .transpose()
        .context("Invalid --key")?;

    match args.command {
        Command::Info { path } => {
            let db = open(&path, key.as_ref())?;
            println!("{}", db.status()?);
        }
        Command::Verify { path } => {
            let db = open(&path, key.as_ref())?;
            let corrupt = db.integrity_check()?;
            if !corrupt.is_empty() {
                let pages: Vec<String> = corrupt.iter().map(|p| p.to_string()).collect();
                bail!("{} corrupt page(s): {}", corrupt.len(), pages.join(", "));
            }
            println!("ok: {} pages authenticated", db.num_pages()?);
        }
        Command::Encrypt { path, new_key } => {
            let mut db = open(&path, None)?;
            if db.status()?.encrypted {
                bail!("{:?} is already encrypted; use rekey", path);
            }
            db.rekey(Some(&KeySecret::parse(&new_key).context("Invalid --new-key")?))?;
            println!("encrypted {:?}", path);
        }
        Command::Decrypt { path } => {
            let mut db = open(&path, Some(require_key(key.as_ref())?))?;
            db.rekey(None)?;
            println!("decrypted {:?}", path);
        }
        Command::Rekey { path, new_key } => {
            let mut db = open(&path, Some(require_key(key.as_ref())?))?;
            db.rekey(Some(&KeySecret::parse(&new_key).context("Invalid --new-key")?))?;
            println!("rekeyed {:?}", path);
        }
        Command::Dump { path, page } => {
            let db = open(&path, key.as_ref())?;
            let data = db.read_page(PageId(page))?;
            for (i, chunk) in data.chunks(DUMP_WIDTH).enumerate() {
                println!("{:08x}  {}", i * DUMP_WIDTH, hex::encode(chunk));
            }
        }
        Command::Exec { path, statements } => {
            let mut db = if path.exists() {
                open(&path, key.as_ref())?
            } else {
                let mut db = Database::create(&path)?;
                if let Some(key) = key.as_ref() {
                    db.set_key(key)?;
                }
                db
            };
            for sql in &statements {
                match db.execute(sql)? {
                    ExecuteResult::Done => {}
                    ExecuteResult::IntegrityCheck(pages) if pages.is_empty() => println!("ok"),
                    ExecuteResult::IntegrityCheck(pages) => {
                        for page in pages {
                            println!("page {}: authentication failed", page);
                        }
                    }
                    ExecuteResult::Status(status) => println!("{}", status),
                    ExecuteResult::Parameter { name, value } => println!("{} = {}", name, value),
                }
            }
        }
    }

    Ok(())
}

fn open(path: &Path, key: Option<&KeySecret>) -> Result<Database> {
    let mut db = Database::open(path)?;
    if let Some(key) = key {
        if !db.unlock(key)? {
            warn!("{:?} is not encrypted; ignoring the key", path);
        }
    }
    Ok(db)
}

fn require_key(key: Option<&KeySecret>) -> Result<&KeySecret> {
    key.context("This command needs --key or SEALDB_KEY")
}
