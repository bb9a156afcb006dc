use clap::{Parser, Subcommand};
use colored::Colorize;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell};
use jsonlt::{JsonltError, Key, KeyScalar, KeySpec, Record, Result, Table, TableOptions};
use tracing::debug;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new table file
    #[command(alias = "c")]
    Create {
        /// Path of the table file
        path: String,

        /// Key field name; comma separated for compound keys (e.g. "c,o")
        #[arg(short, long)]
        key: String,
    },

    /// Print the record stored under a key
    #[command(alias = "g")]
    Get { path: String, key: String },

    /// Insert or update one record, given as a JSON object
    #[command(alias = "p")]
    Put { path: String, record: String },

    /// Delete the record stored under a key
    #[command(alias = "del")]
    Delete { path: String, key: String },

    /// Print all live keys in canonical order
    Keys { path: String },

    /// Show the materialized records as a table
    #[command(alias = "ls")]
    List {
        path: String,

        /// Limit the number of rows
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Count live records
    Count { path: String },

    /// Rewrite the file, dropping superseded lines and tombstones
    Compact { path: String },
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Create { path, key } => {
            let table = Table::open(&path, Some(parse_spec(&key)), TableOptions::default())?;
            println!(
                "{} {} (key: {})",
                "created".green(),
                table.path().display(),
                table.key_spec()
            );
        }
        Commands::Get { path, key } => {
            let table = open(&path)?;
            match table.get(parse_key(&key))? {
                Some(record) => println!("{}", pretty(&record)),
                None => println!("{}", "(absent)".dimmed()),
            }
        }
        Commands::Put { path, record } => {
            let table = open(&path)?;
            table.put(parse_record(&record)?)?;
            println!("{}", "ok".green());
        }
        Commands::Delete { path, key } => {
            let table = open(&path)?;
            table.delete(parse_key(&key))?;
            println!("{}", "deleted".green());
        }
        Commands::Keys { path } => {
            let table = open(&path)?;
            for key in table.keys()? {
                println!("{key}");
            }
        }
        Commands::List { path, limit } => {
            let table = open(&path)?;
            list_records(&table, limit)?;
        }
        Commands::Count { path } => {
            let table = open(&path)?;
            println!("{}", table.count()?);
        }
        Commands::Compact { path } => {
            let table = open(&path)?;
            let before = table.count()?;
            table.compact()?;
            println!("{} {} live records kept", "compacted".green(), before);
        }
    }
    Ok(())
}

fn open(path: &str) -> Result<Table> {
    // Adopt whatever key specifier the file declares.
    Table::open(path, None, TableOptions::default())
}

fn list_records(table: &Table, limit: Option<usize>) -> Result<()> {
    let items = table.items()?;
    let shown = limit.unwrap_or(items.len());

    let mut out = comfy_table::Table::new();
    out.load_preset(UTF8_FULL).set_header(vec!["Key", "Record"]);
    for (key, record) in items.iter().take(shown) {
        out.add_row(vec![
            Cell::new(key.to_string()),
            Cell::new(serde_json::to_string(record).unwrap_or_default())
                .add_attribute(Attribute::Dim),
        ]);
    }
    println!("{out}");
    if items.len() > shown {
        println!("{}", format!("… {} more", items.len() - shown).dimmed());
    }
    Ok(())
}

/// "c,o" is a compound specifier; anything without a comma is a single one.
fn parse_spec(raw: &str) -> KeySpec {
    if raw.contains(',') {
        KeySpec::compound(raw.split(',').map(str::trim))
    } else {
        KeySpec::single(raw.trim())
    }
}

/// Integer-looking components become integer keys, everything else strings.
fn parse_key(raw: &str) -> Key {
    debug!(raw, "parsing key argument");
    let mut parts: Vec<KeyScalar> = raw.split(',').map(parse_scalar).collect();
    if parts.len() == 1 {
        Key::Single(parts.remove(0))
    } else {
        Key::Compound(parts)
    }
}

fn parse_scalar(raw: &str) -> KeyScalar {
    let raw = raw.trim();
    match raw.parse::<i64>() {
        Ok(n) => KeyScalar::Int(n),
        Err(_) => KeyScalar::Str(raw.to_string()),
    }
}

fn parse_record(raw: &str) -> Result<Record> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| JsonltError::InvalidRecord(e.to_string()))?;
    match value {
        serde_json::Value::Object(record) => Ok(record),
        _ => Err(JsonltError::InvalidRecord(
            "expected a JSON object".to_string(),
        )),
    }
}

fn pretty(record: &Record) -> String {
    serde_json::to_string_pretty(record).unwrap_or_default()
}
