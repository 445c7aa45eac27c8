use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use rekon_apply::{plan_tags, ReconcilerConfig};
use rekon_core::{CompositeKey, ResourceKey, ResourceKind, StateRecord, TagSet};
use rekon_gateway::RetryPolicy;
use rekon_persist::{SqliteStateStore, StateStore, StoredRecord};
use rekon_resources::{AccessGrant, CostAllocationTag, JobQueue};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rekonctl", version, about = "Rekon CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// State database (default: $REKON_DB_PATH or ~/.rekon/rekon.db)
    #[arg(long = "db", global = true, env = "REKON_DB_PATH")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encode or decode resource ids
    Key {
        #[command(subcommand)]
        action: KeyCmd,
    },
    /// Inspect stored state records
    State {
        #[command(subcommand)]
        action: StateCmd,
    },
    /// Tag set operations
    Tags {
        #[command(subcommand)]
        action: TagsCmd,
    },
    /// Print the effective reconciler and retry configuration
    Config {
        /// YAML file overriding the environment
        #[arg(long = "file")]
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum KeyCmd {
    /// Join components into one id, escaping delimiters
    Encode { parts: Vec<String> },
    /// Split an id into its components
    Decode {
        id: String,
        /// Number of components expected
        #[arg(long = "arity", default_value_t = 2)]
        arity: usize,
    },
}

#[derive(Subcommand, Debug)]
enum StateCmd {
    /// List stored addresses
    Ls,
    /// Show the newest record for an address
    Show { address: String },
    /// Show the retained records for an address, newest first
    History {
        address: String,
        #[arg(long = "limit")]
        limit: Option<usize>,
    },
    /// Forget an address without touching the remote object
    Rm {
        address: String,
        #[arg(long = "yes", action = ArgAction::SetTrue)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum TagsCmd {
    /// Minimal upsert/remove operations turning observed into desired
    Diff {
        #[arg(long = "desired")]
        desired: PathBuf,
        #[arg(long = "observed")]
        observed: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("REKON_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("REKON_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid REKON_METRICS_ADDR; expected host:port");
        }
    }
}

fn open_store(db: Option<&str>) -> Result<SqliteStateStore> {
    match db {
        Some(path) => SqliteStateStore::open(path),
        None => SqliteStateStore::open_default(),
    }
}

/// Decode a stored row with the attribute type of its kind, so a corrupt or
/// mismatched record is reported instead of printed.
fn decode_typed(row: &StoredRecord) -> Result<serde_json::Value> {
    fn check<K: ResourceKind>(row: &StoredRecord) -> Result<serde_json::Value> {
        let rec: StateRecord<K::Declared> = row.decode()?;
        if let Some(key) = rec.key(K::KEY_ARITY) {
            key.with_context(|| format!("stored id for {} is malformed", row.address))?;
        }
        Ok(serde_json::to_value(&rec)?)
    }
    match row.kind.as_str() {
        k if k == JobQueue::TYPE_NAME => check::<JobQueue>(row),
        k if k == CostAllocationTag::TYPE_NAME => check::<CostAllocationTag>(row),
        k if k == AccessGrant::TYPE_NAME => check::<AccessGrant>(row),
        other => {
            warn!(kind = other, address = %row.address, "unknown resource kind; showing raw record");
            serde_json::from_str(&row.json).context("parsing stored record")
        }
    }
}

fn read_tags(path: &PathBuf) -> Result<TagSet> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing tags from {}", path.display()))
}

fn render_ts(ts: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_json<T: Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Key { action } => match action {
            KeyCmd::Encode { parts } => {
                let key = CompositeKey::new(parts).map_err(|e| anyhow!("invalid key: {}", e))?;
                println!("{}", ResourceKey::from(key));
            }
            KeyCmd::Decode { id, arity } => {
                let key = ResourceKey::parse(&id, arity).map_err(|e| anyhow!("invalid id {:?}: {}", id, e))?;
                let parts: Vec<String> = match &key {
                    ResourceKey::Single(s) => vec![s.clone()],
                    ResourceKey::Composite(k) => k.parts().to_vec(),
                };
                match cli.output {
                    Output::Human => parts.iter().enumerate().for_each(|(i, p)| println!("{}\t{}", i, p)),
                    Output::Json => print_json(&parts)?,
                }
            }
        },
        Commands::State { action } => {
            let store = open_store(cli.db.as_deref())?;
            match action {
                StateCmd::Ls => {
                    let mut rows = Vec::new();
                    for address in store.addresses()? {
                        if let Some(row) = store.latest(&address)? {
                            rows.push(row);
                        }
                    }
                    match cli.output {
                        Output::Human => {
                            println!("{:<40} {:<22} UPDATED", "ADDRESS", "KIND");
                            for r in &rows {
                                println!("{:<40} {:<22} {}", r.address, r.kind, render_ts(r.ts));
                            }
                        }
                        Output::Json => {
                            #[derive(Serialize)]
                            struct Row<'a> { address: &'a str, kind: &'a str, ts: i64 }
                            let out: Vec<_> = rows.iter().map(|r| Row { address: &r.address, kind: &r.kind, ts: r.ts }).collect();
                            print_json(&out)?;
                        }
                    }
                }
                StateCmd::Show { address } => {
                    let row = store.latest(&address)?.ok_or_else(|| anyhow!("no state for {}", address))?;
                    let rec = decode_typed(&row)?;
                    match cli.output {
                        Output::Human => {
                            println!("address: {}", row.address);
                            println!("kind:    {}", row.kind);
                            println!("updated: {}", render_ts(row.ts));
                            print!("{}", serde_yaml::to_string(&rec)?);
                        }
                        Output::Json => print_json(&rec)?,
                    }
                }
                StateCmd::History { address, limit } => {
                    let rows = store.history(&address, limit)?;
                    if rows.is_empty() {
                        bail!("no state for {}", address);
                    }
                    match cli.output {
                        Output::Human => {
                            for r in &rows {
                                let id = decode_typed(r)?.get("id").and_then(|v| v.as_str()).map(str::to_string);
                                println!("{}  {}", render_ts(r.ts), id.as_deref().unwrap_or("-"));
                            }
                        }
                        Output::Json => {
                            let out = rows.iter().map(decode_typed).collect::<Result<Vec<_>>>()?;
                            print_json(&out)?;
                        }
                    }
                }
                StateCmd::Rm { address, yes } => {
                    if !yes {
                        bail!("refusing to forget {} without --yes; the remote object is left untouched", address);
                    }
                    let removed = store.forget(&address)?;
                    info!(address = %address, removed, "state forgotten");
                    if removed == 0 {
                        eprintln!("no state for {}", address);
                    }
                }
            }
        }
        Commands::Tags { action } => match action {
            TagsCmd::Diff { desired, observed } => {
                let diff = plan_tags(&read_tags(&desired)?, &read_tags(&observed)?);
                match cli.output {
                    Output::Human => {
                        for (k, v) in &diff.upsert {
                            println!("+ {}={}", k, v);
                        }
                        for k in &diff.remove {
                            println!("- {}", k);
                        }
                        if diff.is_empty() {
                            println!("(no changes)");
                        }
                    }
                    Output::Json => print_json(&diff)?,
                }
            }
        },
        Commands::Config { file } => {
            let reconciler = match &file {
                Some(path) => ReconcilerConfig::from_file(path)?,
                None => ReconcilerConfig::from_env(),
            };
            #[derive(Serialize)]
            struct Effective { reconciler: ReconcilerConfig, retry: RetryPolicy }
            let eff = Effective { reconciler, retry: RetryPolicy::from_env() };
            match cli.output {
                Output::Human => print!("{}", serde_yaml::to_string(&eff)?),
                Output::Json => print_json(&eff)?,
            }
        }
    }

    Ok(())
}
