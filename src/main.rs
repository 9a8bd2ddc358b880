//! # HealthLens CLI (`hl`)
//!
//! Scan a barcode, photograph a nutrition label, or search by name and get
//! a 0–100 health verdict with the reasons behind it.
//!
//! ## Usage
//!
//! ```bash
//! hl --config ./config/hl.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hl init` | Create the SQLite database and run schema migrations |
//! | `hl analyze --barcode <code>` | Analyze a product by barcode |
//! | `hl analyze --image <path>` | Analyze a nutrition label photo |
//! | `hl analyze --search "<name>"` | Analyze a product found by name |
//! | `hl analyze ... --no-history` | Analyze without recording the verdict |
//! | `hl history list` | Recent analyses |
//! | `hl history show <identity>` | Latest verdict for one product |
//! | `hl history search` | Filter history by name, score, band |
//! | `hl history stats` | Summary statistics |
//! | `hl history export` | Dump history as JSON |
//! | `hl serve` | Start the HTTP API |
//!
//! Logs go to stderr; set `RUST_LOG=debug` for more detail.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use healthlens::config::{self, Config};
use healthlens::error::PipelineError;
use healthlens::history::{HistoryQuery, HistoryStore, InMemoryHistoryStore, SqliteHistoryStore};
use healthlens::models::{Band, RawInput};
use healthlens::pipeline::Pipeline;
use healthlens::{db, export, migrate, server, stats};

/// HealthLens: product health verdicts from barcodes, label photos, and names.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/hl.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "hl", version, about = "HealthLens: evidence-backed product health verdicts")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Analyze one product.
    Analyze {
        #[command(flatten)]
        input: InputArgs,

        /// Overall deadline in seconds (defaults to `[pipeline].request_timeout_secs`).
        #[arg(long)]
        timeout: Option<f64>,

        /// Print the verdict as JSON instead of text.
        #[arg(long)]
        json: bool,

        /// Keep the verdict in memory only; the database is not opened.
        #[arg(long)]
        no_history: bool,
    },

    /// Browse past analyses.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct InputArgs {
    /// Product barcode (EAN-8, UPC-A, EAN-13 or GTIN-14).
    #[arg(long)]
    barcode: Option<String>,

    /// Photo of the nutrition label and ingredient list.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Product name to search for.
    #[arg(long)]
    search: Option<String>,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Most recent analyses first.
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(long)]
        json: bool,
    },
    /// Latest verdict for a product identity (barcode, `label:…`, `search:…`).
    Show { identity: String },
    /// Filter by name substring, minimum score and band.
    Search {
        /// Case-insensitive substring of the product name.
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        min_score: Option<u8>,
        /// Good, Medium or Poor.
        #[arg(long)]
        band: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Totals, average score, and band distribution.
    Stats,
    /// Export all history as JSON.
    Export {
        /// Output file. Writes to stdout when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Analyze {
            input,
            timeout,
            json,
            no_history,
        } => {
            let input = input.into_raw()?;
            let timeout = match timeout {
                Some(t) if t.is_finite() && t > 0.0 => Some(Duration::from_secs_f64(t)),
                Some(t) => bail!("--timeout must be a positive number of seconds, got {}", t),
                None => None,
            };
            let store: Arc<dyn HistoryStore> = if no_history {
                Arc::new(InMemoryHistoryStore::new(cfg.history.dedup_window_secs))
            } else {
                open_history(&cfg).await?
            };
            let pipeline = Pipeline::from_config(&cfg, store)?;

            match pipeline.analyze(&input, timeout).await {
                Ok(verdict) if json => println!("{}", serde_json::to_string_pretty(&verdict)?),
                Ok(verdict) => stats::print_verdict(&verdict),
                Err(e) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&e.to_json())?);
                    } else {
                        stats::print_error(&e);
                    }
                    std::process::exit(exit_code(&e));
                }
            }
        }
        Commands::History { action } => {
            let store = open_history(&cfg).await?;
            match action {
                HistoryAction::List {
                    limit,
                    offset,
                    json,
                } => {
                    let entries = store.list(limit, offset).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    } else {
                        stats::print_entries(&entries);
                    }
                }
                HistoryAction::Show { identity } => {
                    match store.find_by_identity(&identity).await? {
                        Some(entry) => stats::print_verdict(&entry.verdict),
                        None => bail!("No history for '{}'", identity),
                    }
                }
                HistoryAction::Search {
                    name,
                    min_score,
                    band,
                    limit,
                } => {
                    let band = match band {
                        Some(b) => Some(
                            Band::parse(&b)
                                .with_context(|| format!("Unknown band '{}'", b))?,
                        ),
                        None => None,
                    };
                    let entries = store
                        .search(&HistoryQuery {
                            name_contains: name,
                            min_score,
                            band,
                            limit,
                        })
                        .await?;
                    stats::print_entries(&entries);
                }
                HistoryAction::Stats => {
                    stats::print_stats(&store.stats().await?, &cfg.db.path);
                }
                HistoryAction::Export { output } => {
                    export::run_export(store.as_ref(), output.as_deref()).await?;
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

impl InputArgs {
    fn into_raw(self) -> anyhow::Result<RawInput> {
        if let Some(code) = self.barcode {
            return Ok(RawInput::Barcode(code));
        }
        if let Some(query) = self.search {
            return Ok(RawInput::SearchText(query));
        }
        let Some(path) = self.image else {
            bail!("one of --barcode, --image, --search is required");
        };
        let bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        Ok(RawInput::LabelImage {
            bytes,
            mime: mime_for(&path)?.to_string(),
        })
    }
}

fn mime_for(path: &Path) -> anyhow::Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "png" => Ok("image/png"),
        "webp" => Ok("image/webp"),
        other => bail!("Unsupported image type '{}'. Use jpg, png or webp.", other),
    }
}

/// Open the history database, creating the schema if needed.
async fn open_history(cfg: &Config) -> anyhow::Result<Arc<dyn HistoryStore>> {
    let pool = db::open(cfg).await?;
    Ok(Arc::new(SqliteHistoryStore::new(
        pool,
        cfg.history.dedup_window_secs,
    )))
}

/// 2 for failures the user can act on, 1 otherwise.
fn exit_code(e: &PipelineError) -> i32 {
    if e.is_recoverable() {
        2
    } else {
        1
    }
}
