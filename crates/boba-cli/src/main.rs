//! Boba CLI - track milk-tea purchases from the command line.
//!
//! Quick capture pastes a model answer straight onto the command line;
//! the extractor pulls the structured record out of it.

mod config;
mod connectivity;

use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use boba_core::export::render_records_export;
use boba_core::extract::extract_record;
use boba_core::gateway::{AuthClient, HttpRecordGateway, RecordFilter};
use boba_core::reconciler::{CommitTarget, Reconciler, SyncError, SyncReport};
use boba_core::store::LocalRecordStore;
use boba_core::{PurchaseRecord, RecordId, RecordPatch, SyncState};
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, shells, Generator};
use thiserror::Error;

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080";

#[derive(Parser)]
#[command(name = "boba")]
#[command(about = "Track milk-tea purchases from the command line")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Optional path to the local record store file
    #[arg(long, value_name = "PATH", global = true)]
    store_path: Option<PathBuf>,

    /// Force offline mode (no network calls)
    #[arg(long, global = true)]
    offline: bool,

    /// Quick capture: boba "奶茶品牌：一点点 奶茶口味：波霸 奶茶价格：17元"
    #[arg(trailing_var_arg = true)]
    text: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse free text into a purchase record and save it
    #[command(alias = "new")]
    Add {
        /// Text containing labeled brand, flavor, price and date
        text: Vec<String>,
    },
    /// Apply nutrition facts found in free text to an existing record
    Enrich {
        /// Record id or unique id prefix
        id: String,
        /// Text containing labeled nutrition values
        text: Vec<String>,
    },
    /// List records, newest purchase first
    List {
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Filter by brand substring
        #[arg(long)]
        brand: Option<String>,
        /// Filter by flavor substring
        #[arg(long)]
        flavor: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show aggregate statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update fields of an existing record
    Edit {
        /// Record id or unique id prefix
        id: String,
        #[arg(long)]
        brand: Option<String>,
        #[arg(long)]
        flavor: Option<String>,
        #[arg(long)]
        price: Option<f64>,
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,
        #[arg(long)]
        calories: Option<u32>,
        #[arg(long)]
        sugar: Option<f64>,
        #[arg(long)]
        caffeine: Option<f64>,
        #[arg(long)]
        fat: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Delete an existing record
    Delete {
        /// Record id or unique id prefix
        id: String,
    },
    /// Push unsynced records to the server
    Sync,
    /// Account session management
    #[command(subcommand)]
    Auth(AuthCommands),
    /// Export records
    Export {
        /// Export format
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Manage CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum AuthCommands {
    /// Create an account on the configured server
    Register {
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// Log in and persist the session locally
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Show the current session and pending sync backlog
    Status,
    /// Discard the persisted session
    Logout,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the API base URL into the CLI config file
    Init {
        #[arg(long, value_name = "URL")]
        api_base_url: String,
    },
    /// Print the current configuration
    Show,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] boba_core::Error),
    #[error(transparent)]
    Gateway(#[from] boba_core::gateway::GatewayError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No record text provided")]
    EmptyCapture,
    #[error("Could not parse a record from the text; it needs labeled 品牌, 口味 and 价格 values")]
    ExtractFailed,
    #[error("Record id cannot be empty")]
    EmptyRecordId,
    #[error("Record not found for id/prefix: {0}")]
    RecordNotFound(String),
    #[error("{0}")]
    AmbiguousRecordId(String),
    #[error("API base URL must start with http:// or https://: {0}")]
    InvalidApiBaseUrl(String),
    #[error("Synced {synced} record(s); {failed} failed — run `boba sync` again to retry")]
    SyncIncomplete { synced: usize, failed: usize },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum ExportFormat {
    Json,
    Markdown,
}

impl From<ExportFormat> for boba_core::export::ExportFormat {
    fn from(format: ExportFormat) -> Self {
        match format {
            ExportFormat::Json => Self::Json,
            ExportFormat::Markdown => Self::Markdown,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("boba=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    let store_path = cli
        .store_path
        .clone()
        .unwrap_or_else(config::default_store_path);
    let cli_config = config::load(&config::default_config_path())?;
    let api_base_url = cli_config
        .api_base_url
        .clone()
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

    match cli.command {
        Some(Commands::Add { text }) => {
            run_add(&text, &store_path, &api_base_url, cli.offline).await?;
        }
        Some(Commands::Enrich { id, text }) => {
            run_enrich(&id, &text, &store_path, &api_base_url, cli.offline).await?;
        }
        Some(Commands::List {
            limit,
            brand,
            flavor,
            json,
        }) => {
            run_list(
                limit,
                brand.as_deref(),
                flavor.as_deref(),
                json,
                &store_path,
                &api_base_url,
                cli.offline,
            )
            .await?;
        }
        Some(Commands::Stats { json }) => {
            run_stats(json, &store_path, &api_base_url, cli.offline).await?;
        }
        Some(Commands::Edit {
            id,
            brand,
            flavor,
            price,
            date,
            calories,
            sugar,
            caffeine,
            fat,
            notes,
        }) => {
            let patch = RecordPatch {
                brand,
                flavor,
                price,
                purchase_date: date,
                calories,
                sugar,
                caffeine,
                fat,
                notes,
            };
            run_edit(&id, patch, &store_path, &api_base_url, cli.offline).await?;
        }
        Some(Commands::Delete { id }) => {
            run_delete(&id, &store_path, &api_base_url, cli.offline).await?;
        }
        Some(Commands::Sync) => run_sync(&store_path, &api_base_url, cli.offline).await?,
        Some(Commands::Auth(command)) => {
            run_auth(command, &store_path, &api_base_url).await?;
        }
        Some(Commands::Export { format, output }) => {
            run_export(
                format,
                output.as_deref(),
                &store_path,
                &api_base_url,
                cli.offline,
            )
            .await?;
        }
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        Some(Commands::Config(command)) => run_config(command)?,
        None => {
            // Quick capture mode: boba "一点点 波霸奶茶 17元"
            if cli.text.is_empty() {
                Cli::command().print_help().map_err(CliError::Io)?;
                println!();
            } else {
                run_add(&cli.text, &store_path, &api_base_url, cli.offline).await?;
            }
        }
    }

    Ok(())
}

fn build_reconciler(
    store_path: &Path,
    api_base_url: &str,
    offline: bool,
) -> Result<Reconciler<HttpRecordGateway, impl Fn() -> bool>, CliError> {
    let store = LocalRecordStore::open(store_path)?;
    let session = store.session().cloned();
    let token = session.as_ref().map(|session| session.token.clone());
    let gateway = HttpRecordGateway::new(api_base_url, token)?;

    // One reachability decision per invocation.
    let online = !connectivity::forced_offline(offline) && connectivity::probe(api_base_url);
    Ok(Reconciler::new(store, gateway, session, move || online))
}

async fn run_add(
    text_parts: &[String],
    store_path: &Path,
    api_base_url: &str,
    offline: bool,
) -> Result<(), CliError> {
    let text = text_parts.join(" ");
    if text.trim().is_empty() {
        return Err(CliError::EmptyCapture);
    }

    let today = chrono::Local::now().date_naive();
    let draft = extract_record(&text, today).ok_or(CliError::ExtractFailed)?;

    let mut reconciler = build_reconciler(store_path, api_base_url, offline)?;
    let committed = reconciler.create(draft).await?;
    match committed.target {
        CommitTarget::Remote => println!("Saved to server ({})", committed.record.id),
        CommitTarget::Local => println!(
            "Saved locally ({}); run `boba sync` when back online",
            committed.record.id
        ),
    }
    Ok(())
}

async fn run_enrich(
    id: &str,
    text_parts: &[String],
    store_path: &Path,
    api_base_url: &str,
    offline: bool,
) -> Result<(), CliError> {
    let text = text_parts.join(" ");
    if text.trim().is_empty() {
        return Err(CliError::EmptyCapture);
    }

    let mut reconciler = build_reconciler(store_path, api_base_url, offline)?;
    let record_id = resolve_record_id(reconciler.store().list(), id)?;
    match reconciler.enrich(&record_id, &text).await? {
        Some(committed) => println!("Updated {}", committed.record.id),
        None => println!("No nutrition facts found in the text; nothing updated"),
    }
    Ok(())
}

async fn run_list(
    limit: usize,
    brand: Option<&str>,
    flavor: Option<&str>,
    as_json: bool,
    store_path: &Path,
    api_base_url: &str,
    offline: bool,
) -> Result<(), CliError> {
    let mut reconciler = build_reconciler(store_path, api_base_url, offline)?;
    let filter = RecordFilter {
        brand: brand.map(ToOwned::to_owned),
        flavor: flavor.map(ToOwned::to_owned),
        ..RecordFilter::default()
    };
    let mut records = reconciler.list(&filter).await?;

    // The offline path serves the unfiltered local cache.
    if let Some(brand) = brand {
        records.retain(|record| record.brand.contains(brand));
    }
    if let Some(flavor) = flavor {
        records.retain(|record| record.flavor.contains(flavor));
    }
    records.truncate(limit);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else if records.is_empty() {
        println!("No records yet");
    } else {
        for line in format_record_lines(&records) {
            println!("{line}");
        }
    }
    Ok(())
}

async fn run_stats(
    as_json: bool,
    store_path: &Path,
    api_base_url: &str,
    offline: bool,
) -> Result<(), CliError> {
    let reconciler = build_reconciler(store_path, api_base_url, offline)?;
    let summary = reconciler.stats().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Records:       {}", summary.total_count);
    println!("Total spent:   {:.2}", summary.total_spent);
    println!("Average price: {:.2}", summary.avg_price);
    if let Some(avg_calories) = summary.avg_calories {
        println!("Average kcal:  {avg_calories:.0}");
    }
    if !summary.brands.is_empty() {
        let brands = summary
            .brands
            .iter()
            .take(5)
            .map(|entry| format!("{} ({})", entry.brand, entry.count))
            .collect::<Vec<_>>()
            .join(", ");
        println!("Top brands:    {brands}");
    }
    if !summary.flavors.is_empty() {
        let flavors = summary
            .flavors
            .iter()
            .take(5)
            .map(|entry| format!("{} ({})", entry.flavor, entry.count))
            .collect::<Vec<_>>()
            .join(", ");
        println!("Top flavors:   {flavors}");
    }
    Ok(())
}

async fn run_edit(
    id: &str,
    patch: RecordPatch,
    store_path: &Path,
    api_base_url: &str,
    offline: bool,
) -> Result<(), CliError> {
    let mut reconciler = build_reconciler(store_path, api_base_url, offline)?;
    let record_id = resolve_record_id(reconciler.store().list(), id)?;
    let committed = reconciler.update(&record_id, patch).await?;
    match committed.target {
        CommitTarget::Remote => println!("Updated {}", committed.record.id),
        CommitTarget::Local => println!(
            "Updated {} locally; run `boba sync` when back online",
            committed.record.id
        ),
    }
    Ok(())
}

async fn run_delete(
    id: &str,
    store_path: &Path,
    api_base_url: &str,
    offline: bool,
) -> Result<(), CliError> {
    let mut reconciler = build_reconciler(store_path, api_base_url, offline)?;
    let record_id = resolve_record_id(reconciler.store().list(), id)?;
    match reconciler.delete(&record_id).await? {
        CommitTarget::Remote => println!("Deleted {record_id}"),
        CommitTarget::Local => println!("Deleted {record_id} (local only)"),
    }
    Ok(())
}

async fn run_sync(store_path: &Path, api_base_url: &str, offline: bool) -> Result<(), CliError> {
    let mut reconciler = build_reconciler(store_path, api_base_url, offline)?;
    let report = reconciler.sync().await?;
    print_sync_report(&report);

    if report.failed > 0 {
        return Err(CliError::SyncIncomplete {
            synced: report.synced,
            failed: report.failed,
        });
    }
    Ok(())
}

fn print_sync_report(report: &SyncReport) {
    if report.total == 0 {
        println!("Nothing to sync");
        return;
    }
    for outcome in &report.outcomes {
        match (&outcome.server_id, &outcome.error) {
            (Some(server_id), _) => println!("  {} -> {server_id}", outcome.id),
            (None, Some(error)) => println!("  {} failed: {error}", outcome.id),
            (None, None) => {}
        }
    }
    println!("Synced {} of {} record(s)", report.synced, report.total);
}

async fn run_auth(
    command: AuthCommands,
    store_path: &Path,
    api_base_url: &str,
) -> Result<(), CliError> {
    match command {
        AuthCommands::Register {
            username,
            password,
            email,
        } => {
            let client = AuthClient::new(api_base_url)?;
            let session = client
                .register(&username, &password, email.as_deref())
                .await?;
            let mut store = LocalRecordStore::open(store_path)?;
            println!("Registered and logged in as {}", session.username);
            store.save_session(session)?;
        }
        AuthCommands::Login { username, password } => {
            let client = AuthClient::new(api_base_url)?;
            let session = client.login(&username, &password).await?;
            let mut store = LocalRecordStore::open(store_path)?;
            println!("Logged in as {}", session.username);
            store.save_session(session)?;
        }
        AuthCommands::Status => {
            let store = LocalRecordStore::open(store_path)?;
            match store.session() {
                Some(session) => println!("Logged in as {}", session.username),
                None => println!("Not logged in"),
            }
            let pending = store.unsynced_only().len();
            println!("Pending sync: {pending} record(s)");
            if let Some(last_sync) = store.last_sync() {
                let when = chrono::DateTime::from_timestamp_millis(last_sync)
                    .map_or_else(|| last_sync.to_string(), |time| time.to_rfc3339());
                println!("Last sync:    {when}");
            }
        }
        AuthCommands::Logout => {
            let mut store = LocalRecordStore::open(store_path)?;
            store.clear_session()?;
            println!("Logged out");
        }
    }
    Ok(())
}

async fn run_export(
    format: ExportFormat,
    output_path: Option<&Path>,
    store_path: &Path,
    api_base_url: &str,
    offline: bool,
) -> Result<(), CliError> {
    let mut reconciler = build_reconciler(store_path, api_base_url, offline)?;
    let records = reconciler.list(&RecordFilter::default()).await?;
    let rendered = render_records_export(&records, format.into())?;

    if let Some(path) = output_path {
        std::fs::write(path, rendered)?;
        println!("{}", path.display());
    } else {
        println!("{rendered}");
    }
    Ok(())
}

fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let mut command = Cli::command();
    let mut buffer = Vec::new();

    match shell {
        CompletionShell::Bash => generate_for_shell(shells::Bash, &mut command, &mut buffer),
        CompletionShell::Zsh => generate_for_shell(shells::Zsh, &mut command, &mut buffer),
        CompletionShell::Fish => generate_for_shell(shells::Fish, &mut command, &mut buffer),
    }

    if let Some(path) = output_path {
        std::fs::write(path, &buffer)?;
        println!("{}", path.display());
    } else {
        io::stdout().write_all(&buffer)?;
    }

    Ok(())
}

fn generate_for_shell<G: Generator>(
    generator: G,
    command: &mut clap::Command,
    buffer: &mut Vec<u8>,
) {
    generate(generator, command, "boba", buffer);
}

fn run_config(command: ConfigCommands) -> Result<(), CliError> {
    let path = config::default_config_path();
    match command {
        ConfigCommands::Init { api_base_url } => {
            if !config::is_http_url(&api_base_url) {
                return Err(CliError::InvalidApiBaseUrl(api_base_url));
            }
            let mut cli_config = config::load(&path)?;
            cli_config.api_base_url = Some(api_base_url.trim().trim_end_matches('/').to_string());
            config::save(&path, &cli_config)?;
            println!("{}", path.display());
        }
        ConfigCommands::Show => {
            let cli_config = config::load(&path)?;
            println!("{}", serde_json::to_string_pretty(&cli_config)?);
        }
    }
    Ok(())
}

/// Resolve a full id or a unique prefix against the local store.
fn resolve_record_id(records: &[PurchaseRecord], query: &str) -> Result<RecordId, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::EmptyRecordId);
    }

    // Exact server id first: it may not be in the local cache yet.
    if let Ok(id) = query.parse::<RecordId>() {
        if !id.is_local() || records.iter().any(|record| record.id == id) {
            return Ok(id);
        }
    }

    let matches: Vec<&RecordId> = records
        .iter()
        .map(|record| &record.id)
        .filter(|id| id.to_string().starts_with(query))
        .collect();

    match matches.len() {
        0 => Err(CliError::RecordNotFound(query.to_string())),
        1 => Ok(matches[0].clone()),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|id| short_id(id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousRecordId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

fn format_record_lines(records: &[PurchaseRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let id = short_id(&record.id);
            let sync = match record.sync_state {
                SyncState::Synced => "synced",
                SyncState::Local => "local",
            };
            let mut line = format!(
                "{id:<13}  {}  {:<10}  {:<16}  {:>7.2}  {sync}",
                record.purchase_date, record.brand, record.flavor, record.price
            );
            if let Some(notes) = record.notes.as_deref() {
                line.push_str("  ");
                line.push_str(notes);
            }
            line
        })
        .collect()
}

fn short_id(id: &RecordId) -> String {
    id.to_string().chars().take(13).collect()
}
