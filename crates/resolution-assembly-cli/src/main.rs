use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use resolution_assembly_api::{AssembleRequest, ResolutionAssemblyApi};
use resolution_assembly_core::{parse_date, ChangeId, RawChange, Resolution, ResolutionKey, VersionSpec};
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::Date;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "ra")]
#[command(about = "Resolution assembly CLI")]
struct Cli {
    #[arg(long, default_value = "./resolutions.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Resolution {
        #[command(subcommand)]
        command: ResolutionCommand,
    },
    Change {
        #[command(subcommand)]
        command: ChangeCommand,
    },
    /// Assemble a resolution at the selected version.
    Assemble(VersionArgs),
    /// Report which candidate changes of a resolution are valid.
    Validity(VersionArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Export(DbExportArgs),
    Import(DbImportArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbExportArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbImportArgs {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long, default_value_t = false)]
    skip_existing: bool,
}

#[derive(Debug, Subcommand)]
enum ResolutionCommand {
    /// Store a resolution read from a JSON file.
    Add(FileArgs),
}

#[derive(Debug, Subcommand)]
enum ChangeCommand {
    /// Store a change row read from a JSON file.
    Add(FileArgs),
    Candidates(ResolutionArgs),
    Affected(ChangeIdArgs),
}

#[derive(Debug, Args)]
struct FileArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Args)]
struct ResolutionArgs {
    /// Resolution key, e.g. `CSU-1/2012`.
    #[arg(long)]
    resolution: ResolutionKey,
}

#[derive(Debug, Args)]
struct ChangeIdArgs {
    #[arg(long)]
    change_id: String,
}

#[derive(Debug, Args)]
struct VersionArgs {
    #[arg(long)]
    resolution: ResolutionKey,
    /// Keep changes in effect on this date (`YYYY-MM-DD`).
    #[arg(long, value_parser = parse_date)]
    as_of: Option<Date>,
    /// Keep changes up to the last one issued by this resolution; falls back to `--as-of` when it
    /// issued none of them.
    #[arg(long)]
    caused_by: Option<ResolutionKey>,
    /// Stop before the selected date or issuer instead of including it.
    #[arg(long, default_value_t = false)]
    exclusive: bool,
}

impl VersionArgs {
    fn request(&self) -> AssembleRequest {
        AssembleRequest {
            resolution: self.resolution.clone(),
            version: VersionSpec { date: self.as_of, caused_by: self.caused_by.clone(), exclusive: self.exclusive },
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert("contract_version".to_string(), Value::String(CLI_CONTRACT_VERSION.to_string()));
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let api = ResolutionAssemblyApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Resolution { command } => run_resolution(command, &api),
        Command::Change { command } => run_change(command, &api),
        Command::Assemble(args) => {
            let response = api.assemble(&args.request())?;
            emit_json(serde_json::to_value(&response).context("failed to serialize assembly")?)
        }
        Command::Validity(args) => {
            let response = api.valid_changes(&args.request())?;
            emit_json(serde_json::to_value(&response).context("failed to serialize validity report")?)
        }
    }
}

fn run_db(command: DbCommand, api: &ResolutionAssemblyApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => {
            let result = api.migrate(args.dry_run)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize migration result")?)
        }
        DbCommand::Export(args) => {
            let manifest = api.export_corpus(&args.out)?;
            emit_json(serde_json::json!({
                "out_dir": args.out,
                "manifest": manifest
            }))
        }
        DbCommand::Import(args) => {
            let summary = api.import_corpus(&args.input, args.skip_existing)?;
            emit_json(serde_json::json!({
                "in_dir": args.input,
                "skip_existing": args.skip_existing,
                "summary": summary
            }))
        }
    }
}

fn run_resolution(command: ResolutionCommand, api: &ResolutionAssemblyApi) -> Result<()> {
    match command {
        ResolutionCommand::Add(args) => {
            let resolution: Resolution = read_json_file(&args.file)?;
            let key = api.add_resolution(&resolution)?;
            emit_json(serde_json::json!({
                "resolution": key.to_string(),
                "resolution_id": resolution.id.to_string()
            }))
        }
    }
}

fn run_change(command: ChangeCommand, api: &ResolutionAssemblyApi) -> Result<()> {
    match command {
        ChangeCommand::Add(args) => {
            let change: RawChange = read_json_file(&args.file)?;
            let affected = api.add_change(&change)?;
            emit_json(serde_json::to_value(&affected).context("failed to serialize affected resolutions")?)
        }
        ChangeCommand::Candidates(args) => {
            let changes = api.candidate_changes(&args.resolution)?;
            emit_json(serde_json::json!({
                "resolution": args.resolution.to_string(),
                "changes": changes
            }))
        }
        ChangeCommand::Affected(args) => {
            let change_id = parse_change_id(&args.change_id)?;
            let affected = api.affected_resolutions(change_id)?;
            emit_json(serde_json::to_value(&affected).context("failed to serialize affected resolutions")?)
        }
    }
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let body = fs::read_to_string(path).with_context(|| format!("failed to read JSON file {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("failed to parse JSON file {}", path.display()))
}

fn parse_change_id(raw: &str) -> Result<ChangeId> {
    let parsed = Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))?;
    Ok(ChangeId(parsed))
}
