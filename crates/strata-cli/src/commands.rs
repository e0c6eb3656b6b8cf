use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _};
use colored::Colorize;
use serde::Deserialize;
use serde_json::Value;
use strata_config::StrataConfig;
use strata_db::{SqliteClassifier, SqliteDatabase};
use strata_ingest::{create_roots, BatchItem, IngestService};
use strata_types::{ContentId, ContentKind, ContentRecord, IngestOutcome, OwnerId};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    let config_path = cli.config;
    match cli.command {
        Command::Init(args) => cmd_init(&config_path, args),
        Command::Allocate(args) => cmd_allocate(&Env::open(&config_path)?, format, args),
        Command::Ingest(args) => cmd_ingest(&Env::open(&config_path)?, format, args),
        Command::Batch(args) => cmd_batch(&Env::open(&config_path)?, format, args),
        Command::Read(args) => cmd_read(&Env::open(&config_path)?, format, args),
        Command::Delete(args) => cmd_delete(&Env::open(&config_path)?, args),
        Command::Status(_) => cmd_status(&Env::open(&config_path)?, format),
    }
}

/// Everything a command needs once the configuration is valid.
struct Env {
    db: Arc<SqliteDatabase>,
    service: IngestService,
}

impl Env {
    fn open(config_path: &Path) -> anyhow::Result<Self> {
        let config = load_config(config_path)?;
        let db = Arc::new(
            SqliteDatabase::open(&config.database)
                .with_context(|| format!("opening {}", config.database.display()))?,
        );
        let service = IngestService::from_config(&config, db.clone(), Arc::new(SqliteClassifier))
            .context("refusing to start with an invalid configuration")?;
        Ok(Self { db, service })
    }
}

fn load_config(path: &Path) -> anyhow::Result<StrataConfig> {
    StrataConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_init(config_path: &Path, args: InitArgs) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    if let Some(parent) = config.database.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let db = SqliteDatabase::open(&config.database)?;
    let owner = db.ensure_owner(&args.owner)?;

    println!("{} Initialized database {}", "✓".green().bold(), config.database.display().to_string().bold());
    println!("  Owner: {} ({})", args.owner.yellow(), owner);
    for root in create_roots(&config)? {
        println!("  Root: {}", root.display().to_string().cyan());
    }
    // Opening the stores validates every kind section.
    IngestService::from_config(&config, Arc::new(db), Arc::new(SqliteClassifier))?;
    Ok(())
}

fn cmd_allocate(env: &Env, format: OutputFormat, args: AllocateArgs) -> anyhow::Result<()> {
    let allocation = env.service.allocate(args.kind)?;
    let path = allocation.file_path("");
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "kind": args.kind,
            "directory": allocation.directory,
            "file_name": allocation.sequential_name,
        }));
    }
    println!("{} {}", args.kind.to_string().bold(), path.display());
    Ok(())
}

fn parse_id(id: Option<String>) -> anyhow::Result<ContentId> {
    Ok(match id {
        Some(id) => ContentId::parse(id)?,
        None => ContentId::generate(),
    })
}

/// Build a record and its blob from a file on disk. Row-only kinds read the
/// file as a JSON payload instead.
fn load_item(
    kind: ContentKind,
    id: ContentId,
    owner: OwnerId,
    file: Option<&Path>,
    name: Option<String>,
    payload: Option<Value>,
) -> anyhow::Result<BatchItem> {
    let mut record = ContentRecord::new(id, kind, owner);
    let name = name.or_else(|| {
        file.and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
    });
    if let Some(name) = name {
        record = record.with_name(name);
    }

    let bytes = match file {
        Some(path) => {
            Some(fs::read(path).with_context(|| format!("reading {}", path.display()))?)
        }
        None => None,
    };

    if kind.stores_blobs() {
        let Some(bytes) = bytes else {
            bail!("{kind} record {} needs a file", record.id);
        };
        if let Some(payload) = payload {
            record = record.with_payload(payload);
        }
        return Ok(BatchItem::with_blob(record, bytes));
    }

    let payload = match (payload, bytes) {
        (Some(payload), _) => payload,
        (None, Some(bytes)) => serde_json::from_slice(&bytes).context("parsing JSON payload")?,
        (None, None) => bail!("{kind} record {} needs a payload", record.id),
    };
    Ok(BatchItem::row(record.with_payload(payload)))
}

fn print_outcome(outcome: &IngestOutcome) {
    match outcome {
        IngestOutcome::Committed { id } => println!("{} committed {}", "✓".green().bold(), id.as_str().yellow()),
        IngestOutcome::Duplicate { id } => println!("{} duplicate {}", "=".cyan().bold(), id.as_str().yellow()),
        IngestOutcome::Fatal { id, error } => println!("{} failed {}: {}", "✗".red().bold(), id.as_str().yellow(), error),
    }
}

fn cmd_ingest(env: &Env, format: OutputFormat, args: IngestArgs) -> anyhow::Result<()> {
    let owner = env.db.ensure_owner(&args.owner)?;
    let item = load_item(
        args.kind,
        parse_id(args.id)?,
        owner,
        Some(&args.file),
        args.name,
        None,
    )?;
    let outcome = env.service.ingest_one(item.record, item.blob.as_deref())?;

    if format == OutputFormat::Json {
        print_json(&outcome)?;
    } else {
        print_outcome(&outcome);
    }
    if outcome.is_fatal() {
        bail!("ingest failed");
    }
    Ok(())
}

#[derive(Deserialize)]
struct ManifestEntry {
    id: Option<String>,
    kind: ContentKind,
    file: Option<PathBuf>,
    name: Option<String>,
    payload: Option<Value>,
}

fn cmd_batch(env: &Env, format: OutputFormat, args: BatchArgs) -> anyhow::Result<()> {
    let text = fs::read_to_string(&args.manifest)
        .with_context(|| format!("reading {}", args.manifest.display()))?;
    let entries: Vec<ManifestEntry> =
        serde_json::from_str(&text).context("parsing batch manifest")?;
    let base = args.manifest.parent().unwrap_or_else(|| Path::new("."));
    let owner = env.db.ensure_owner(&args.owner)?;

    let items = entries
        .into_iter()
        .map(|entry| {
            let file = entry.file.map(|f| base.join(f));
            load_item(
                entry.kind,
                parse_id(entry.id)?,
                owner,
                file.as_deref(),
                entry.name,
                entry.payload,
            )
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let outcomes = env.service.ingest_batch(items)?;

    if format == OutputFormat::Json {
        return print_json(&outcomes);
    }
    for outcome in &outcomes {
        print_outcome(outcome);
    }
    let duplicates = outcomes.iter().filter(|o| o.is_duplicate()).count();
    println!(
        "\n{} {} committed, {} duplicate",
        "Batch:".bold(),
        (outcomes.len() - duplicates).to_string().green(),
        duplicates.to_string().cyan()
    );
    Ok(())
}

fn cmd_read(env: &Env, format: OutputFormat, args: ReadArgs) -> anyhow::Result<()> {
    let id = ContentId::parse(args.id)?;
    let Some((record, blob)) = env.service.read(&id)? else {
        bail!("no record {id}");
    };

    if let (Some(output), Some(blob)) = (&args.output, &blob) {
        fs::write(output, blob).with_context(|| format!("writing {}", output.display()))?;
    }

    if format == OutputFormat::Json {
        return print_json(&record);
    }
    println!("Record {} ({})", record.id.as_str().yellow().bold(), record.kind.to_string().cyan());
    println!("  Owner:   {}", record.owner);
    println!("  Created: {}", record.created_at.to_rfc3339());
    println!("  Size:    {} bytes", record.size_bytes);
    if let Some(name) = &record.name {
        println!("  Name:    {name}");
    }
    if let Some(locator) = &record.locator {
        println!("  File:    {}", locator.to_string().blue());
    }
    if let Some(payload) = &record.payload {
        println!("  Payload: {payload}");
    }
    if let Some(output) = &args.output {
        match blob {
            Some(_) => println!("{} Blob written to {}", "✓".green(), output.display()),
            None => println!("{} Record has no blob", "!".yellow()),
        }
    }
    Ok(())
}

fn cmd_delete(env: &Env, args: DeleteArgs) -> anyhow::Result<()> {
    let id = ContentId::parse(args.id)?;
    if env.service.delete(&id)? {
        println!("{} Deleted {}", "✓".green().bold(), id.as_str().yellow());
    } else {
        println!("No record {}", id.as_str().yellow());
    }
    Ok(())
}

fn cmd_status(env: &Env, format: OutputFormat) -> anyhow::Result<()> {
    let status = env.service.status()?;
    if format == OutputFormat::Json {
        return print_json(&status);
    }
    for kind in &status {
        let naming = kind
            .naming
            .map_or_else(|| "row-only".to_string(), |n| n.to_string());
        println!("{:<9} {:>8} records  {}", kind.kind.to_string().bold(), kind.records, naming.dimmed());
        if let Some(root) = &kind.root {
            let leaf = kind
                .current_leaf
                .as_ref()
                .map_or_else(|| "(not yet scanned)".to_string(), |l| l.display().to_string());
            println!("          root {}  leaf {}", root.display().to_string().cyan(), leaf);
        }
    }
    Ok(())
}
