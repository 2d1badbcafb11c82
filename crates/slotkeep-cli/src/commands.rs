use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;
use slotkeep_codec::json::{snapshot_from_json, snapshot_to_json};
use slotkeep_container::MigrationChain;
use slotkeep_engine::{
    ConflictMode, EngineBuilder, EngineConfig, PersistenceEngine, SaveDataInfo, SaveOptions,
    SaveOutcome, SaveSchema, SlotName,
};
use slotkeep_store::local::DATA_EXT;
use slotkeep_store::DirectoryBlobClient;
use slotkeep_types::DeviceId;

use crate::cli::*;

/// Device id file kept in the local root when the config names none.
const DEVICE_FILE: &str = ".slotkeep-device";

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let schema = SaveSchema::new(MigrationChain::new(cli.schema_version));
    let format = cli.format;

    if let Command::Inspect(args) = &cli.command {
        return cmd_inspect(&config, args, format);
    }

    let engine = open_engine(config, schema).await?;
    let result = match cli.command {
        Command::Save(args) => cmd_save(&engine, args, format).await,
        Command::Load(args) => cmd_load(&engine, args, format).await,
        Command::List(args) => cmd_list(&engine, args, format),
        Command::Delete(args) => cmd_delete(&engine, args, format).await,
        Command::Sync(args) => cmd_sync(&engine, args, format).await,
        Command::Purge(args) => cmd_purge(&engine, args, format).await,
        Command::Inspect(_) => Ok(()),
    };
    engine.shutdown(None).await;
    result
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if config.device_id.is_none() {
        config.device_id = Some(stored_device(&config.local_root)?.as_str().to_string());
    }
    Ok(config)
}

/// Device id persisted under `root`, generated on first use.
fn stored_device(root: &Path) -> anyhow::Result<DeviceId> {
    let path = root.join(DEVICE_FILE);
    if let Ok(raw) = std::fs::read_to_string(&path) {
        return DeviceId::new(raw.trim()).with_context(|| format!("corrupt device file {}", path.display()));
    }
    let device = DeviceId::generate();
    std::fs::create_dir_all(root).with_context(|| format!("cannot create {}", root.display()))?;
    std::fs::write(&path, device.as_str()).with_context(|| format!("cannot write {}", path.display()))?;
    Ok(device)
}

async fn open_engine(config: EngineConfig, schema: SaveSchema) -> anyhow::Result<PersistenceEngine> {
    let cloud_root = config.cloud_root.clone();
    let mut builder = EngineBuilder::new(config, schema)?.open_local().await?;
    if let Some(root) = cloud_root {
        builder = builder.attach_cloud_client(Arc::new(DirectoryBlobClient::new(root)));
    }
    Ok(builder.build().await?)
}

fn slot(name: &str) -> anyhow::Result<SlotName> {
    Ok(SlotName::new(name)?)
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_save(engine: &PersistenceEngine, args: SaveArgs, format: OutputFormat) -> anyhow::Result<()> {
    let name = slot(&args.slot)?;
    let raw = match &args.input {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            raw
        }
    };
    let json: serde_json::Value = serde_json::from_str(&raw).context("snapshot is not valid JSON")?;
    let snapshot = snapshot_from_json(&json)?;

    let mut options = SaveOptions::new(args.location);
    if let Some(description) = args.description {
        options = options.with_description(description);
    }
    let outcome = engine
        .save_with(name.clone(), options, move || snapshot)
        .wait()
        .await
        .into_result(|| slotkeep_engine::EngineError::Cancelled)?;

    match (&outcome, format) {
        (_, OutputFormat::Json) => print_json(&json!({
            "complete": outcome.is_complete(),
            "info": outcome.info(),
        }))?,
        (SaveOutcome::Complete(info), OutputFormat::Text) => {
            println!("{} Saved {} ({}, {} bytes)", "✓".green().bold(), name.as_str().yellow(), info.location, info.size);
        }
        (SaveOutcome::PartialSuccess { local, cloud }, OutputFormat::Text) => {
            println!("{} Saved {} on one location only", "!".yellow().bold(), name.as_str().yellow());
            for (label, result) in [("local", local), ("cloud", cloud)] {
                match result {
                    Ok(_) => println!("  {label}: {}", "ok".green()),
                    Err(err) => println!("  {label}: {}", err.to_string().red()),
                }
            }
        }
    }
    Ok(())
}

async fn cmd_load(engine: &PersistenceEngine, args: LoadArgs, format: OutputFormat) -> anyhow::Result<()> {
    let name = slot(&args.slot)?;
    let loaded = engine
        .load_async(name.clone(), args.location)
        .wait()
        .await
        .into_result(|| slotkeep_engine::EngineError::Cancelled)?;
    let snapshot = snapshot_to_json(&loaded.snapshot);
    match format {
        OutputFormat::Json => print_json(&json!({
            "slot": name,
            "stored_version": loaded.stored_version,
            "migrations_applied": loaded.migrations_applied,
            "corrections": loaded.corrections.len(),
            "snapshot": snapshot,
        })),
        OutputFormat::Text => {
            if loaded.was_migrated() {
                eprintln!(
                    "{} migrated {} from v{} ({} steps)",
                    "note:".cyan(),
                    name.as_str().yellow(),
                    loaded.stored_version,
                    loaded.migrations_applied.len()
                );
            }
            for correction in &loaded.corrections {
                eprintln!("{} {}: {}", "corrected:".yellow(), correction.path, correction.description);
            }
            print_json(&snapshot)
        }
    }
}

fn cmd_list(engine: &PersistenceEngine, args: ListArgs, format: OutputFormat) -> anyhow::Result<()> {
    let entries = engine.list(args.location);
    if format == OutputFormat::Json {
        return print_json(&serde_json::to_value(&entries)?);
    }
    if entries.is_empty() {
        println!("No slots.");
        return Ok(());
    }
    for info in &entries {
        print_entry(info);
    }
    Ok(())
}

fn print_entry(info: &SaveDataInfo) {
    let name = if info.slot.is_archive() {
        info.slot.as_str().dimmed()
    } else {
        info.slot.as_str().bold()
    };
    let state = match info.sync_state {
        slotkeep_types::SyncState::Synced => info.sync_state.to_string().green(),
        slotkeep_types::SyncState::Conflicted => info.sync_state.to_string().red().bold(),
        slotkeep_types::SyncState::Diverged => info.sync_state.to_string().yellow(),
        _ => info.sync_state.to_string().normal(),
    };
    let origin = info.origin.as_ref().map_or("-", |d| d.short_id());
    println!(
        "{name:<32} {:<6} {state:<12} {:>10}  {}  {}",
        info.location.to_string(),
        info.size,
        info.modified.to_rfc3339().dimmed(),
        origin.cyan()
    );
}

async fn cmd_delete(engine: &PersistenceEngine, args: DeleteArgs, format: OutputFormat) -> anyhow::Result<()> {
    let name = slot(&args.slot)?;
    engine
        .delete_async(name.clone(), args.location)
        .wait()
        .await
        .into_result(|| slotkeep_engine::EngineError::Cancelled)?;
    match format {
        OutputFormat::Json => print_json(&json!({ "deleted": name, "location": args.location })),
        OutputFormat::Text => {
            println!("{} Deleted {} ({})", "✓".green().bold(), name.as_str().yellow(), args.location);
            Ok(())
        }
    }
}

fn container_path(config: &EngineConfig, target: &str) -> PathBuf {
    let path = PathBuf::from(target);
    if path.is_file() {
        path
    } else {
        config.local_root.join(format!("{target}.{DATA_EXT}"))
    }
}

fn cmd_inspect(config: &EngineConfig, args: &InspectArgs, format: OutputFormat) -> anyhow::Result<()> {
    let path = container_path(config, &args.target);
    let bytes = std::fs::read(&path).with_context(|| format!("cannot read {}", path.display()))?;
    let header = SaveSchema::inspect(&bytes)?;
    match format {
        OutputFormat::Json => print_json(&json!({
            "path": path,
            "schema_version": header.schema_version,
            "checksum": header.checksum.to_hex(),
            "payload_len": header.payload_len,
            "container_len": header.container_len(),
        })),
        OutputFormat::Text => {
            println!("{}", path.display().to_string().bold());
            println!("  Schema version: {}", header.schema_version.to_string().cyan());
            println!("  Checksum:       {}", header.checksum.to_hex().yellow());
            println!("  Payload:        {} bytes", header.payload_len);
            if header.container_len() != bytes.len() as u64 {
                println!("  {} file holds {} bytes", "warning:".red().bold(), bytes.len());
            }
            Ok(())
        }
    }
}

async fn cmd_sync(engine: &PersistenceEngine, args: SyncArgs, format: OutputFormat) -> anyhow::Result<()> {
    let name = slot(&args.slot)?;
    if !engine.has_cloud() {
        bail!("sync needs cloud_root in the configuration");
    }
    let mode = match args.keep {
        Some(resolution) => ConflictMode::Decide(resolution),
        None => ConflictMode::Surface,
    };
    let result = engine
        .sync_async(name.clone(), mode)
        .wait()
        .await
        .into_result(|| slotkeep_engine::EngineError::Cancelled);

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            let Some(record) = err.conflict() else {
                return Err(err.into());
            };
            if format == OutputFormat::Json {
                print_json(&serde_json::to_value(record)?)?;
            } else {
                println!("{} Conflict on {}: {}", "✗".red().bold(), name.as_str().yellow(), record.reason);
                for version in &record.versions {
                    println!(
                        "  {:<6} {}  {}",
                        if version.is_local() { "local" } else { "remote" },
                        version.timestamp.to_rfc3339(),
                        version.origin.as_str().cyan()
                    );
                }
                println!("Rerun with --keep keep-local|keep-remote|keep-both");
            }
            bail!("conflict on {name} needs a decision");
        }
    };

    match format {
        OutputFormat::Json => print_json(&serde_json::to_value(&report.plan)?),
        OutputFormat::Text => {
            if report.is_noop() {
                println!("{} {} already in sync", "✓".green().bold(), name.as_str().yellow());
                return Ok(());
            }
            println!("{} Synced {}", "✓".green().bold(), name.as_str().yellow());
            if let Some(reason) = &report.reason {
                println!("  {}", reason.dimmed());
            }
            for archive in report.plan.archives() {
                println!("  archived as {}", archive.as_str().cyan());
            }
            Ok(())
        }
    }
}

async fn cmd_purge(engine: &PersistenceEngine, args: PurgeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let base = args.slot.as_deref().map(slot).transpose()?;
    let purged = engine.purge_archives(base.as_ref()).await?;
    match format {
        OutputFormat::Json => print_json(&json!({ "purged": purged })),
        OutputFormat::Text => {
            for name in &purged {
                println!("  {} {}", "purged:".red(), name);
            }
            println!("{} {} archives removed", "✓".green(), purged.len());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_is_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let first = stored_device(dir.path()).unwrap();
        let second = stored_device(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn inspect_target_falls_back_to_slot_file() {
        let config = EngineConfig {
            local_root: PathBuf::from("/srv/saves"),
            ..EngineConfig::default()
        };
        assert_eq!(
            container_path(&config, "Profile1"),
            PathBuf::from("/srv/saves/Profile1.sav")
        );
    }

    #[tokio::test]
    async fn save_then_list_through_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            local_root: dir.path().join("saves"),
            cloud_root: Some(dir.path().join("cloud")),
            ..EngineConfig::default()
        };
        let config_path = dir.path().join("slotkeep.toml");
        std::fs::write(&config_path, config.to_toml_string().unwrap()).unwrap();
        let input = dir.path().join("snapshot.json");
        std::fs::write(&input, r#"{"health": 80, "name": "Aria"}"#).unwrap();

        let config = load_config(Some(config_path.as_path())).unwrap();
        assert!(config.device_id.is_some());
        let engine = open_engine(config.clone(), SaveSchema::new(MigrationChain::new(1)))
            .await
            .unwrap();
        cmd_save(
            &engine,
            SaveArgs {
                slot: "Profile1".into(),
                input: Some(input),
                description: Some("checkpoint".into()),
                location: slotkeep_engine::Location::Both,
            },
            OutputFormat::Json,
        )
        .await
        .unwrap();

        let entries = engine.list(None);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].location, slotkeep_engine::Location::Both);
        cmd_inspect(&config, &InspectArgs { target: "Profile1".into() }, OutputFormat::Text).unwrap();
        engine.shutdown(None).await;
    }
}
