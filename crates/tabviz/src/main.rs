mod cli;
mod config;
mod logging;
mod oracle;
mod orchestrator;
mod render;

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::Value as JsonValue;
use tabviz_cache::{CacheStore, KvStore, MemoryKv, SqliteKv};
use tabviz_core::{
    column_summary, get_categorical_columns, is_valid_pie_chart_column, normalize_rows,
    parse_oracle_payload, prepare_pie_chart_data, Dataset, DatasetAnalyzer, DatasetMetadata,
    Schema, SourceFile,
};
use tabviz_llm::LlmClient;

use crate::cli::{CacheCommand, Cli, Command, ViewArgs};
use crate::config::{CacheLocation, ProviderChoice, TabvizConfig};
use crate::oracle::{ExtractionOracle, LlmOracle, LocalOracle};
use crate::orchestrator::{Delivery, Orchestrator, Progress};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose || logging::env_flag();
    logging::init(verbose);
    let mode = match &cli.command {
        Command::Process { mode, .. } => *mode,
        _ => None,
    };
    let config = TabvizConfig::from_env()?.with_overrides(cli.provider, cli.model, mode, cli.cache);
    tracing::debug!(
        provider = config.provider.as_str(),
        model = %config.model,
        mode = config.mode.as_str(),
        "configuration loaded"
    );
    match cli.command {
        Command::Process { file, view, .. } => process(&config, &file, &view).await,
        Command::Analyze {
            file,
            canonical,
            view,
        } => analyze(&file, canonical, &view),
        Command::Cache { action } => cache(&config, action),
    }
}

fn open_cache(config: &TabvizConfig) -> CacheStore<Box<dyn KvStore>> {
    let kv: Box<dyn KvStore> = match &config.cache {
        CacheLocation::Memory => Box::new(MemoryKv::new()),
        CacheLocation::Sqlite(path) => match SqliteKv::open(path) {
            Ok(kv) => Box::new(kv),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "cache unavailable; continuing with an in-memory cache"
                );
                Box::new(MemoryKv::new())
            }
        },
    };
    CacheStore::open(kv).with_ttl(config.cache_ttl)
}

fn build_oracle(config: &TabvizConfig) -> Result<Box<dyn ExtractionOracle>> {
    Ok(match config.provider {
        ProviderChoice::Local => Box::new(LocalOracle),
        ProviderChoice::Remote(provider) => {
            let client = LlmClient::new(provider, config.model.clone())
                .with_context(|| format!("failed to configure {} client", provider.as_str()))?;
            Box::new(LlmOracle::new(client))
        }
    })
}

async fn process(config: &TabvizConfig, path: &Path, view: &ViewArgs) -> Result<()> {
    let file = SourceFile::from_path(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let oracle = build_oracle(config)?;
    tracing::info!(oracle = oracle.name(), file = %file.name, "processing upload");
    let orchestrator = Orchestrator::new(oracle, open_cache(config)).with_mode(config.mode);
    orchestrator.cleanup_cache();

    let outcome = orchestrator
        .process_file_with(&file, |event| match event {
            Progress::State(state) => tracing::info!(%state, "pipeline"),
            Progress::Provisional(delivery) => eprintln!(
                "showing {} cached rows from a file with the same name while re-extracting",
                delivery.dataset.len()
            ),
        })
        .await;
    let delivery = outcome.map_err(|err| anyhow!(err.user_message()))?;
    orchestrator.close();
    present(&delivery, view)
}

fn analyze(path: &Path, canonical: bool, view: &ViewArgs) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let dataset = load_dataset(&text, canonical).map_err(|err| anyhow!(err.user_message()))?;
    let metadata = dataset.analyze(&DatasetAnalyzer::default());
    present(&Delivery { dataset, metadata }, view)
}

fn load_dataset(text: &str, canonical: bool) -> tabviz_core::Result<Dataset> {
    if canonical {
        let raw: JsonValue = serde_json::from_str(text)?;
        Ok(Dataset::Canonical(normalize_rows(&raw, Schema::household())?))
    } else {
        Ok(Dataset::Generic(parse_oracle_payload(text)?))
    }
}

fn present(delivery: &Delivery, view: &ViewArgs) -> Result<()> {
    if view.json {
        println!("{}", serde_json::to_string_pretty(delivery)?);
        return Ok(());
    }
    let rows = delivery.dataset.generic_rows();
    let meta = &delivery.metadata;
    print!("{}", render::render_metadata(meta));
    let columns: Vec<String> = meta.columns.iter().map(|c| c.name.clone()).collect();
    print!("{}", render::render_rows(&rows, &columns, view.rows));

    let Some(column) = chart_column(&rows, meta, view) else {
        return Ok(());
    };
    if meta.column(&column).is_none() {
        return Err(anyhow!("unknown column {column}"));
    }
    let summary = column_summary(&rows, &column);
    if let Some((value, count)) = &summary.most_common {
        println!(
            "{}: {} distinct, {} empty, most common {value} ({count})\n",
            column, summary.unique, summary.null_count
        );
    }
    let slices = prepare_pie_chart_data(&rows, &column, view.agg, view.value.as_deref());
    print!("{}", render::render_slices(&column, &slices));
    Ok(())
}

fn chart_column(
    rows: &[tabviz_core::GenericRecord],
    meta: &DatasetMetadata,
    view: &ViewArgs,
) -> Option<String> {
    if let Some(column) = &view.column {
        return Some(column.clone());
    }
    get_categorical_columns(meta)
        .into_iter()
        .find(|column| !column.is_numerical && is_valid_pie_chart_column(rows, &column.name))
        .map(|column| column.name.clone())
}

fn cache(config: &TabvizConfig, action: CacheCommand) -> Result<()> {
    let store = open_cache(config);
    match action {
        CacheCommand::Info => {
            let info = store.info();
            println!(
                "{} entries, {} bytes",
                info.total_entries, info.total_size
            );
            for file in &info.files {
                println!(
                    "  {}  {} records  cached {}",
                    file.name,
                    file.records,
                    file.captured_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
        CacheCommand::Cleanup => {
            let removed = store.expire_and_cleanup();
            println!("removed {removed} expired or unreadable entries");
        }
        CacheCommand::Clear => {
            let removed = store.clear_all();
            println!("removed {removed} entries");
        }
    }
    store.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabviz_core::PipelineError;

    #[test]
    fn canonical_analysis_requires_an_array() {
        let err = load_dataset(r#"{"rows": 3}"#, true).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(ref shape) if shape == "object"));
        let dataset = load_dataset(r#"[{"Family Size": "4"}]"#, true).unwrap();
        assert!(dataset.is_canonical());
    }

    #[test]
    fn generic_analysis_uses_payload_rules() {
        let dataset = load_dataset("```json\n[{\"city\": \"Kochi\"}]\n```", false).unwrap();
        assert_eq!(dataset.len(), 1);
        assert!(load_dataset("not json", false).unwrap_err().is_format_error());
    }
}
