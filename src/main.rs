//! promptd - prompt specification pipeline
//!
//! CLI entry point: one-shot discover/validate/generate/render commands and the
//! long-running watch mode.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use eyre::{Context, Result};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use promptd::artifact::{ArtifactGenerator, InMemoryRegistrar, generation_issue};
use promptd::audit::{AuditEvent, AuditEventType, AuditSink, record_result, sink_from_config};
use promptd::cli::{Cli, Command, OutputFormat, params_to_map};
use promptd::config::Config;
use promptd::error::{FailureCategory, IndexError};
use promptd::index::{DiscoveryResult, ReprocessOutcome, SpecIndex, discover_files};
use promptd::report::{CommandReport, Status};
use promptd::spec::{DocumentScope, SpecLoader};
use promptd::template::resource_limit;
use promptd::validation::{IssueKind, Layer, Location, Validated, ValidationIssue, Validator, load_failure};
use promptd::watcher::ChangeWatcher;

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("promptd")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to the log file; stdout carries command reports
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("promptd.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(roots = ?config.discovery.expanded_paths(), "promptd loaded config");

    let started = Instant::now();
    let report = match cli.command {
        Command::Discover { paths } => cmd_discover(&config, paths),
        Command::Validate { path } => cmd_validate(&config, &path),
        Command::Generate { path } => cmd_generate(&config, &path),
        Command::List => cmd_list(&config),
        Command::Render { id, params } => cmd_render(&config, &id, params_to_map(params)),
        Command::Watch => cmd_watch(&config, cli.format).await?,
    };
    let report = report.finish(started.elapsed());

    println!("{}", report.render(cli.format));
    let code = report.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn build_index(config: &Config) -> SpecIndex {
    SpecIndex::new(config, sink_from_config(&config.audit), Arc::new(InMemoryRegistrar::new()))
}

fn discovery_report(command: &str, result: &DiscoveryResult) -> CommandReport {
    let mut report = CommandReport::new(command);
    for failure in result.failed.values() {
        report.absorb(failure);
    }
    report.warnings.extend(result.diagnostics.iter().cloned());
    report
}

fn cmd_discover(config: &Config, paths: Vec<PathBuf>) -> CommandReport {
    let index = build_index(config);
    let result = if paths.is_empty() { index.rescan() } else { index.scan(&paths) };
    let failed: Vec<String> = result.failed.keys().map(|p| p.display().to_string()).collect();
    discovery_report("discover", &result).with_data(json!({
        "loaded": result.loaded,
        "failed": failed,
    }))
}

fn cmd_list(config: &Config) -> CommandReport {
    let index = build_index(config);
    let result = index.rescan();
    let snapshot = index.snapshot();
    let mut rows = Vec::new();
    for id in index.ids() {
        if let Some(entry) = snapshot.get(&id) {
            let state = match (entry.is_serving(), entry.result.passed()) {
                (true, true) => "ok",
                (true, false) => "stale",
                (false, _) => "invalid",
            };
            rows.push(format!("{id} [{state}] {}", entry.path.display()));
        }
    }
    let mut report = discovery_report("list", &result);
    // Listing succeeds even when some specifications are broken
    report.status = Status::Ok;
    report.category = None;
    report.with_data(json!({ "specifications": rows }))
}

/// Documents a single-file command can resolve `extends` against
fn build_scope(config: &Config, loader: &SpecLoader, path: &Path) -> DocumentScope {
    let mut roots = config.discovery.expanded_paths();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        roots.push(parent.to_path_buf());
    }
    let mut scope = DocumentScope::new();
    for file in discover_files(&roots, &config.discovery) {
        if file.path == path {
            continue;
        }
        match loader.load(&file.path) {
            Ok(doc) => scope.insert(Arc::new(doc)),
            Err(e) => warn!(path = ?file.path, error = %e, "Skipping unloadable specification in scope"),
        }
    }
    scope
}

fn validate_path(config: &Config, audit: &dyn AuditSink, path: &Path, report: &mut CommandReport) -> Option<Validated> {
    let loader = SpecLoader::new(config.validation.include_depth);
    let doc = match loader.load(path) {
        Ok(doc) => doc,
        Err(e) => {
            let result = load_failure(&e);
            record_result(audit, &result);
            report.absorb(&result);
            return None;
        }
    };
    let scope = build_scope(config, &loader, path);
    let (result, validated) = Validator::from_config(config).validate(&doc, &scope);
    record_result(audit, &result);
    report.absorb(&result);
    report.data = json!({
        "id": result.id,
        "path": path,
        "layers": result.layers,
    });
    validated
}

fn cmd_validate(config: &Config, path: &Path) -> CommandReport {
    let mut report = CommandReport::new("validate");
    let audit = sink_from_config(&config.audit);
    validate_path(config, audit.as_ref(), path, &mut report);
    report
}

fn cmd_generate(config: &Config, path: &Path) -> CommandReport {
    let mut report = CommandReport::new("generate");
    let audit = sink_from_config(&config.audit);
    let Some(validated) = validate_path(config, audit.as_ref(), path, &mut report) else {
        return report;
    };
    let id = validated.spec.id.clone();
    let generator = ArtifactGenerator::new(config.cache.expanded_dir(), config.limits.render_limits());
    match generator.generate(&validated) {
        Ok(artifact) => {
            audit.record(AuditEvent::new(
                AuditEventType::ArtifactGenerated,
                id.as_str(),
                "ok",
                json!({ "content_hash": artifact.content_hash, "path": path }),
            ));
            report.data = json!({
                "id": artifact.id,
                "content_hash": artifact.content_hash,
                "artifact": generator.artifact_path(&artifact.id),
                "generated_at": artifact.generated_at.to_rfc3339(),
            });
        }
        Err(e) => {
            audit.record(AuditEvent::new(
                AuditEventType::GenerationFailed,
                id.as_str(),
                "failed",
                json!({ "error": e.to_string() }),
            ));
            let issue = generation_issue(&e);
            report.fail(issue.category());
            report.errors.push(issue);
        }
    }
    report
}

fn cmd_render(config: &Config, id: &str, values: serde_json::Map<String, serde_json::Value>) -> CommandReport {
    let index = build_index(config);
    index.rescan();
    let mut report = CommandReport::new("render");
    match index.render(id, values) {
        Ok(output) => report.with_data(json!(output)),
        Err(e) => {
            let (layer, kind, category) = classify_index_error(&e);
            report.errors.push(ValidationIssue::error(layer, kind, e.to_string(), Location::default()));
            report.fail(category);
            if let Some(result) = index.latest_result(id) {
                report.warnings.extend(result.errors);
            }
            report
        }
    }
}

fn classify_index_error(e: &IndexError) -> (Layer, IssueKind, FailureCategory) {
    match e {
        IndexError::NotFound(_) => (Layer::Parse, IssueKind::NotFound, FailureCategory::Other),
        IndexError::NoArtifact(_) => (Layer::Generation, IssueKind::GenerationError, FailureCategory::Validation),
        IndexError::Context(_) => (Layer::Semantic, IssueKind::SemanticError, FailureCategory::Validation),
        IndexError::Render(err) if resource_limit(err).is_some() => (
            Layer::Security,
            IssueKind::ResourceLimitExceeded,
            FailureCategory::Security,
        ),
        IndexError::Render(_) => (Layer::Generation, IssueKind::GenerationError, FailureCategory::Generation),
    }
}

async fn cmd_watch(config: &Config, format: OutputFormat) -> Result<CommandReport> {
    let index = Arc::new(build_index(config));
    let initial = index.rescan();
    println!("{}", discovery_report("discover", &initial).render(format));

    let (reports_tx, mut reports_rx) = mpsc::channel(64);
    let mut watcher = ChangeWatcher::new(index.clone(), &config.watcher).with_reports(reports_tx);
    watcher.watch_roots(&index.roots()).context("Failed to start watcher")?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watcher.run(shutdown_rx).await {
            tracing::error!(error = %e, "ChangeWatcher error");
        }
    });
    info!("Watching. Press Ctrl+C to stop.");

    let mut cycles = 0usize;
    loop {
        tokio::select! {
            Some(event) = reports_rx.recv() => {
                let mut report = CommandReport::new("reload");
                match &event.outcome {
                    ReprocessOutcome::Updated { result, .. } | ReprocessOutcome::Failed { result, .. } => report.absorb(result),
                    ReprocessOutcome::Unchanged { .. } | ReprocessOutcome::Stale { .. } | ReprocessOutcome::Ignored { .. } => continue,
                    _ => {}
                }
                cycles += 1;
                report.data = json!({ "path": event.path, "id": event.outcome.id() });
                println!("{}", report.render(format));
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupt received");
                let _ = shutdown_tx.send(()).await;
                break;
            }
        }
    }
    watcher_handle.await.context("Watcher task panicked")?;

    Ok(CommandReport::new("watch").with_data(json!({ "cycles": cycles, "indexed": index.len() })))
}
