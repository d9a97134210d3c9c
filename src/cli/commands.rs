//! Subcommand handlers.

use super::init::{self, InitConfig, InitResult};
use super::output::Output;
use super::{Cli, Commands};
use crate::api::create_app;
use crate::rag::query::QueryOptions;
use crate::types::{EnqueueRequest, EnqueueResponse, IngestReport};
use crate::utils::toml_config::{ConfigError, OpenRagConfig};
use crate::AppState;
use anyhow::{bail, Context};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{error, info};

/// Dispatch a parsed command line.
pub async fn run(cli: Cli, output: &Output) -> anyhow::Result<()> {
    match cli.command {
        Commands::Init {
            path,
            force,
            vectorizer,
            llm,
            host,
            port,
        } => {
            let config = InitConfig {
                path,
                force,
                vectorizer,
                llm,
                host,
                port,
            };
            match init::run(config, output) {
                InitResult::Success | InitResult::AlreadyExists => Ok(()),
                InitResult::Error(e) => bail!("init failed: {}", e),
            }
        }
        Commands::Config { full, validate } => show_config(&cli.config, full, validate, output),
        command => {
            let config = load_config(&cli.config, output)?;
            let state = AppState::from_config(config).await?;
            run_with_state(command, state, output).await
        }
    }
}

fn load_config(path: &Path, output: &Output) -> anyhow::Result<OpenRagConfig> {
    match OpenRagConfig::load(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::FileNotFound(p)) => {
            output.error(&format!("Configuration file not found: {}", p.display()));
            output.hint("Run `openrag init` to create one");
            bail!("missing configuration")
        }
        Err(e) => Err(e).with_context(|| format!("loading {}", path.display())),
    }
}

async fn run_with_state(command: Commands, state: AppState, output: &Output) -> anyhow::Result<()> {
    let pipeline = &state.pipeline;

    match command {
        Commands::Upload { paths } => upload(&state, paths, output).await,
        Commands::Extract { file } => {
            let pages = pipeline.extract(&file).await?;
            output.success(&format!("Extracted {} pages from {}", pages.len(), file));
            Ok(())
        }
        Commands::Chunk { file } => {
            let chunks = pipeline.chunk(&file).await?;
            output.success(&format!("Split {} into {} chunks", file, chunks.len()));
            Ok(())
        }
        Commands::Vectorize { file } => {
            let vectors = pipeline.vectorize(&file).await?;
            output.success(&format!(
                "Vectorized {} chunks of {} ({} dimensions)",
                vectors.vectors.len(),
                file,
                vectors.dimensions
            ));
            Ok(())
        }
        Commands::Store { file } => {
            match pipeline.store(&file).await? {
                Some(range) => output.success(&format!(
                    "Stored {} vectors of {} as ids {}..={}",
                    range.len(),
                    file,
                    range.start,
                    range.end
                )),
                None => output.warning(&format!("{} has no vectors to store", file)),
            }
            Ok(())
        }
        Commands::Ingest {
            files,
            all,
            recreate,
        } => {
            let files = resolve_files(&state, files, all).await?;
            ingest(&state, &files, recreate, output).await
        }
        Commands::Enqueue { files, server } => enqueue_remote(&server, &files, output).await,
        Commands::Worker { files, all } => {
            let files = resolve_files(&state, files, all).await?;
            for file in &files {
                pipeline.enqueue(&state.queue, file)?;
            }
            output.info(&format!("Queued {} files", files.len()));

            let outcome = pipeline
                .drain(&state.queue, state.config.queue.poll_interval())
                .await;
            output.kv("stages run", &outcome.succeeded.to_string());
            output.kv("failed attempts", &outcome.failed.to_string());
            if outcome.poisoned > 0 {
                output.warning(&format!("{} jobs dropped as poison", outcome.poisoned));
            }
            Ok(())
        }
        Commands::Query {
            question,
            top_k,
            max_neighbors,
            no_generate,
            json,
        } => {
            let defaults = state.default_query_options();
            let options = QueryOptions {
                top_k: top_k.unwrap_or(defaults.top_k),
                max_neighbors: max_neighbors.unwrap_or(defaults.max_neighbors),
                generate: defaults.generate && !no_generate,
            };
            let result = state.query_engine.answer(&question, options).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            output.header("Passages");
            for (i, chunk) in result.chunks.iter().enumerate() {
                let source = format!(
                    "{} #{} (page {}, id {})",
                    chunk.file, chunk.chunk_number, chunk.page, chunk.id
                );
                output.passage(i + 1, &source, &chunk.text);
            }
            if let Some(answer) = result.answer {
                output.header("Answer");
                println!("\n{}\n", answer);
            } else if !state.query_engine.has_llm() {
                output.hint("No LLM configured; set [llm] provider to get an answer");
            }
            Ok(())
        }
        Commands::Documents => {
            let index = pipeline.artifacts().get_chunk_index().await?;
            if index.is_empty() {
                output.info("No documents indexed yet");
                return Ok(());
            }
            output.table_header(&["File", "First id", "Last id", "Chunks"]);
            for (file, range) in index.entries() {
                output.table_row(&[
                    file,
                    &range.start.to_string(),
                    &range.end.to_string(),
                    &range.len().to_string(),
                ]);
            }
            Ok(())
        }
        Commands::Serve { host, port } => serve(state, host, port, output).await,
        Commands::Init { .. } | Commands::Config { .. } => Ok(()),
    }
}

async fn resolve_files(state: &AppState, files: Vec<String>, all: bool) -> anyhow::Result<Vec<String>> {
    if all {
        let files = state.pipeline.artifacts().list_raw_pdfs().await?;
        if files.is_empty() {
            bail!("raw-pdfs is empty");
        }
        return Ok(files);
    }
    if files.is_empty() {
        bail!("name at least one file, or pass --all");
    }
    Ok(files)
}

async fn upload(state: &AppState, paths: Vec<PathBuf>, output: &Output) -> anyhow::Result<()> {
    for path in paths {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .with_context(|| format!("no usable file name in {}", path.display()))?
            .to_string();
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        state.pipeline.artifacts().put_raw_pdf(&stem, bytes).await?;
        output.created("pdf", &format!("raw-pdfs/{}.pdf", stem));
    }
    Ok(())
}

async fn ingest(
    state: &AppState,
    files: &[String],
    recreate: bool,
    output: &Output,
) -> anyhow::Result<()> {
    let total = files.len() as u32;
    let mut failures = 0;

    for (i, file) in files.iter().enumerate() {
        output.step(i as u32 + 1, total, file);
        // Only the first file may drop the collection
        let recreate = recreate && i == 0;
        match state.pipeline.ingest(file, recreate).await {
            Ok(report) => print_report(&report, output),
            Err(e) => {
                failures += 1;
                output.error(&format!("{}: {}", file, e));
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} files failed", failures, total);
    }
    output.complete(&format!("Ingested {} files", total));
    Ok(())
}

fn print_report(report: &IngestReport, output: &Output) {
    output.kv("pages", &report.pages.to_string());
    output.kv("chunks", &report.chunks.to_string());
    if let Some((start, end)) = report.id_range {
        output.kv("ids", &format!("{}..={}", start, end));
    }
    output.kv("duration", &format!("{} ms", report.duration_ms));
}

async fn enqueue_remote(server: &str, files: &[String], output: &Output) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let url = format!("{}/api/jobs", server.trim_end_matches('/'));

    for file in files {
        let response = client
            .post(&url)
            .json(&EnqueueRequest {
                file_name: file.clone(),
            })
            .send()
            .await
            .with_context(|| format!("contacting {}", url))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("server rejected {}: {} {}", file, status, body);
        }
        let queued: EnqueueResponse = response.json().await?;
        output.success(&format!(
            "Queued {} on {} (message {})",
            file, queued.queue, queued.message_id
        ));
    }
    Ok(())
}

async fn serve(
    state: AppState,
    host: Option<String>,
    port: Option<u16>,
    output: &Output,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);
    let addr = format!("{}:{}", host, port);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let worker_state = state.clone();
    let worker = tokio::spawn(async move {
        let poll = worker_state.config.queue.poll_interval();
        worker_state
            .pipeline
            .run_worker(&worker_state.queue, poll, async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            })
            .await;
    });

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    output.banner();
    output.success(&format!("Listening on http://{}/api", addr));
    info!(%addr, "Server started");

    let app = create_app(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    let _ = shutdown_tx.send(true);
    worker.await?;
    info!("Server stopped");
    Ok(())
}

fn show_config(path: &Path, full: bool, validate: bool, output: &Output) -> anyhow::Result<()> {
    let config = match OpenRagConfig::load_unvalidated(path) {
        Ok(config) => config,
        Err(ConfigError::FileNotFound(p)) => {
            output.error(&format!("Configuration file not found: {}", p.display()));
            output.hint("Run `openrag init` to create one");
            bail!("missing configuration")
        }
        Err(e) => return Err(e.into()),
    };

    output.header("Configuration");
    output.kv("file", &path.display().to_string());

    if full {
        println!("\n{}", toml::to_string_pretty(&config)?);
    } else {
        output.kv("server", &format!("{}:{}", config.server.host, config.server.port));
        output.kv("storage", &format!("{:?}", config.storage.backend).to_lowercase());
        output.kv("vectorizer", &config.vectorizer.kind);
        output.kv("dimensions", &config.vectorizer.dimensions.to_string());
        output.kv(
            "vector store",
            &format!("{} ({})", config.vector_store.provider, config.vector_store.collection),
        );
        output.kv("llm", &format!("{} {}", config.llm.provider, config.llm.model));
    }

    if validate {
        match config.validate() {
            Ok(()) => output.success("Configuration is valid"),
            Err(e) => {
                output.error(&e.to_string());
                bail!("invalid configuration");
            }
        }
    }
    Ok(())
}
