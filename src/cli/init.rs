//! Init command implementation
//!
//! Scaffolds an OpenRAG project: `openrag.toml`, `.env.example`, and the
//! local blob containers under `data/`.

use super::output::Output;
use crate::storage::Container;
use std::fs;
use std::path::{Path, PathBuf};

/// Result of the init operation
pub enum InitResult {
    /// Initialization completed successfully
    Success,
    /// Project already exists (openrag.toml found)
    AlreadyExists,
    /// An error occurred during initialization
    Error(String),
}

/// Configuration for the init command
pub struct InitConfig {
    /// Directory to initialize
    pub path: PathBuf,
    /// Overwrite existing files
    pub force: bool,
    /// Vectorizer to configure (ada, tfidf or bert)
    pub vectorizer: String,
    /// LLM provider to configure (openai, ollama or none)
    pub llm: String,
    /// Host address for the server
    pub host: String,
    /// Port for the server
    pub port: u16,
}

/// Run the init command
pub fn run(config: InitConfig, output: &Output) -> InitResult {
    output.banner();
    output.header("Initializing OpenRAG Project");

    let base_path = &config.path;

    let config_path = base_path.join("openrag.toml");
    if config_path.exists() && !config.force {
        output.warning("openrag.toml already exists!");
        output.hint("Use --force to overwrite existing files");
        return InitResult::AlreadyExists;
    }

    output.subheader("Creating directories");

    let mut directories = vec![PathBuf::from("data"), PathBuf::from("data/vectors")];
    directories.extend(Container::ALL.iter().map(|c| Path::new("data").join(c.name())));

    for dir in &directories {
        let dir_path = base_path.join(dir);
        let display = dir.display().to_string();
        if dir_path.exists() {
            output.skipped(&display, "already exists");
            continue;
        }
        if let Err(e) = fs::create_dir_all(&dir_path) {
            output.error(&format!("Failed to create {}: {}", display, e));
            return InitResult::Error(e.to_string());
        }
        output.created_dir(&display);
    }

    output.subheader("Creating configuration files");

    let toml_content = generate_openrag_toml(&config);
    if let Err(e) = write_file(&config_path, &toml_content, config.force) {
        output.error(&format!("Failed to create openrag.toml: {}", e));
        return InitResult::Error(e.to_string());
    }
    output.created("config", "openrag.toml");

    let env_example_path = base_path.join(".env.example");
    if let Err(e) = write_file(&env_example_path, generate_env_example(), config.force) {
        output.error(&format!("Failed to create .env.example: {}", e));
        return InitResult::Error(e.to_string());
    }
    output.created("env", ".env.example");

    let gitignore_path = base_path.join(".gitignore");
    if !gitignore_path.exists() {
        if let Err(e) = write_file(&gitignore_path, generate_gitignore(), false) {
            output.warning(&format!("Failed to create .gitignore: {}", e));
        } else {
            output.created("file", ".gitignore");
        }
    }

    output.complete("OpenRAG project initialized successfully!");

    output.header("Next Steps");
    output.newline();
    output.info("1. Set up environment variables:");
    output.command("cp .env.example .env");
    output.newline();
    output.info("2. Add a PDF and ingest it:");
    output.command("cp report.pdf data/raw-pdfs/");
    output.command("openrag ingest report");
    output.newline();
    output.info("3. Ask a question or start the server:");
    output.command("openrag query \"What does the report conclude?\"");
    output.command("openrag serve");

    output.hint(&format!(
        "Server will be available at http://{}:{}/api",
        config.host, config.port
    ));

    InitResult::Success
}

fn write_file(path: &Path, content: &str, force: bool) -> std::io::Result<()> {
    if path.exists() && !force {
        return Ok(());
    }
    fs::write(path, content)
}

fn generate_openrag_toml(config: &InitConfig) -> String {
    let dimensions = match config.vectorizer.as_str() {
        "bert" => 384,
        "tfidf" => 1024,
        _ => 3072,
    };

    let llm_section = match config.llm.as_str() {
        "ollama" => {
            r#"[llm]
provider = "ollama"
base_url = "http://localhost:11434"
model = "llama3.2"
"#
        }
        "none" => {
            r#"[llm]
# Retrieval only; `query` prints passages without an answer
provider = "none"
"#
        }
        _ => {
            r#"[llm]
provider = "openai"
api_base = "https://api.openai.com/v1"
api_key_env = "OPENAI_API_KEY"
model = "gpt-4o-mini"
"#
        }
    };

    format!(
        r#"# OpenRAG Configuration
# =====================
# Secrets are read from the environment variables named here, never from
# this file. Every key is optional; omitted keys take the values shown.

[server]
host = "{host}"
port = {port}
log_level = "info"

[storage]
# local: blobs under `path`; azure: Blob Storage at `account_url`
backend = "local"
path = "./data"
# account_url = "https://myaccount.blob.core.windows.net"
sas_token_env = "AZURE_STORAGE_SAS_TOKEN"

[chunking]
min_tokens = 166
max_tokens = 256
overlap_tokens = 40
encoding = "cl100k_base"

[vectorizer]
# ada (OpenAI-compatible), tfidf, or bert (needs the local-embeddings feature)
kind = "{vectorizer}"
model = "text-embedding-3-large"
api_base = "https://api.openai.com/v1"
api_key_env = "OPENAI_API_KEY"
# Vectors are zero-padded to this size
dimensions = {dimensions}
local_model = "bge-small-en-v1.5"
cache_capacity = 1000

[vector_store]
# memory, local, or qdrant (needs the qdrant feature)
provider = "local"
path = "./data/vectors"
url = "http://localhost:6334"
collection = "openrag"
metric = "l2"

{llm_section}
[query]
top_k = 5
max_neighbors = 10
generate = true

[queue]
name = "openrag-jobs"
batch_size = 5
visibility_timeout_secs = 300
poll_interval_secs = 5
max_dequeue_count = 5
"#,
        host = config.host,
        port = config.port,
        vectorizer = config.vectorizer,
        dimensions = dimensions,
        llm_section = llm_section,
    )
}

fn generate_env_example() -> &'static str {
    r#"# OpenRAG Environment Variables
# =============================
# Copy this file to .env and fill in the values.

# Embeddings and chat completions (ada vectorizer, openai LLM provider)
OPENAI_API_KEY=sk-...

# Optional: Azure Blob Storage SAS token (storage.backend = "azure")
# AZURE_STORAGE_SAS_TOKEN=sv=...

# Optional: Logging level (trace, debug, info, warn, error)
RUST_LOG=info,openrag=debug
"#
}

fn generate_gitignore() -> &'static str {
    r#"# OpenRAG Generated Files
/data/

# Environment
.env
.env.local

# Rust
/target/
"#
}
