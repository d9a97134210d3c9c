//! CLI module for OpenRAG
//!
//! Provides command-line interface parsing and handling for the openrag binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod commands;
pub mod init;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// OpenRAG - PDF ingestion and retrieval augmented generation
#[derive(Parser, Debug)]
#[command(
    name = "openrag",
    version,
    about = "OpenRAG - PDF ingestion and retrieval augmented generation",
    long_about = "Extracts text from PDFs, chunks and vectorizes it, stores the vectors in a\n\
                  vector database, and answers questions with an LLM over the retrieved passages.",
    after_help = "EXAMPLES:\n    \
                  openrag init                          # Scaffold openrag.toml and data/\n    \
                  openrag upload report.pdf             # Copy a PDF into raw-pdfs\n    \
                  openrag ingest report                 # Extract, chunk, vectorize, store\n    \
                  openrag query \"What is overlap?\"      # Ask a question\n    \
                  openrag serve                         # Start the HTTP API"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "openrag.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new OpenRAG project
    ///
    /// Creates openrag.toml, .env.example and the data/ container layout.
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite existing files without prompting
        #[arg(short, long)]
        force: bool,

        /// Vectorizer to configure (ada, tfidf or bert)
        #[arg(long, default_value = "ada")]
        vectorizer: String,

        /// LLM provider to configure (openai, ollama or none)
        #[arg(long, default_value = "openai")]
        llm: String,

        /// Host address for the server
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port for the server
        #[arg(long, default_value = "3000")]
        port: u16,
    },

    /// Copy local PDF files into the raw-pdfs container
    Upload {
        /// PDF files to upload; the stem becomes the file name
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Extract page text from raw-pdfs/{file}.pdf
    Extract {
        /// File name without extension
        file: String,
    },

    /// Chunk the extracted text of a file
    Chunk {
        /// File name without extension
        file: String,
    },

    /// Vectorize the chunks of a file
    Vectorize {
        /// File name without extension
        file: String,
    },

    /// Store the vectors of a file in the vector store
    Store {
        /// File name without extension
        file: String,
    },

    /// Run every stage for one or more files
    Ingest {
        /// File names without extension
        files: Vec<String>,

        /// Ingest every PDF in raw-pdfs
        #[arg(long, conflicts_with = "files")]
        all: bool,

        /// Drop the collection and chunk index first
        #[arg(long)]
        recreate: bool,
    },

    /// Queue files on a running server's background worker
    Enqueue {
        /// File names without extension
        #[arg(required = true)]
        files: Vec<String>,

        /// Base URL of the running server
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        server: String,
    },

    /// Process files stage by stage through the work queue until it drains
    Worker {
        /// File names without extension
        files: Vec<String>,

        /// Queue every PDF in raw-pdfs
        #[arg(long, conflicts_with = "files")]
        all: bool,
    },

    /// Ask a question
    Query {
        /// The question
        question: String,

        /// Nearest neighbours to search for
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Cap on passages after neighbour expansion
        #[arg(short = 'n', long)]
        max_neighbors: Option<usize>,

        /// Only retrieve passages, skip the LLM
        #[arg(long)]
        no_generate: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List indexed documents and their id ranges
    Documents,

    /// Start the HTTP API and background worker
    Serve {
        /// Override server.host
        #[arg(long)]
        host: Option<String>,

        /// Override server.port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show configuration information
    Config {
        /// Show the full configuration
        #[arg(short = 'f', long)]
        full: bool,

        /// Validate the configuration file
        #[arg(long)]
        validate: bool,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query() {
        let cli = Cli::try_parse_from([
            "openrag",
            "--no-color",
            "query",
            "What is RAG?",
            "-k",
            "3",
            "--no-generate",
        ])
        .unwrap();
        assert!(cli.no_color);
        match cli.command {
            Commands::Query {
                question,
                top_k,
                no_generate,
                ..
            } => {
                assert_eq!(question, "What is RAG?");
                assert_eq!(top_k, Some(3));
                assert!(no_generate);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_ingest_all_conflicts_with_files() {
        assert!(Cli::try_parse_from(["openrag", "ingest", "report", "--all"]).is_err());
        assert!(Cli::try_parse_from(["openrag", "ingest", "--all", "--recreate"]).is_ok());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["openrag", "documents", "--config", "other.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("other.toml"));
    }
}
