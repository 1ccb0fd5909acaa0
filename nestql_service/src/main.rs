use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod config;
mod console;
mod http;
mod logging;

use config::ServiceConfig;

/// Resolve chained SQL templates into nested JSON or XML documents.
#[derive(Parser, Debug)]
#[command(name = "nestql", version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "NESTQL_CONFIG", default_value = "nestql.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve `POST /json` and `POST /xml`
    Serve,
    /// Resolve one request and print the document
    Query {
        /// Request JSON, or `@file` to read it from a file
        request: String,
        #[arg(short, long, default_value = "application/json")]
        mode: String,
        /// Write the document here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Store a `contentData` document in the EAV tables
    Ingest {
        /// Document file; stdin when neither this nor `--request` is given
        #[arg(short, long)]
        document: Option<PathBuf>,
        /// Request JSON (or `@file`) to POST to the content service
        #[arg(short, long, conflicts_with = "document")]
        request: Option<String>,
        /// Content service URL; defaults to `eav.service_url`
        #[arg(short, long, requires = "request")]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServiceConfig::from_file(&cli.config)?;
    logging::init(&config.logging)?;

    match cli.command {
        Command::Serve => http::serve(&config).await,
        Command::Query {
            request,
            mode,
            output,
        } => console::query(&config, &request, &mode, output.as_deref()).await,
        Command::Ingest {
            document,
            request,
            url,
        } => {
            let source =
                console::DocumentSource::select(&config, document, url, request.as_deref())?;
            console::ingest(&config, source).await
        }
    }
}
