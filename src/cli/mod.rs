pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "hive")]
#[command(about = "Hive gateway - JSON:API resources and document version history")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the gateway")]
    Serve(commands::serve::ServeArgs),

    #[command(about = "Print the route table synthesized from the schema")]
    Routes {
        #[arg(long, help = "Schema YAML (defaults to HIVE_SCHEMA_PATH or the built-in schema)")]
        schema: Option<String>,
    },

    #[command(about = "Mint an access token with the configured secret")]
    Token(commands::token::TokenArgs),

    #[command(about = "Check a running gateway's /health endpoint")]
    Ping {
        #[arg(help = "Base URL of the gateway", default_value = "http://localhost:3000")]
        url: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Serve(args) => commands::serve::handle(args).await,
        Commands::Routes { schema } => commands::routes::handle(schema, output_format),
        Commands::Token(args) => commands::token::handle(args, output_format),
        Commands::Ping { url } => commands::ping::handle(&url, output_format).await,
    }
}
