use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracewire_core::{
    config::TraceConfig,
    exporter::ConsoleExporter,
    init::{Telemetry, init},
    model::{ChatCompletionRequest, ChatMessage, EmbeddingInput, EmbeddingRequest},
    provider::{ChatCompletions, ChatOutput, Embeddings, NullClient},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "tracewire CLI smoke tool", long_about = None)]
struct Cli {
    /// Trace configuration file (JSON or TOML). Without one, spans print to stderr.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a traced chat completion request
    Chat {
        #[arg(long, default_value = "gpt-4o")]
        model: String,
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
    /// Stream a traced chat completion (prints deltas live)
    ChatStream {
        #[arg(long, default_value = "gpt-4o")]
        model: String,
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
    /// Send a traced embedding request
    Embed {
        #[arg(long, default_value = "text-embedding-3-small")]
        model: String,
        #[arg(short, long, help = "Input text")]
        input: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => TraceConfig::from_path(path)?,
        None => TraceConfig {
            write_to_remote: false,
            ..TraceConfig::default()
        },
    };
    let telemetry = if cfg.write_to_remote {
        init(cfg)?
    } else {
        Telemetry::with_exporter(&cfg, Arc::new(ConsoleExporter::with_writer(io::stderr())))?
    };

    // canned delegate; swap in a real OpenAI-compatible client to trace live traffic
    let client = telemetry.instrument_openai(NullClient::new(), env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Chat { model, message } => {
            let req = ChatCompletionRequest::new(model, vec![ChatMessage::user(message)]);
            if let ChatOutput::Completion(resp) = client.create(req).await? {
                for choice in resp.choices {
                    println!("{}", choice.message.content.unwrap_or_default());
                }
            }
        }
        Commands::ChatStream { model, message } => {
            let mut req = ChatCompletionRequest::new(model, vec![ChatMessage::user(message)]);
            req.stream = Some(true);
            if let ChatOutput::Stream(mut stream) = client.create(req).await? {
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(chunk) => {
                            if let Some(text) = chunk
                                .choices
                                .first()
                                .and_then(|c| c.delta.content.as_deref())
                            {
                                print!("{text}");
                                io::stdout().flush().ok();
                            }
                        }
                        Err(err) => {
                            eprintln!("[error: {err}]");
                            break;
                        }
                    }
                }
                println!();
            }
        }
        Commands::Embed { model, input } => {
            let req = EmbeddingRequest {
                model,
                input: EmbeddingInput::Single(input),
                encoding_format: None,
                dimensions: None,
                user: None,
            };
            let resp = client.create_embedding(req).await?;
            for e in &resp.data {
                println!("{} -> dim={}", e.index, e.embedding.len());
            }
        }
    }

    telemetry.shutdown().await?;
    Ok(())
}
