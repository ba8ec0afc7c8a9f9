//! Walk a binary through the analysis server and print what it reports.
//!
//! ```text
//! binja-inspect <server-path> <binary-path> [--python <interpreter>]
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use libbinja::{BinjaClient, ClientBuilder};

const SHOWN_FUNCTIONS: usize = 10;

/// Walk a binary through the analysis server and print what it reports.
#[derive(Parser, Debug)]
#[command(name = "binja-inspect")]
struct Args {
    /// Path to the analysis server (script or executable)
    server: PathBuf,

    /// Binary to analyze
    binary: PathBuf,

    /// Interpreter that runs the server script
    #[arg(long)]
    python: Option<PathBuf>,
}

fn field<'a>(value: &'a Value, key: &str) -> &'a Value {
    value.get(key).unwrap_or(&Value::Null)
}

async fn inspect(client: &BinjaClient, binary: &Path) -> Result<()> {
    let info = client.get_binary_info(binary).await?;
    println!("=== Binary Information ===");
    for key in ["filename", "architecture", "platform", "entry_point", "file_size"] {
        println!("{key}: {}", field(&info, key));
    }

    println!("\n=== Sections ===");
    let sections = client.list_sections(binary).await?;
    for section in sections.as_array().into_iter().flatten() {
        println!(
            "{}: {} - {} ({} bytes)",
            field(section, "name"),
            field(section, "start"),
            field(section, "end"),
            field(section, "size"),
        );
    }

    println!("\n=== Functions ===");
    let functions = client.list_functions(binary).await?;
    let functions: Vec<&str> = functions
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .collect();
    for (i, name) in functions.iter().take(SHOWN_FUNCTIONS).enumerate() {
        println!("{}. {name}", i + 1);
    }
    if functions.len() > SHOWN_FUNCTIONS {
        println!("... and {} more functions", functions.len() - SHOWN_FUNCTIONS);
    }

    let Some(first) = functions.first() else {
        return Ok(());
    };

    // Both requests share the connection and run concurrently.
    let (disassembly, decompiled) = tokio::join!(
        client.disassemble_function(binary, first),
        client.decompile_function(binary, first),
    );

    println!("\n=== Disassembly of '{first}' ===");
    for (i, line) in disassembly?.as_array().into_iter().flatten().enumerate() {
        println!("{:3}. {}", i + 1, line.as_str().unwrap_or_default());
    }

    println!("\n=== Decompiled '{first}' ===");
    match decompiled {
        Ok(code) => println!(
            "{}",
            field(&code, "decompiled_code").as_str().unwrap_or_default()
        ),
        Err(e) => println!("Error: {e}"),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "libbinja=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let binary = std::fs::canonicalize(&args.binary)
        .with_context(|| format!("binary not found: {}", args.binary.display()))?;

    let mut builder = ClientBuilder::from_env()?;
    if let Some(python) = args.python {
        builder = builder.interpreter(python);
    }
    let client = builder.build()?;

    client
        .start(&args.server)
        .await
        .with_context(|| format!("failed to start {}", args.server.display()))?;
    tracing::info!("connected to analysis server");

    let result = inspect(&client, &binary).await;
    client.stop().await;
    result
}
