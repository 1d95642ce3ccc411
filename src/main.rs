use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use docrank::{
    cli::{Cli, Command, IndexArgs, SearchArgs},
    config::FusionConfig,
    data_dir::DataDir,
    embedding::Provenance,
    error::{self, Error},
    index::{IndexHandle, IndexSnapshot},
    ingestion,
    search::{self, SearchEngine, SearchRequest},
};

const LOG_ENV_VAR: &str = "DOCRANK_LOG";

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var(LOG_ENV_VAR) {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;

    match cli.command {
        Command::Index(args) => cmd_index(&data_dir, &args).await?,
        Command::Search(args) => cmd_search(&data_dir, args).await?,
        Command::Status(args) => cmd_status(&data_dir, args.json)?,
    }

    Ok(())
}

async fn cmd_index(data_dir: &DataDir, args: &IndexArgs) -> error::Result<()> {
    if !args.dir.is_dir() {
        return Err(Error::Config(format!(
            "not a directory: {}",
            args.dir.display()
        )));
    }

    let (documents, unreadable) =
        ingestion::load_corpus(&args.dir, &args.package)?;
    let (_, mut report) =
        ingestion::build_index(documents, None, data_dir).await?;
    report.documents += unreadable;
    report.skipped += unreadable;

    if args.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!(
            "Indexed {} document(s) into {} chunk(s) ({} skipped)",
            report.documents - report.skipped,
            report.chunks,
            report.skipped
        );
    }
    Ok(())
}

async fn cmd_search(data_dir: &DataDir, args: SearchArgs) -> error::Result<()> {
    let handle = IndexHandle::not_loaded();
    handle.load(data_dir)?;

    let engine =
        SearchEngine::new(Arc::new(handle)).with_fusion(FusionConfig::from_env()?);

    let response = engine
        .hybrid_search(SearchRequest {
            query: args.query,
            mode: args.mode,
            packages: args.packages,
            limit: args.count,
        })
        .await?;

    if args.json {
        println!("{}", search::format_json(&response)?);
    } else {
        print!("{}", search::format_human(&response));
    }
    Ok(())
}

#[derive(Serialize)]
struct Status {
    data_dir: String,
    indexed: bool,
    chunks: usize,
    packages: Vec<String>,
    vectors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    provenance: Option<Provenance>,
}

fn cmd_status(data_dir: &DataDir, json: bool) -> error::Result<()> {
    let mut status = Status {
        data_dir: data_dir.root().display().to_string(),
        indexed: false,
        chunks: 0,
        packages: Vec::new(),
        vectors: 0,
        provenance: None,
    };

    if data_dir.lexical_artifact().exists() {
        let snapshot = IndexSnapshot::load(data_dir)?;
        status.indexed = true;
        status.chunks = snapshot.lexical().len();
        let mut packages: Vec<String> = snapshot
            .lexical()
            .chunks()
            .iter()
            .map(|c| c.package.clone())
            .collect();
        packages.sort();
        packages.dedup();
        status.packages = packages;
        if let Some(vector) = snapshot.vector() {
            status.vectors = vector.len();
            status.provenance = vector.metadata().cloned();
        }
    }

    if json {
        println!("{}", serde_json::to_string(&status)?);
        return Ok(());
    }

    println!("Data directory: {}", status.data_dir);
    if !status.indexed {
        println!("No index built yet. Run `docrank index <DIR> --package <NAME>`.");
        return Ok(());
    }
    println!("Chunks: {}", status.chunks);
    println!("Packages: {}", status.packages.join(", "));
    match &status.provenance {
        Some(provenance) => {
            println!("Vectors: {} ({provenance})", status.vectors)
        }
        None if status.vectors > 0 => println!("Vectors: {}", status.vectors),
        None => println!("Vectors: none (fulltext only)"),
    }
    Ok(())
}
