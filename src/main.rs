use std::{io::Write, sync::Arc};

use clap::Parser;
use docchat::{
    Assistant,
    DataDir,
    KnowledgeStore,
    ResponseFrame,
    Settings,
    cli::{AskArgs, Cli, Command, IngestArgs, StatusArgs},
    config,
    error::{self, Error},
    extract::{self, DocumentKind},
    llm::{Timed, openai::OpenAiClient},
    server,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCCHAT_LOG") {
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

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let settings = cli.settings();
    settings.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(run(cli.command, settings))
}

async fn run(command: Command, settings: Settings) -> error::Result<()> {
    match command {
        Command::Serve(args) => {
            let addr = config::parse_bind(&args.bind)?;
            let assistant = build_assistant(&settings)?;
            server::serve(Arc::new(assistant), addr).await
        }
        Command::Ingest(args) => cmd_ingest(&settings, &args).await,
        Command::Ask(args) => cmd_ask(&settings, &args).await,
        Command::Status(args) => cmd_status(&settings, &args),
        Command::Completions(_) => Ok(()),
    }
}

fn open_store(
    settings: &Settings,
) -> error::Result<(DataDir, KnowledgeStore)> {
    let data_dir = DataDir::resolve(settings.data_dir.as_deref())?;
    let store =
        KnowledgeStore::open(&data_dir, settings.embedding_dimensions)?;
    Ok((data_dir, store))
}

/// Open the store and wire it to the upstream client, with every upstream
/// call bounded by the configured timeout.
fn build_assistant(settings: &Settings) -> error::Result<Assistant> {
    let (_, store) = open_store(settings)?;
    let client = Arc::new(Timed::new(
        OpenAiClient::new(settings.openai()?)?,
        settings.upstream_timeout,
    ));
    Assistant::new(
        Arc::new(store),
        client.clone(),
        client,
        settings.assistant,
    )
}

async fn cmd_ingest(
    settings: &Settings,
    args: &IngestArgs,
) -> error::Result<()> {
    let assistant = build_assistant(settings)?;

    let bytes = std::fs::read(&args.file)?;
    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());
    let source = args
        .source
        .clone()
        .or_else(|| file_name.clone())
        .unwrap_or_else(|| args.file.display().to_string());

    let kind = DocumentKind::detect(file_name.as_deref(), None, &bytes);
    let text =
        extract::extract_text_blocking(source.clone(), kind, bytes).await?;
    let report = assistant.ingest(&source, &text).await?;

    println!("Ingested {} chunks from {source}", report.chunks_added);
    Ok(())
}

async fn cmd_ask(settings: &Settings, args: &AskArgs) -> error::Result<()> {
    let assistant = build_assistant(settings)?;

    let cancel = CancellationToken::new();
    let mut frames = assistant
        .ask(&args.question, &[], cancel.clone())
        .await?;

    let mut stdout = std::io::stdout().lock();
    let mut sources = Vec::new();
    loop {
        let frame = tokio::select! {
            frame = frames.recv() => frame,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                break;
            }
        };
        let Some(frame) = frame else { break };

        if args.json {
            write!(stdout, "{}", frame.to_ndjson()?)?;
            continue;
        }
        match frame {
            ResponseFrame::Meta {
                sources: found, ..
            } => sources = found,
            ResponseFrame::Token { content } => {
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
        }
    }

    if !args.json {
        writeln!(stdout)?;
        if !sources.is_empty() {
            writeln!(stdout, "\nSources:")?;
            for (i, source) in sources.iter().enumerate() {
                writeln!(stdout, "  [{}] {}", i + 1, preview(source, 80))?;
            }
        }
    }
    Ok(())
}

fn cmd_status(settings: &Settings, args: &StatusArgs) -> error::Result<()> {
    let (data_dir, store) = open_store(settings)?;
    let stats = store.stats()?;

    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "data_dir": data_dir.root().display().to_string(),
                "total_chunks": stats.total_chunks,
                "lexical_index_ready": stats.lexical_index_ready,
            })
        );
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Chunks: {}", stats.total_chunks);
        println!(
            "Lexical index: {}",
            if stats.lexical_index_ready {
                "ready"
            } else {
                "empty"
            }
        );
    }
    Ok(())
}

/// First `max` characters of `text` on one line.
fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{cut}...")
    }
}
