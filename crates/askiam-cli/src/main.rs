//! `askiam` - interactive access request session
//!
//! Reads one request per line from stdin and prints each decision. When
//! input ends (or on `:quit`) the trace session is closed and exported.

use anyhow::{Context, Result};
use askiam_core::prelude::*;
use askiam_core::providers::memory::{EntitySeed, InMemoryEntityStore, LexicalVectorStore};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const DEMO_SEED: &str = include_str!("../data/demo_seed.json");
const DEFAULT_LOG_FILTER: &str = "askiam=info";
const QUIT: &str = ":quit";

fn cli() -> Command {
    let cmd = Command::new("askiam")
        .version(askiam_core::VERSION)
        .about("Validate natural-language IAM access requests")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_parser(value_parser!(PathBuf))
                .help("Pipeline configuration (TOML)"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(value_parser!(PathBuf))
                .help("Entity seed (JSON); the bundled demo data is used if omitted"),
        )
        .arg(
            Arg::new("requester")
                .long("requester")
                .short('u')
                .env("ASKIAM_REQUESTER")
                .help("Authenticated user making the requests"),
        )
        .arg(
            Arg::new("trace-out")
                .long("trace-out")
                .value_parser(value_parser!(PathBuf))
                .help("Trace export path (JSON); defaults to askiam-trace-<session>.json"),
        )
        .arg(
            Arg::new("trace-text")
                .long("trace-text")
                .value_parser(value_parser!(PathBuf))
                .help("Also write a human-readable trace report"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        );

    #[cfg(feature = "ollama")]
    let cmd = cmd
        .arg(
            Arg::new("model")
                .long("model")
                .env("ASKIAM_MODEL")
                .help("Ollama model name; enables model extraction and the semantic path"),
        )
        .arg(
            Arg::new("ollama-url")
                .long("ollama-url")
                .env("OLLAMA_URL")
                .default_value(askiam_core::providers::ollama::DEFAULT_BASE_URL)
                .help("Ollama base URL"),
        );

    #[cfg(feature = "postgres")]
    let cmd = cmd.arg(
        Arg::new("database-url")
            .long("database-url")
            .env("DATABASE_URL")
            .help("PostgreSQL entity store; the seed is still used for retrieval"),
    );

    cmd
}

fn init_logging(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_seed(path: Option<&PathBuf>) -> Result<EntitySeed> {
    match path {
        Some(path) => EntitySeed::load(path)
            .with_context(|| format!("loading entity seed {}", path.display())),
        None => serde_json::from_str(DEMO_SEED).context("parsing bundled demo seed"),
    }
}

#[allow(unused_mut, unused_variables)]
async fn build_pipeline(
    matches: &ArgMatches,
    config: PipelineConfig,
    seed: &EntitySeed,
) -> Result<Orchestrator> {
    let schema = config.schema.clone();
    let mut store: Arc<dyn RelationalStore> =
        Arc::new(InMemoryEntityStore::from_seed(&schema, seed));

    #[cfg(feature = "postgres")]
    if let Some(url) = matches.get_one::<String>("database-url") {
        let pg = askiam_core::providers::postgres::PgStore::connect(url, 5)
            .await
            .context("connecting to the entity store")?;
        tracing::info!("using PostgreSQL entity store");
        store = Arc::new(pg);
    }

    let mut builder = Orchestrator::builder(config)
        .with_relational_store(store)
        .with_vector_store(Arc::new(LexicalVectorStore::from_seed(&schema, seed)));

    #[cfg(feature = "ollama")]
    if let Some(model) = matches.get_one::<String>("model") {
        let url = matches
            .get_one::<String>("ollama-url")
            .map_or(askiam_core::providers::ollama::DEFAULT_BASE_URL, String::as_str);
        tracing::info!(model = %model, url = %url, "using Ollama language model");
        builder = builder.with_model(Arc::new(askiam_core::providers::ollama::OllamaModel::new(
            url,
            model.as_str(),
        )));
    }

    Ok(builder.build()?)
}

/// Validate each input line until EOF or `:quit`; returns the number handled
async fn run_session<R, W>(
    orchestrator: &Orchestrator,
    session: &TraceSession,
    requester: Option<&str>,
    input: R,
    mut output: W,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let mut handled = 0;
    while let Some(line) = lines.next_line().await.context("reading request")? {
        let text = line.trim();
        if text == QUIT {
            break;
        }
        if text.is_empty() {
            continue;
        }
        let mut request = AccessRequest::new(text);
        if let Some(requester) = requester {
            request = request.with_requester(requester);
        }
        let decision = orchestrator.validate_request(request, session).await;
        writeln!(output, "{}: {}", decision.status, decision.reason)?;
        output.flush()?;
        handled += 1;
    }
    Ok(handled)
}

fn write_export(export: &TraceExport, json_path: &Path, text_path: Option<&PathBuf>) -> Result<()> {
    let file = File::create(json_path)
        .with_context(|| format!("creating trace export {}", json_path.display()))?;
    export.write_json(BufWriter::new(file))?;
    if let Some(path) = text_path {
        std::fs::write(path, export.render_text())
            .with_context(|| format!("writing trace report {}", path.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("log-json"));

    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let seed = load_seed(matches.get_one::<PathBuf>("seed"))?;
    let orchestrator = build_pipeline(&matches, config, &seed).await?;
    let requester = matches.get_one::<String>("requester").map(String::as_str);

    let session = TraceSession::open();
    tracing::info!(session_id = %session.session_id(), "session opened");
    let handled = run_session(
        &orchestrator,
        &session,
        requester,
        BufReader::new(tokio::io::stdin()),
        std::io::stdout().lock(),
    )
    .await?;

    let export = session.close()?;
    let json_path = matches.get_one::<PathBuf>("trace-out").cloned().unwrap_or_else(|| {
        PathBuf::from(format!("askiam-trace-{}.json", export.session_id))
    });
    write_export(&export, &json_path, matches.get_one::<PathBuf>("trace-text"))?;
    tracing::info!(
        requests = handled,
        steps = export.total_steps,
        path = %json_path.display(),
        "session closed; trace exported"
    );
    Ok(())
}
