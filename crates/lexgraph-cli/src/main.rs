//! lexgraph CLI - Command-line interface
//!
//! Usage:
//!   lexgraph labels
//!   lexgraph tag <file>
//!   lexgraph build <file> [--out graph.json] [--dot graph.dot]
//!   lexgraph inspect <graph.json>
//!   lexgraph chat [--document <file>]

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use lexgraph_assistant::{ChatConfig, DocumentChat};
use lexgraph_core::{AppConfig, LexError, LoggingConfig};
use lexgraph_extractor::{
    create_tagger, draw_relation_graph, load_graph, save_graph, summarize, tag_document,
    GraphBuildSession, IncrementalGraphBuilder, RelationEngine, TaggedDocument,
};
use lexgraph_llm::create_backend;

#[derive(Parser)]
#[command(name = "lexgraph")]
#[command(about = "Legal entity tagging and relation graph extraction")]
#[command(version)]
struct Cli {
    /// TOML config file; environment variables override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the labels the entity tagger can produce
    Labels,
    /// Print a document with its entities tagged
    Tag {
        /// Plain text document
        file: PathBuf,
    },
    /// Build the relation graph for a document
    Build {
        /// Plain text document
        file: PathBuf,
        /// Where to write the graph JSON (rewritten after every step)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Also write a DOT drawing of the final graph
        #[arg(long)]
        dot: Option<PathBuf>,
        /// Continue from a previously stored graph
        #[arg(long)]
        resume: Option<PathBuf>,
    },
    /// Summarise a stored graph and print it as DOT
    Inspect {
        /// Graph JSON file
        graph: PathBuf,
    },
    /// Chat about a document
    Chat {
        /// Plain text document to discuss
        #[arg(long)]
        document: Option<PathBuf>,
        /// Show graphs as DOT instead of JSON
        #[arg(long)]
        dot: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Labels => {
            let tagger = create_tagger(&config.tagger);
            for label in tagger.labels().await? {
                println!("{label}");
            }
        }
        Commands::Tag { file } => {
            let document = tag_file(&config, &file).await?;
            println!("{}", document.tagged);
        }
        Commands::Build {
            file,
            out,
            dot,
            resume,
        } => build(&config, &file, out, dot, resume).await?,
        Commands::Inspect { graph } => {
            let records = load_graph(&graph)
                .with_context(|| format!("Failed to load graph {}", graph.display()))?;
            let summary = summarize(&records);
            println!("// {} entities, {} relations", summary.node_count, summary.edge_count);
            if let Some((hub, degree)) = &summary.hub {
                println!("// most connected: {hub} ({degree})");
            }
            for (relation, count) in &summary.relation_counts {
                println!("// {relation}: {count}");
            }
            print!("{}", draw_relation_graph(&records));
        }
        Commands::Chat { document, dot } => chat(&config, document, dot).await?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_logging(config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.json_format {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn tag_file(config: &AppConfig, file: &Path) -> anyhow::Result<TaggedDocument> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let tagger = create_tagger(&config.tagger);
    Ok(tag_document(tagger.as_ref(), &text, &config.tagger.labels).await?)
}

fn create_builder(config: &AppConfig) -> anyhow::Result<IncrementalGraphBuilder> {
    let backend = create_backend(&config.llm)?;
    let engine = RelationEngine::new(backend, config.llm.chat_template)
        .with_options(config.generation.clone().with_seed(config.builder.seed))
        .with_streaming(config.builder.stream);
    Ok(IncrementalGraphBuilder::new(engine, &config.builder))
}

/// `<stem>-relations-<timestamp>.json` next to the input
fn default_output(file: &Path) -> PathBuf {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    file.with_file_name(format!("{stem}-relations-{stamp}.json"))
}

fn log_raw_output(err: LexError) -> LexError {
    if let Some(raw) = err.raw_output() {
        tracing::error!(raw, "Model output could not be parsed");
    }
    err
}

async fn build(
    config: &AppConfig,
    file: &Path,
    out: Option<PathBuf>,
    dot: Option<PathBuf>,
    resume: Option<PathBuf>,
) -> anyhow::Result<()> {
    let document = tag_file(config, file).await?;
    let builder = create_builder(config)?;
    let out = out.unwrap_or_else(|| default_output(file));

    let mut session = GraphBuildSession::new(document.tagged);
    if let Some(resume) = resume {
        session = session.with_graph(load_graph(&resume)?);
    }
    tracing::info!(session = %session.id(), out = %out.display(), "Building relation graph");

    while !session.is_finished() {
        let outcome = builder.step(&mut session).await.map_err(log_raw_output)?;
        save_graph(&out, &outcome.relation_records)?;
        tracing::info!(
            state = ?outcome.state,
            relations = outcome.relation_records.len(),
            progressed = outcome.progressed,
            "Step complete"
        );
    }

    if let Some(dot) = dot {
        std::fs::write(&dot, draw_relation_graph(session.graph()))
            .with_context(|| format!("Failed to write {}", dot.display()))?;
    }
    println!("{}", session.graph_json()?);
    Ok(())
}

async fn chat(config: &AppConfig, document: Option<PathBuf>, dot: bool) -> anyhow::Result<()> {
    let backend = create_backend(&config.llm)?;
    let chat_config = ChatConfig {
        interactive: !dot,
        stream: config.llm.stream_chat,
        options: config.generation.clone(),
    };
    let mut chat = DocumentChat::new(backend, create_builder(config)?, chat_config);

    if let Some(path) = document {
        chat.attach_document(&tag_file(config, &path).await?);
    }

    for message in chat.visible_transcript() {
        println!("{}", message.content);
    }

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                chat.reset();
                if let Some(greeting) = chat.visible_transcript().first() {
                    println!("{}", greeting.content);
                }
            }
            text => match chat.send(text).await {
                Ok(reply) => println!("{reply}"),
                Err(e) => {
                    let e = log_raw_output(e);
                    eprintln!("error: {e}");
                }
            },
        }
    }

    Ok(())
}
