use anyhow::{Context, Result, bail};
use brochure_rag::answer::{AnswerPipeline, RetrievalSettings, build_chat_model};
use brochure_rag::api::{self, RagService};
use brochure_rag::config::Config;
use brochure_rag::embedding::build_embedding_client;
use brochure_rag::ingest::{
    IngestService, OllamaSummarizer, Registry, UnstructuredPartitioner, discover_documents,
};
use brochure_rag::logging;
use brochure_rag::metrics::PipelineMetrics;
use brochure_rag::retrieval::{ContextAssembler, ReferenceResolver};
use brochure_rag::store::{QdrantBackend, VectorStoreClient};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "brochure-rag",
    about = "Question answering over PDF brochures backed by Qdrant"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve,
    /// Ingest a PDF, or every PDF under a directory.
    Ingest {
        path: PathBuf,
        /// Target collection (defaults to DEFAULT_COLLECTION).
        #[arg(long)]
        collection: Option<String>,
        /// Re-ingest files the registry already knows.
        #[arg(long)]
        force: bool,
    },
    /// Ask a question and stream the answer to stdout.
    Ask {
        question: String,
        #[arg(long)]
        collection: Option<String>,
    },
    /// List collections.
    Collections,
    /// Delete a collection pair.
    Drop { name: String },
}

struct Components {
    config: Config,
    store: Arc<VectorStoreClient>,
    metrics: Arc<PipelineMetrics>,
}

impl Components {
    fn build(config: Config) -> Result<Self> {
        let backend = QdrantBackend::new(&config.qdrant_url, config.qdrant_api_key.clone())
            .context("Failed to construct Qdrant client")?;
        let embedder =
            build_embedding_client(&config).context("Failed to construct embedding client")?;
        let store = Arc::new(VectorStoreClient::new(
            Arc::new(backend),
            embedder,
            config.embedding_dimension as u64,
            config.retry_policy(),
        ));
        Ok(Self {
            config,
            store,
            metrics: Arc::new(PipelineMetrics::new()),
        })
    }

    fn answer_pipeline(&self) -> Result<AnswerPipeline> {
        let resolver = ReferenceResolver::new(
            self.store.clone(),
            self.config.reference_lookup,
            self.metrics.clone(),
        );
        let assembler = ContextAssembler::new(self.store.clone(), resolver);
        let model = build_chat_model(&self.config).context("Failed to construct chat model")?;
        Ok(AnswerPipeline::new(
            assembler,
            model,
            RetrievalSettings::from_config(&self.config),
            self.metrics.clone(),
        ))
    }

    fn ingest_service(&self) -> Result<IngestService> {
        let partitioner = UnstructuredPartitioner::new(
            self.config.unstructured_url.clone(),
            self.config.unstructured_api_key.clone(),
            self.config.elements_cache_dir.clone(),
        )
        .context("Failed to construct partitioner")?;
        let summarizer = OllamaSummarizer::new(
            self.config.ollama_url.clone(),
            self.config.text_to_text_model.clone(),
            self.config.image_to_text_model.clone(),
        )
        .context("Failed to construct summarizer")?;
        let registry = Registry::open(&self.config.registry_path).with_context(|| {
            format!(
                "Failed to open registry at {}",
                self.config.registry_path.display()
            )
        })?;
        Ok(IngestService::new(
            Arc::new(partitioner),
            Arc::new(summarizer),
            self.store.clone(),
            Arc::new(registry),
            self.metrics.clone(),
        ))
    }

    fn collection(&self, requested: Option<String>) -> String {
        requested.unwrap_or_else(|| self.config.default_collection.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;
    logging::init_tracing();
    let components = Components::build(config)?;

    match cli.command {
        Command::Serve => serve(components).await,
        Command::Ingest {
            path,
            collection,
            force,
        } => ingest(&components, &path, components.collection(collection), force).await,
        Command::Ask {
            question,
            collection,
        } => ask(&components, &question, &components.collection(collection)).await,
        Command::Collections => {
            let mut names = components.store.list_collections().await?;
            names.sort();
            for name in names {
                println!("{name}");
            }
            Ok(())
        }
        Command::Drop { name } => {
            components.store.delete_collection_pair(&name).await?;
            println!("Deleted {name}");
            Ok(())
        }
    }
}

async fn serve(components: Components) -> Result<()> {
    let service = RagService::new(
        components.answer_pipeline()?,
        components.store.clone(),
        components.metrics.clone(),
        components.config.default_collection.clone(),
    );
    let app = api::create_router(Arc::new(service));

    let (listener, port) = bind_listener(components.config.server_port)
        .await
        .context("Failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("Server error")
}

async fn ingest(
    components: &Components,
    root: &std::path::Path,
    collection: String,
    force: bool,
) -> Result<()> {
    let documents = discover_documents(root);
    if documents.is_empty() {
        bail!("No PDF files found at {}", root.display());
    }
    let service = components.ingest_service()?;
    for document in documents {
        let outcome = service
            .ingest_file(&document, &collection, force)
            .await
            .with_context(|| format!("Failed to ingest {}", document.display()))?;
        if outcome.already_ingested {
            println!("{}: already ingested", document.display());
        } else {
            println!(
                "{}: {} inserted, {} duplicates, {} conflicts \
                 ({} texts, {} tables, {} images, {} skipped)",
                document.display(),
                outcome.inserted,
                outcome.duplicates,
                outcome.conflicts,
                outcome.texts,
                outcome.tables,
                outcome.images,
                outcome.skipped,
            );
        }
    }
    Ok(())
}

async fn ask(components: &Components, question: &str, collection: &str) -> Result<()> {
    let pipeline = components.answer_pipeline()?;
    let mut stream = pipeline.answer(question, &[], collection).await?;
    let mut stdout = tokio::io::stdout();
    while let Some(fragment) = stream.next().await {
        stdout.write_all(fragment?.as_bytes()).await?;
        stdout.flush().await?;
    }
    stdout.write_all(b"\n").await?;
    Ok(())
}

async fn bind_listener(port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
