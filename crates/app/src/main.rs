use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use course_index_core::{
    build_context, content_hash, discover_course_files, CourseContext, DeleteSelector,
    ExtractionDispatcher, HttpVectorStore, IndexStoreManager, IngestionPipeline,
    JsonFileMaterialStore, MaterialStore, OpenAiEmbedder, Retriever, SlideConverterConfig,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "course-index", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vector store base URL
    #[arg(long, default_value = "http://localhost:6333")]
    store_url: String,

    /// Vector collection name
    #[arg(long, default_value = "course_materials")]
    collection: String,

    /// Embedding provider base URL
    #[arg(long, default_value = "https://api.openai.com/v1")]
    embedding_url: String,

    /// Embedding provider API key; needed by `ingest` and `query` only.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Embedding model name
    #[arg(long, default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Embedding vector dimensions
    #[arg(long, default_value = "1536")]
    embedding_dimensions: usize,

    /// Directory holding material bookkeeping records
    #[arg(long, default_value = ".course-index")]
    state_dir: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a file or a directory of course materials.
    Ingest {
        /// File or directory to ingest recursively.
        #[arg(long)]
        path: PathBuf,
        /// Course this material belongs to.
        #[arg(long)]
        course_id: String,
        /// Human-readable course name.
        #[arg(long)]
        course_name: Option<String>,
        /// Module association, if any.
        #[arg(long)]
        module_id: Option<String>,
        /// Topic association, if any.
        #[arg(long)]
        topic_id: Option<String>,
    },
    /// Retrieve ranked fragments for a question.
    Query {
        /// Question text.
        #[arg(long)]
        query: String,
        /// Number of fragments to return.
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Restrict retrieval to one course.
        #[arg(long)]
        course_id: Option<String>,
    },
    /// Show the processing status of one material.
    Status {
        #[arg(long)]
        material_id: String,
    },
    /// Delete a material's chunks and its bookkeeping record.
    Delete {
        #[arg(long)]
        material_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let manager = IndexStoreManager::new(HttpVectorStore::new(&cli.store_url));
    let materials = JsonFileMaterialStore::new(&cli.state_dir);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "course-index boot"
    );

    match cli.command {
        Command::Ingest {
            path,
            course_id,
            course_name,
            module_id,
            topic_id,
        } => {
            let retriever = Retriever::new(
                manager,
                embedder_for(
                    cli.embedding_api_key.clone(),
                    &cli.embedding_url,
                    &cli.embedding_model,
                    cli.embedding_dimensions,
                )?,
                &cli.collection,
            );
            let pipeline = IngestionPipeline::new(retriever, materials)
                .with_extractor(ExtractionDispatcher::new(SlideConverterConfig::from_env()));
            pipeline
                .retriever()
                .ensure_collection(cli.embedding_dimensions)
                .await?;

            let ctx = CourseContext {
                course_id: Some(course_id),
                course_name,
                module_id,
                topic_id,
            };

            let files = if path.is_dir() {
                discover_course_files(&path)
            } else {
                vec![path.clone()]
            };
            if files.is_empty() {
                println!("no ingestable files under {}", path.display());
                return Ok(());
            }

            let mut failures = 0usize;
            for file in files {
                match ingest_file(&pipeline, &file, &ctx).await {
                    Ok((material_id, chunks, stored)) => {
                        println!(
                            "{}: material={} chunks={} stored={}",
                            file.display(),
                            material_id,
                            chunks,
                            stored
                        );
                    }
                    Err(error) => {
                        failures += 1;
                        warn!(path = %file.display(), %error, "ingestion failed");
                        println!("{}: FAILED ({error})", file.display());
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("{failures} file(s) failed to ingest");
            }
        }
        Command::Query {
            query,
            top_k,
            course_id,
        } => {
            let retriever = Retriever::new(
                manager,
                embedder_for(
                    cli.embedding_api_key.clone(),
                    &cli.embedding_url,
                    &cli.embedding_model,
                    cli.embedding_dimensions,
                )?,
                &cli.collection,
            );
            let hits = retriever
                .retrieve(&query, top_k, course_id.as_deref())
                .await?;
            if hits.is_empty() {
                println!("no matching fragments");
                return Ok(());
            }

            let (context_block, citations) = build_context(&hits);
            println!("{context_block}\n");
            for (index, citation) in citations.iter().enumerate() {
                let location = citation.location.as_deref().unwrap_or("-");
                println!(
                    "[{}] {} ({}) score={:.4}",
                    index + 1,
                    citation.source_name,
                    location,
                    hits[index].score
                );
            }
        }
        Command::Status { material_id } => {
            let record = materials
                .get(&material_id)
                .await?
                .with_context(|| format!("unknown material: {material_id}"))?;
            println!("material: {}", record.id);
            println!("title:    {}", record.title);
            println!("status:   {}", serde_json::to_string(&record.status)?);
            println!("progress: {:.2}", record.processing_status.progress);
            println!("chunks:   {}", record.chunk_count);
            if let Some(error_message) = &record.processing_status.error_message {
                println!("error:    {error_message}");
            }
        }
        Command::Delete { material_id } => {
            let record = materials
                .get(&material_id)
                .await?
                .with_context(|| format!("unknown material: {material_id}"))?;
            if !record.vector_ids.is_empty() {
                manager
                    .delete(
                        &cli.collection,
                        &DeleteSelector::Ids(record.vector_ids.clone()),
                    )
                    .await?;
            }
            materials.remove(&material_id).await?;
            println!(
                "deleted material {} ({} chunk(s))",
                material_id,
                record.vector_ids.len()
            );
        }
    }

    Ok(())
}

fn embedder_for(
    api_key: Option<String>,
    base_url: &str,
    model: &str,
    dimensions: usize,
) -> anyhow::Result<OpenAiEmbedder> {
    let api_key = api_key
        .context("an embedding API key is required: pass --embedding-api-key or set OPENAI_API_KEY")?;
    Ok(OpenAiEmbedder::new(api_key, base_url, model, dimensions))
}

async fn ingest_file<S, E, M>(
    pipeline: &IngestionPipeline<S, E, M>,
    path: &Path,
    ctx: &CourseContext,
) -> anyhow::Result<(String, usize, usize)>
where
    S: course_index_core::VectorStore,
    E: course_index_core::Embedder,
    M: MaterialStore,
{
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("path has no file name: {}", path.display()))?;

    // Content-addressed material ids make re-ingesting the same bytes
    // update the existing record instead of creating a sibling.
    let material_id = content_hash(&bytes);
    let report = pipeline
        .ingest(&material_id, &bytes, filename, ctx)
        .await?;
    Ok((material_id, report.chunk_count, report.stored_ids.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_delete_parse_without_an_api_key() {
        Cli::try_parse_from(["course-index", "status", "--material-id", "m1"]).unwrap();
        Cli::try_parse_from(["course-index", "delete", "--material-id", "m1"]).unwrap();
    }

    #[test]
    fn missing_api_key_is_reported_when_an_embedder_is_needed() {
        let error = embedder_for(None, "https://api.openai.com/v1", "model", 8).unwrap_err();
        assert!(error.to_string().contains("OPENAI_API_KEY"));

        assert!(embedder_for(
            Some("sk-test".to_string()),
            "https://api.openai.com/v1",
            "model",
            8
        )
        .is_ok());
    }
}
