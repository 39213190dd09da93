use crate::embeddings::Embedder;
use crate::error::{ProcessingError, RetrievalError};
use crate::extractor::ExtractionDispatcher;
use crate::materials::MaterialStore;
use crate::models::{
    ChunkMetadata, CourseContext, JobStatus, MaterialRecord, MaterialUpdate,
};
use crate::retriever::Retriever;
use crate::segmenter::{segment, SegmenterConfig};
use crate::store::VectorStore;
use chrono::Utc;
use tracing::{error, info};

/// What one ingestion run produced. `stored_ids` can be shorter than
/// `chunk_count` when the store skipped an insert batch.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub material_id: String,
    pub source_id: String,
    pub chunk_count: usize,
    pub stored_ids: Vec<String>,
}

/// Drives one material through extract, segment, embed, and store,
/// checkpointing progress into the material store as it goes. Failures
/// mark the job `Failed` with the error message and freeze progress;
/// chunks already stored stay stored.
pub struct IngestionPipeline<S, E, M> {
    retriever: Retriever<S, E>,
    materials: M,
    extractor: ExtractionDispatcher,
    segmenter: SegmenterConfig,
}

impl<S, E, M> IngestionPipeline<S, E, M>
where
    S: VectorStore,
    E: Embedder,
    M: MaterialStore,
{
    pub fn new(retriever: Retriever<S, E>, materials: M) -> Self {
        Self {
            retriever,
            materials,
            extractor: ExtractionDispatcher::default(),
            segmenter: SegmenterConfig::default(),
        }
    }

    pub fn with_extractor(mut self, extractor: ExtractionDispatcher) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_segmenter(mut self, segmenter: SegmenterConfig) -> Self {
        self.segmenter = segmenter;
        self
    }

    pub fn retriever(&self) -> &Retriever<S, E> {
        &self.retriever
    }

    pub fn materials(&self) -> &M {
        &self.materials
    }

    pub async fn ingest(
        &self,
        material_id: &str,
        bytes: &[u8],
        filename: &str,
        ctx: &CourseContext,
    ) -> Result<IngestReport, ProcessingError> {
        self.ensure_record(material_id, bytes, filename, ctx)
            .await
            .map_err(RetrievalError::Store)?;
        self.run(material_id, bytes, filename, ctx).await
    }

    /// Re-runs a failed job from extraction. The material keeps its
    /// identity and associations; only `Failed` jobs may be retried.
    pub async fn retry(
        &self,
        material_id: &str,
        bytes: &[u8],
        filename: &str,
        ctx: &CourseContext,
    ) -> Result<IngestReport, ProcessingError> {
        let record = self
            .materials
            .get(material_id)
            .await
            .map_err(RetrievalError::Store)?
            .ok_or_else(|| {
                RetrievalError::InvalidArgument(format!("unknown material: {material_id}"))
            })?;

        if record.status != JobStatus::Failed {
            return Err(RetrievalError::InvalidArgument(format!(
                "material {material_id} is not in a failed state"
            ))
            .into());
        }

        self.run(material_id, bytes, filename, ctx).await
    }

    async fn run(
        &self,
        material_id: &str,
        bytes: &[u8],
        filename: &str,
        ctx: &CourseContext,
    ) -> Result<IngestReport, ProcessingError> {
        match self.process(material_id, bytes, filename, ctx).await {
            Ok(report) => Ok(report),
            Err(processing_error) => {
                error!(material_id, %processing_error, "ingestion failed");
                // Progress stays where it was; stored chunks are kept.
                let mark_failed = self
                    .materials
                    .update_fields(
                        material_id,
                        MaterialUpdate {
                            status: Some(JobStatus::Failed),
                            error_message: Some(processing_error.to_string()),
                            ..MaterialUpdate::default()
                        },
                    )
                    .await;
                if let Err(update_error) = mark_failed {
                    error!(material_id, %update_error, "failed to record job failure");
                }
                Err(processing_error)
            }
        }
    }

    async fn process(
        &self,
        material_id: &str,
        bytes: &[u8],
        filename: &str,
        ctx: &CourseContext,
    ) -> Result<IngestReport, ProcessingError> {
        self.update(
            material_id,
            MaterialUpdate {
                status: Some(JobStatus::Processing),
                progress: Some(0.0),
                started_at: Some(Utc::now()),
                ..MaterialUpdate::default()
            },
        )
        .await?;

        self.update(material_id, MaterialUpdate::progress(0.1)).await?;
        let document = self.extractor.extract(bytes, filename).await?;
        self.update(material_id, MaterialUpdate::progress(0.3)).await?;

        let mut metadata = ChunkMetadata::new(&document.filename, &document.source_id);
        metadata.mime_type = Some(document.mime_type.clone());
        metadata.content_type = document.content_type.clone();
        metadata.course_id = ctx.course_id.clone();
        metadata.course_name = ctx.course_name.clone();
        metadata.module_id = ctx.module_id.clone();
        metadata.topic_id = ctx.topic_id.clone();
        metadata.extra = document.structure.clone();

        let chunks = segment(&document.text, &metadata, &self.segmenter);
        let total = chunks.len();
        self.update(
            material_id,
            MaterialUpdate {
                progress: Some(0.5),
                chunk_count: Some(total as u64),
                ..MaterialUpdate::default()
            },
        )
        .await?;
        info!(material_id, source_id = %document.source_id, chunks = total, "segmented material");

        let mut stored_ids = Vec::with_capacity(total);
        for (index, chunk) in chunks.iter().enumerate() {
            let confirmed = self
                .retriever
                .add_chunks(std::slice::from_ref(chunk))
                .await?;
            stored_ids.extend(confirmed);

            let progress = 0.5 + 0.4 * (index + 1) as f64 / total as f64;
            self.update(material_id, MaterialUpdate::progress(progress))
                .await?;
        }

        self.update(
            material_id,
            MaterialUpdate {
                status: Some(JobStatus::Completed),
                progress: Some(1.0),
                completed_at: Some(Utc::now()),
                vector_ids: Some(stored_ids.clone()),
                ..MaterialUpdate::default()
            },
        )
        .await?;
        info!(material_id, stored = stored_ids.len(), "ingestion complete");

        Ok(IngestReport {
            material_id: material_id.to_string(),
            source_id: document.source_id,
            chunk_count: total,
            stored_ids,
        })
    }

    async fn ensure_record(
        &self,
        material_id: &str,
        bytes: &[u8],
        filename: &str,
        ctx: &CourseContext,
    ) -> Result<(), crate::error::StoreError> {
        if self.materials.get(material_id).await?.is_some() {
            return Ok(());
        }

        let file_type = filename.rsplit('.').next().unwrap_or("bin").to_string();
        let mut record = MaterialRecord::new(material_id, filename, file_type);
        record.file_size = bytes.len() as u64;
        record.course_id = ctx.course_id.clone();
        record.module_id = ctx.module_id.clone();
        record.topic_id = ctx.topic_id.clone();
        self.materials.put(record).await
    }

    async fn update(
        &self,
        material_id: &str,
        update: MaterialUpdate,
    ) -> Result<(), ProcessingError> {
        self.materials
            .update_fields(material_id, update)
            .await
            .map_err(RetrievalError::Store)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{HashEmbedder, zero_vector};
    use crate::error::RetrievalError;
    use crate::index::{IndexStoreManager, RetryPolicy};
    use crate::materials::InMemoryMaterialStore;
    use crate::stores::MemoryVectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const DIM: usize = 32;

    /// Embeds like the hash embedder but fails permanently once the
    /// cumulative number of embedded texts reaches `fail_at`.
    struct FlakyEmbedder {
        inner: HashEmbedder,
        calls: AtomicUsize,
        fail_at: usize,
    }

    impl FlakyEmbedder {
        fn new(fail_at: usize) -> Self {
            Self {
                inner: HashEmbedder { dimensions: DIM },
                calls: AtomicUsize::new(0),
                fail_at,
            }
        }
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn dimensions(&self) -> usize {
            DIM
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_at {
                return Err(RetrievalError::Embedding("provider unavailable".to_string()));
            }
            self.inner.embed(text).await
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }

    fn pipeline<E: Embedder>(
        embedder: E,
    ) -> IngestionPipeline<MemoryVectorStore, E, InMemoryMaterialStore> {
        let manager = IndexStoreManager::new(MemoryVectorStore::new()).with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        });
        let retriever = Retriever::new(manager, embedder, "kb");
        IngestionPipeline::new(retriever, InMemoryMaterialStore::new())
    }

    fn ctx() -> CourseContext {
        CourseContext {
            course_id: Some("ds101".to_string()),
            course_name: Some("Data Science".to_string()),
            module_id: None,
            topic_id: None,
        }
    }

    /// 25 oversized paragraphs, each splitting into exactly two
    /// segments under the default 500/100 config.
    fn fifty_chunk_text() -> String {
        (0..25)
            .map(|i| format!("{}{}", (b'a' + (i % 26) as u8) as char, "x".repeat(599)))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[tokio::test]
    async fn successful_ingest_completes_with_all_ids() {
        let pipeline = pipeline(HashEmbedder { dimensions: DIM });
        pipeline.retriever().ensure_collection(DIM).await.unwrap();

        let text = "Intro paragraph about the course.\n\nSecond paragraph with more detail.";
        let report = pipeline
            .ingest("m1", text.as_bytes(), "syllabus.txt", &ctx())
            .await
            .unwrap();

        assert!(report.chunk_count >= 1);
        assert_eq!(report.stored_ids.len(), report.chunk_count);

        let record = pipeline.materials().get("m1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.processing_status.progress, 1.0);
        assert!(record.processing_status.started_at.is_some());
        assert!(record.processing_status.completed_at.is_some());
        assert_eq!(record.vector_ids.len(), report.chunk_count);
        assert_eq!(record.chunk_count as usize, report.chunk_count);
    }

    #[tokio::test]
    async fn failure_mid_run_freezes_progress_and_keeps_stored_chunks() {
        let pipeline = pipeline(FlakyEmbedder::new(37));
        pipeline.retriever().ensure_collection(DIM).await.unwrap();

        let text = fifty_chunk_text();
        let error = pipeline
            .ingest("m1", text.as_bytes(), "notes.txt", &ctx())
            .await
            .unwrap_err();
        assert!(matches!(error, ProcessingError::Retrieval(_)));

        let record = pipeline.materials().get("m1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record
            .processing_status
            .error_message
            .as_deref()
            .unwrap()
            .contains("provider unavailable"));

        // 36 of 50 chunks made it in before the provider died.
        assert_eq!(record.chunk_count, 50);
        let expected = 0.5 + 0.4 * 36.0 / 50.0;
        assert!((record.processing_status.progress - expected).abs() < 1e-9);
        assert_eq!(
            pipeline.retriever().manager().store().record_count("kb"),
            36
        );
        assert!(record.processing_status.completed_at.is_none());
    }

    #[tokio::test]
    async fn retry_is_only_allowed_from_failed() {
        let pipeline = pipeline(HashEmbedder { dimensions: DIM });
        pipeline.retriever().ensure_collection(DIM).await.unwrap();

        pipeline
            .ingest("m1", b"one paragraph of notes", "notes.txt", &ctx())
            .await
            .unwrap();

        let error = pipeline
            .retry("m1", b"one paragraph of notes", "notes.txt", &ctx())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ProcessingError::Retrieval(RetrievalError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn retry_after_failure_reaches_completed() {
        // Fails exactly once, on the very first embedded text.
        let pipeline = pipeline(FlakyEmbedder::new(1));
        pipeline.retriever().ensure_collection(DIM).await.unwrap();

        pipeline
            .ingest("m1", b"some lecture notes", "notes.txt", &ctx())
            .await
            .unwrap_err();

        let report = pipeline
            .retry("m1", b"some lecture notes", "notes.txt", &ctx())
            .await
            .unwrap();
        assert_eq!(report.stored_ids.len(), report.chunk_count);

        let record = pipeline.materials().get("m1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.processing_status.progress, 1.0);
    }

    #[tokio::test]
    async fn ingested_chunks_are_retrievable_with_course_filter() {
        let pipeline = pipeline(HashEmbedder { dimensions: DIM });
        pipeline.retriever().ensure_collection(DIM).await.unwrap();

        pipeline
            .ingest(
                "m1",
                b"Gradient descent minimizes the loss function step by step.",
                "lecture.txt",
                &ctx(),
            )
            .await
            .unwrap();

        let hits = pipeline
            .retriever()
            .retrieve("gradient descent", 5, Some("ds101"))
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk.metadata.course_id.as_deref(), Some("ds101"));
        assert_ne!(
            pipeline
                .retriever()
                .manager()
                .store()
                .record_count("kb"),
            0
        );

        let other_course = pipeline
            .retriever()
            .retrieve("gradient descent", 5, Some("cs202"))
            .await
            .unwrap();
        assert!(other_course.is_empty());
    }

    #[tokio::test]
    async fn zero_vector_queries_still_return_results_without_scores() {
        let pipeline = pipeline(HashEmbedder { dimensions: DIM });
        pipeline.retriever().ensure_collection(DIM).await.unwrap();
        pipeline
            .ingest("m1", b"content about parsing", "notes.txt", &ctx())
            .await
            .unwrap();

        // A query of rare glyphs can hash to few buckets but never panics.
        let vector = zero_vector(DIM);
        let hits = pipeline
            .retriever()
            .manager()
            .search("kb", &vector, 5, None)
            .await
            .unwrap();
        for hit in hits {
            assert_eq!(hit.score, 0.0);
        }
    }
}
