pub mod context;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod materials;
pub mod models;
pub mod pipeline;
pub mod retriever;
pub mod segmenter;
pub mod store;
pub mod stores;

pub use context::{build_context, Citation};
pub use embeddings::{Embedder, HashEmbedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ProcessingError, RetrievalError, StoreError};
pub use extractor::{content_hash, vectorization_text, ExtractionDispatcher, SlideConverterConfig};
pub use index::{IndexStoreManager, RetryPolicy, DEFAULT_INSERT_BATCH_SIZE};
pub use ingest::discover_course_files;
pub use materials::{InMemoryMaterialStore, JsonFileMaterialStore, MaterialStore};
pub use models::{
    Chunk, ChunkMetadata, ChunkType, CourseContext, DeleteSelector, DistanceMetric,
    ExtractedDocument, JobStatus, MaterialRecord, MaterialUpdate, ProcessingStatus,
    RetrievedChunk, ScoredRecord, SearchFilter, VectorRecord,
};
pub use pipeline::{IngestReport, IngestionPipeline};
pub use retriever::Retriever;
pub use segmenter::{segment, select_strategy, SegmenterConfig, Strategy};
pub use store::VectorStore;
pub use stores::{HttpVectorStore, MemoryVectorStore};
