pub mod http;
pub mod memory;

pub use http::HttpVectorStore;
pub use memory::MemoryVectorStore;
