pub mod blob;
pub mod kv;
pub mod vector;

pub use blob::BlobStore;
pub use kv::KvStore;
pub use vector::VectorStore;
