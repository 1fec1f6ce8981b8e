pub mod blob_store;
pub mod ipfs;

pub use blob_store::{BlobStore, FsBlobStore};
pub use ipfs::IpfsBlobStore;
