pub mod config;

pub use config::{
    AnnotationConfig, BlobStoreConfig, Config, HttpConfig, NetworkConfig, NodeConfig,
    ReplicationConfig, Role,
};
