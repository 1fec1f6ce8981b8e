pub mod annotate;
pub mod config;
pub mod http;
pub mod network;
pub mod node;
pub mod replication;
pub mod storage;
pub mod util;
