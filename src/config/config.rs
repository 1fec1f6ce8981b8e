use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::replication::quorum::{DivergencePolicy, QuorumPolicy};
use crate::util::errors::{ReplicationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Proposes entries and accepts submissions
    Leader,
    /// Acknowledges proposals and applies commits
    #[default]
    Peer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity announced in presence beacons. Falls back to the transport's
    /// id, then to a random `peer-temp-*` id.
    pub peer_id: Option<String>,

    pub role: Role,

    /// Interval between presence beacons in milliseconds (0 announces once)
    pub hello_interval_ms: u64,

    /// One of trace, debug, info, warn, error
    pub log_level: String,
}

impl NodeConfig {
    pub fn hello_interval(&self) -> Option<Duration> {
        (self.hello_interval_ms > 0).then(|| Duration::from_millis(self.hello_interval_ms))
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: None,
            role: Role::Peer,
            hello_interval_ms: 5000,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub listen_addr: String,

    /// Gossipsub topic shared by all nodes
    pub topic: String,

    /// Multiaddrs dialed at startup, in addition to mDNS discovery
    pub bootstrap: Vec<String>,

    pub heartbeat_interval_ms: u64,

    pub idle_timeout_ms: u64,
}

impl NetworkConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/0".to_string(),
            topic: "mensagens-sistema".to_string(),
            bootstrap: Vec::new(),
            heartbeat_interval_ms: 1000,
            idle_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub quorum: QuorumPolicy,

    pub divergence: DivergencePolicy,

    /// How long a round waits for quorum, in milliseconds
    pub round_timeout_ms: u64,

    /// Upper bound between quorum re-evaluations when no ack arrives
    pub poll_interval_ms: u64,

    /// Count the leader itself as a member that acks every proposal
    pub leader_acks: bool,
}

impl ReplicationConfig {
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.round_timeout_ms == 0 {
            return Err(ReplicationError::InvalidConfig(
                "round_timeout_ms must be positive".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(ReplicationError::InvalidConfig(
                "poll_interval_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            quorum: QuorumPolicy::Majority,
            divergence: DivergencePolicy::WaitForTimeout,
            round_timeout_ms: 20_000,
            poll_interval_ms: 300,
            leader_acks: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BlobStoreConfig {
    /// IPFS daemon HTTP API
    Ipfs { api_url: String },
    /// Local content-addressed directory
    Fs { data_dir: PathBuf },
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        BlobStoreConfig::Ipfs {
            api_url: "http://localhost:5001".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Embedding service URL; annotation is skipped when unset
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl AnnotationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5323".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub replication: ReplicationConfig,
    pub blob_store: BlobStoreConfig,
    pub annotation: AnnotationConfig,
    pub http: HttpConfig,
}

impl Config {
    /// Load configuration from a TOML file; missing sections take defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| ReplicationError::InvalidConfig(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.replication.validate()?;

        if let Some(peer_id) = &self.node.peer_id {
            if peer_id.trim().is_empty() {
                return Err(ReplicationError::InvalidConfig(
                    "peer_id cannot be empty".to_string(),
                ));
            }
        }

        if self.network.topic.is_empty() {
            return Err(ReplicationError::InvalidConfig(
                "topic cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[node]
peer_id = "leader-1"
role = "leader"
hello_interval_ms = 0

[replication]
quorum = "unanimous"
divergence = "fail_fast"
round_timeout_ms = 1500

[blob_store]
kind = "fs"
data_dir = "./data/blobs"

[annotation]
endpoint = "http://localhost:8080/embed"
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.node.role, Role::Leader);
        assert_eq!(config.node.hello_interval(), None);
        assert_eq!(config.replication.quorum, QuorumPolicy::Unanimous);
        assert_eq!(config.replication.divergence, DivergencePolicy::FailFast);
        assert_eq!(config.replication.round_timeout(), Duration::from_millis(1500));
        assert_eq!(config.replication.poll_interval_ms, 300);
        assert!(matches!(config.blob_store, BlobStoreConfig::Fs { .. }));
        assert_eq!(config.network.topic, "mensagens-sistema");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.node.role, Role::Peer);
        assert_eq!(config.replication.quorum, QuorumPolicy::Majority);
        assert_eq!(config.replication.round_timeout(), Duration::from_secs(20));
        assert!(!config.replication.leader_acks);
        assert!(matches!(config.blob_store, BlobStoreConfig::Ipfs { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.replication.round_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ReplicationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("node.toml");
        std::fs::write(&path, "[http]\nlisten_addr = \"127.0.0.1:9000\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.http.listen_addr, "127.0.0.1:9000");
    }
}
