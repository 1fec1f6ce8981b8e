use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::blob_store::BlobStore;
use crate::replication::types::ContentId;
use crate::util::errors::{ReplicationError, Result};

/// Blob store backed by a local IPFS daemon's HTTP API
pub struct IpfsBlobStore {
    client: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

impl IpfsBlobStore {
    /// `api_url` is the daemon's API root, e.g. `http://localhost:5001`
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v0/{}", self.api_url, path)
    }
}

fn blob_err(e: reqwest::Error) -> ReplicationError {
    ReplicationError::BlobStore(e.to_string())
}

#[async_trait]
impl BlobStore for IpfsBlobStore {
    async fn add(&self, data: Vec<u8>, name: &str) -> Result<ContentId> {
        let size = data.len();
        let form = Form::new().part("file", Part::bytes(data).file_name(name.to_string()));

        let response: AddResponse = self
            .client
            .post(self.endpoint("add"))
            .query(&[("pin", "true")])
            .multipart(form)
            .send()
            .await
            .map_err(blob_err)?
            .error_for_status()
            .map_err(blob_err)?
            .json()
            .await
            .map_err(blob_err)?;

        tracing::info!("File added to IPFS: {} ({} bytes) -> {}", name, size, response.hash);
        Ok(response.hash)
    }

    async fn get(&self, content_id: &str) -> Result<Vec<u8>> {
        let bytes = self
            .client
            .post(self.endpoint("cat"))
            .query(&[("arg", content_id)])
            .send()
            .await
            .map_err(blob_err)?
            .error_for_status()
            .map_err(blob_err)?
            .bytes()
            .await
            .map_err(blob_err)?;

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_slash() {
        let store = IpfsBlobStore::new("http://localhost:5001/");
        assert_eq!(store.endpoint("add"), "http://localhost:5001/api/v0/add");
    }

    #[test]
    fn test_parse_add_response() {
        let raw = r#"{"Name":"a.txt","Hash":"QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG","Size":"13"}"#;
        let parsed: AddResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.hash, "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG");
    }

    #[tokio::test]
    async fn test_unreachable_daemon_is_blob_store_error() {
        let store = IpfsBlobStore::new("http://127.0.0.1:1");
        let err = store.add(b"x".to_vec(), "x").await.unwrap_err();
        assert!(matches!(err, ReplicationError::BlobStore(_)));
    }
}
