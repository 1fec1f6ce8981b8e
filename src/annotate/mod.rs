//! Best-effort feature extraction for committed payloads.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::replication::types::Annotation;
use crate::util::errors::{ReplicationError, Result};

/// Characters of payload text sent to the embedding model
pub const MAX_ANNOTATION_CHARS: usize = 1000;

#[async_trait]
pub trait Annotator: Send + Sync {
    async fn annotate(&self, data: &[u8]) -> Result<Annotation>;
}

/// Payload bytes as model input: lossy UTF-8, NULs stripped, truncated.
pub fn prepare_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data)
        .chars()
        .filter(|c| *c != '\0')
        .take(MAX_ANNOTATION_CHARS)
        .collect()
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
    pooling: &'a str,
    normalize: bool,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Annotation,
}

/// Calls an HTTP embedding service: `POST {"text"}` -> `{"embedding": [...]}`
pub struct HttpAnnotator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAnnotator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReplicationError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

fn annotation_err(e: reqwest::Error) -> ReplicationError {
    ReplicationError::Annotation(e.to_string())
}

#[async_trait]
impl Annotator for HttpAnnotator {
    async fn annotate(&self, data: &[u8]) -> Result<Annotation> {
        let text = prepare_text(data);
        let request = EmbedRequest {
            text: &text,
            pooling: "mean",
            normalize: true,
        };

        let response: EmbedResponse = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(annotation_err)?
            .error_for_status()
            .map_err(annotation_err)?
            .json()
            .await
            .map_err(annotation_err)?;

        if response.embedding.is_empty() {
            return Err(ReplicationError::Annotation("empty embedding".to_string()));
        }
        Ok(response.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_text_strips_nul_and_truncates() {
        assert_eq!(prepare_text(b"a\0b\0c"), "abc");

        let long = vec![b'x'; MAX_ANNOTATION_CHARS + 50];
        assert_eq!(prepare_text(&long).chars().count(), MAX_ANNOTATION_CHARS);
    }

    #[test]
    fn test_prepare_text_is_lossy_on_binary() {
        let text = prepare_text(&[0xff, b'o', b'k']);
        assert!(text.ends_with("ok"));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_annotation_error() {
        let annotator =
            HttpAnnotator::new("http://127.0.0.1:1/embed", Duration::from_millis(200)).unwrap();
        assert!(matches!(
            annotator.annotate(b"hello").await,
            Err(ReplicationError::Annotation(_))
        ));
    }
}
