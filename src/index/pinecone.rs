//! Pinecone REST adapter (control plane + data plane).

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::VectorIndex;
use crate::error::PipelineError;
use crate::records::{IndexedRecord, QueryMatch, RecordMetadata};

/// Global control-plane endpoint.
pub const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Serverless index parameters used when the index must be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerlessSpec {
    /// Vector dimension.
    pub dimension: usize,
    /// Similarity metric (`cosine`, `euclidean`, `dotproduct`).
    pub metric: String,
    /// Cloud provider.
    pub cloud: String,
    /// Cloud region.
    pub region: String,
}

impl Default for ServerlessSpec {
    fn default() -> Self {
        Self {
            dimension: 384,
            metric: "cosine".to_string(),
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

/// Handle to one Pinecone index. Cheap to clone; the HTTP client is shared.
#[derive(Clone)]
pub struct PineconeIndex {
    client: Client,
    name: String,
    host: String,
}

impl PineconeIndex {
    /// Resolves the data-plane host of an existing index. Fails when the index
    /// does not exist, so misconfiguration surfaces at startup.
    pub fn connect(api_key: &str, index_name: &str, timeout: Duration) -> Result<Self> {
        let client = build_client(api_key, timeout)?;
        let description = describe(&client, index_name)?
            .ok_or_else(|| anyhow!("Pinecone index '{index_name}' does not exist"))?;
        Ok(Self::from_description(client, description))
    }

    /// Connects to `index_name`, creating it with `spec` first when missing and
    /// waiting up to `ready_timeout` for it to accept traffic.
    pub fn ensure(
        api_key: &str,
        index_name: &str,
        spec: &ServerlessSpec,
        timeout: Duration,
        ready_timeout: Duration,
    ) -> Result<Self> {
        let client = build_client(api_key, timeout)?;
        let description = match describe(&client, index_name)? {
            Some(existing) => {
                if existing.dimension != Some(spec.dimension) {
                    bail!(
                        "Pinecone index '{}' has dimension {:?}, embedder produces {}",
                        index_name,
                        existing.dimension,
                        spec.dimension
                    );
                }
                existing
            }
            None => {
                info!(index = index_name, dimension = spec.dimension, "creating Pinecone index");
                create(&client, index_name, spec)?;
                wait_until_ready(&client, index_name, ready_timeout)?
            }
        };
        Ok(Self::from_description(client, description))
    }

    /// Uses an already-known data-plane host, skipping the control plane.
    pub fn with_host(api_key: &str, index_name: &str, host: &str, timeout: Duration) -> Result<Self> {
        let client = build_client(api_key, timeout)?;
        Ok(Self {
            client,
            name: index_name.to_string(),
            host: normalize_host(host),
        })
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Data-plane base URL.
    pub fn host(&self) -> &str {
        &self.host
    }

    fn from_description(client: Client, description: IndexDescription) -> Self {
        Self {
            client,
            host: normalize_host(&description.host),
            name: description.name,
        }
    }

    fn post_upsert(&self, records: &[IndexedRecord], namespace: &str) -> Result<()> {
        let body = UpsertRequest {
            vectors: records
                .iter()
                .map(|record| UpsertVector {
                    id: &record.id,
                    values: &record.values,
                    metadata: &record.metadata,
                })
                .collect(),
            namespace,
        };
        let resp = self
            .client
            .post(format!("{}/vectors/upsert", self.host))
            .json(&body)
            .send()
            .context("failed to call Pinecone upsert")?;
        let parsed: UpsertResponse = read_json(resp, "upsert")?;
        anyhow::ensure!(
            parsed.upserted_count == records.len(),
            "Pinecone upserted {} of {} vectors",
            parsed.upserted_count,
            records.len()
        );
        Ok(())
    }

    fn post_query(&self, vector: &[f32], top_k: usize, namespace: &str) -> Result<Vec<QueryMatch>> {
        let body = QueryRequest {
            vector,
            top_k,
            namespace,
            include_metadata: true,
            include_values: false,
        };
        let resp = self
            .client
            .post(format!("{}/query", self.host))
            .json(&body)
            .send()
            .context("failed to call Pinecone query")?;
        let parsed: QueryResponse = read_json(resp, "query")?;
        Ok(parsed
            .matches
            .into_iter()
            .map(|m| QueryMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata,
            })
            .collect())
    }
}

impl VectorIndex for PineconeIndex {
    fn upsert(&self, records: &[IndexedRecord], namespace: &str) -> crate::error::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.post_upsert(records, namespace)
            .map_err(|err| PipelineError::index_write(namespace, records.len(), err))
    }

    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
    ) -> crate::error::Result<Vec<QueryMatch>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.post_query(vector, top_k, namespace)
            .map_err(|err| PipelineError::index_query(namespace, err))
    }
}

fn build_client(api_key: &str, timeout: Duration) -> Result<Client> {
    anyhow::ensure!(!api_key.trim().is_empty(), "missing Pinecone API key");
    let mut headers = HeaderMap::new();
    headers.insert(
        "Api-Key",
        HeaderValue::from_str(api_key.trim()).context("invalid Pinecone API key")?,
    );
    headers.insert("X-Pinecone-API-Version", HeaderValue::from_static(API_VERSION));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .context("failed to build Pinecone HTTP client")
}

fn describe(client: &Client, index_name: &str) -> Result<Option<IndexDescription>> {
    let resp = client
        .get(format!("{CONTROL_PLANE_URL}/indexes/{index_name}"))
        .send()
        .with_context(|| format!("failed to describe Pinecone index '{index_name}'"))?;
    if resp.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    read_json(resp, "describe index").map(Some)
}

fn create(client: &Client, index_name: &str, spec: &ServerlessSpec) -> Result<()> {
    let body = CreateIndexRequest {
        name: index_name,
        dimension: spec.dimension,
        metric: &spec.metric,
        spec: CreateSpec {
            serverless: ServerlessBody {
                cloud: &spec.cloud,
                region: &spec.region,
            },
        },
    };
    let resp = client
        .post(format!("{CONTROL_PLANE_URL}/indexes"))
        .json(&body)
        .send()
        .with_context(|| format!("failed to create Pinecone index '{index_name}'"))?;
    let status = resp.status();
    // Another ingestion run may have created it in the meantime.
    if status.is_success() || status == StatusCode::CONFLICT {
        return Ok(());
    }
    let text = resp
        .text()
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    bail!("Pinecone create index returned {}: {}", status, text)
}

fn wait_until_ready(client: &Client, index_name: &str, limit: Duration) -> Result<IndexDescription> {
    let started = Instant::now();
    loop {
        if let Some(description) = describe(client, index_name)? {
            if description.status.ready {
                return Ok(description);
            }
            debug!(index = index_name, state = %description.status.state, "waiting for index");
        }
        if started.elapsed() >= limit {
            bail!("Pinecone index '{index_name}' not ready after {:?}", limit);
        }
        thread::sleep(READY_POLL_INTERVAL);
    }
}

fn read_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::blocking::Response,
    operation: &str,
) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        bail!("Pinecone {} returned {}: {}", operation, status, text);
    }
    resp.json()
        .with_context(|| format!("failed to parse Pinecone {operation} response"))
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    name: String,
    #[serde(default)]
    dimension: Option<usize>,
    host: String,
    status: IndexStatus,
}

#[derive(Debug, Deserialize)]
struct IndexStatus {
    ready: bool,
    #[serde(default)]
    state: String,
}

#[derive(Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: &'a str,
    spec: CreateSpec<'a>,
}

#[derive(Serialize)]
struct CreateSpec<'a> {
    serverless: ServerlessBody<'a>,
}

#[derive(Serialize)]
struct ServerlessBody<'a> {
    cloud: &'a str,
    region: &'a str,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
    namespace: &'a str,
}

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a RecordMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    upserted_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    namespace: &'a str,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<ResponseMatch>,
}

#[derive(Debug, Deserialize)]
struct ResponseMatch {
    id: String,
    score: f32,
    metadata: RecordMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn query_request_uses_camel_case_fields() {
        let body = serde_json::to_value(QueryRequest {
            vector: &[0.5, 0.5],
            top_k: 3,
            namespace: "pubmed-data",
            include_metadata: true,
            include_values: false,
        })
        .expect("serialize");
        assert_eq!(
            body,
            serde_json::json!({
                "vector": [0.5, 0.5],
                "topK": 3,
                "namespace": "pubmed-data",
                "includeMetadata": true,
                "includeValues": false
            })
        );
    }

    #[test]
    fn query_response_requires_context_metadata() {
        let ok: QueryResponse = serde_json::from_str(
            r#"{"matches":[{"id":"123","score":0.91,"metadata":{"title":"t","context":"c","source":"pubmed"}}],"namespace":"pubmed-data"}"#,
        )
        .expect("parse");
        assert_eq!(ok.matches[0].metadata.context, "c");

        let missing = serde_json::from_str::<QueryResponse>(
            r#"{"matches":[{"id":"123","score":0.91,"metadata":{"title":"t"}}]}"#,
        );
        assert!(missing.is_err());

        let empty: QueryResponse = serde_json::from_str(r#"{"namespace":"x"}"#).expect("parse");
        assert!(empty.matches.is_empty());
    }

    #[test]
    fn upsert_payload_matches_record_shape() {
        let record = IndexedRecord {
            id: "42".into(),
            values: vec![0.25],
            metadata: RecordMetadata::new("Is fever common?", "Fever is common.", "pubmed"),
        };
        let body = serde_json::to_value(UpsertRequest {
            vectors: vec![UpsertVector {
                id: &record.id,
                values: &record.values,
                metadata: &record.metadata,
            }],
            namespace: "pubmed-data",
        })
        .expect("serialize");
        assert_eq!(
            body,
            serde_json::json!({
                "vectors": [{
                    "id": "42",
                    "values": [0.25],
                    "metadata": {"title": "Is fever common?", "context": "Fever is common.", "source": "pubmed"}
                }],
                "namespace": "pubmed-data"
            })
        );
    }

    #[test]
    fn hosts_gain_https_scheme() {
        assert_eq!(
            normalize_host("pulse-ai-abc.svc.pinecone.io/"),
            "https://pulse-ai-abc.svc.pinecone.io"
        );
        assert_eq!(normalize_host("http://localhost:5080"), "http://localhost:5080");
    }

    #[test]
    fn describe_payload_parses_host_and_status() {
        let description: IndexDescription = serde_json::from_str(
            r#"{"name":"pulse-ai","dimension":384,"metric":"cosine","host":"pulse-ai-x.svc.pinecone.io","status":{"ready":true,"state":"Ready"}}"#,
        )
        .expect("parse");
        assert_eq!(description.dimension, Some(384));
        assert!(description.status.ready);
    }
}
