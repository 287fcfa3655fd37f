//! GitHub Actions cache service backend
//!
//! Talks to the runner's cache API directly: a lookup returns a signed
//! archive location, uploads go through reserve, chunked patch and commit.

use crate::driver::ByteStream;
use crate::error::{BkStateError, BkStateResult};
use crate::remote::{combined_keys, LoadedCache, RemoteBackend};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use tracing::{debug, info};

const API_VERSION: &str = "application/json;api-version=6.0-preview.1";
const VERSION_SALT: &str = "buildkit-state-1.0";
const UPLOAD_CHUNK_SIZE: usize = 32 * 1024 * 1024;

/// Runner-provided endpoint and token
#[derive(Debug, Clone)]
pub struct ActionsCacheSettings {
    pub base_url: String,
    pub token: String,
}

impl ActionsCacheSettings {
    /// Read `ACTIONS_CACHE_URL` and `ACTIONS_RUNTIME_TOKEN`
    pub fn from_env() -> BkStateResult<Self> {
        let base_url = non_empty_env("ACTIONS_CACHE_URL")?;
        let token = non_empty_env("ACTIONS_RUNTIME_TOKEN")?;
        Ok(Self { base_url, token })
    }
}

fn non_empty_env(name: &'static str) -> BkStateResult<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(BkStateError::MissingEnv(name)),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntry {
    cache_key: Option<String>,
    scope: Option<String>,
    creation_time: Option<String>,
    archive_location: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReserveRequest<'a> {
    key: &'a str,
    version: &'a str,
    cache_size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReserveResponse {
    cache_id: i64,
}

#[derive(Debug, Serialize)]
struct CommitRequest {
    size: u64,
}

/// Snapshot storage in the GitHub Actions cache
pub struct ActionsCacheBackend {
    client: Client,
    base_url: String,
    version: String,
}

impl ActionsCacheBackend {
    pub fn new(settings: &ActionsCacheSettings) -> BkStateResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(API_VERSION));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", settings.token)).map_err(|e| {
            BkStateError::InvalidInput {
                name: "ACTIONS_RUNTIME_TOKEN",
                value: "<redacted>".into(),
                reason: e.to_string(),
            }
        })?;
        headers.insert(AUTHORIZATION, bearer);

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("buildkit-state/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BkStateError::http("building cache client", e))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            version: cache_version(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/_apis/artifactcache/{}", self.base_url, path)
    }

    async fn lookup(&self, keys: &[String]) -> BkStateResult<Option<CacheEntry>> {
        let response = self
            .client
            .get(self.url("cache"))
            .query(&[("keys", keys.join(",")), ("version", self.version.clone())])
            .send()
            .await
            .map_err(|e| BkStateError::http("looking up cache", e))?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let response = check_status("looking up cache", response).await?;
        let entry: CacheEntry = response
            .json()
            .await
            .map_err(|e| BkStateError::http("decoding cache lookup", e))?;
        Ok(Some(entry))
    }

    async fn reserve(&self, key: &str, size: u64) -> BkStateResult<i64> {
        let response = self
            .client
            .post(self.url("caches"))
            .json(&ReserveRequest {
                key,
                version: &self.version,
                cache_size: size,
            })
            .send()
            .await
            .map_err(|e| BkStateError::http("reserving cache", e))?;
        let response = check_status("reserving cache", response).await?;
        let reserved: ReserveResponse = response
            .json()
            .await
            .map_err(|e| BkStateError::http("decoding cache reservation", e))?;
        Ok(reserved.cache_id)
    }

    async fn upload(&self, id: i64, data: &Bytes) -> BkStateResult<()> {
        let mut start = 0;
        while start < data.len() {
            let end = (start + UPLOAD_CHUNK_SIZE).min(data.len());
            debug!(id, start, end, "uploading chunk");
            let response = self
                .client
                .patch(self.url(&format!("caches/{id}")))
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(CONTENT_RANGE, format!("bytes {}-{}/*", start, end - 1))
                .body(data.slice(start..end))
                .send()
                .await
                .map_err(|e| BkStateError::http("uploading cache chunk", e))?;
            check_status("uploading cache chunk", response).await?;
            start = end;
        }
        Ok(())
    }

    async fn commit(&self, id: i64, size: u64) -> BkStateResult<()> {
        let response = self
            .client
            .post(self.url(&format!("caches/{id}")))
            .json(&CommitRequest { size })
            .send()
            .await
            .map_err(|e| BkStateError::http("committing cache", e))?;
        check_status("committing cache", response).await?;
        Ok(())
    }
}

/// Cache entries are only visible to lookups with the same version
fn cache_version() -> String {
    hex::encode(Sha256::digest(format!("|{VERSION_SALT}").as_bytes()))
}

async fn check_status(
    context: &str,
    response: reqwest::Response,
) -> BkStateResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BkStateError::ActionsCache {
        context: context.to_string(),
        reason: format!("{status}: {}", body.trim()),
    })
}

#[async_trait]
impl RemoteBackend for ActionsCacheBackend {
    async fn load(
        &self,
        primary: &str,
        secondary: &[String],
    ) -> BkStateResult<Option<LoadedCache>> {
        let keys = combined_keys(primary, secondary);
        let Some(entry) = self.lookup(&keys).await? else {
            return Ok(None);
        };
        let (Some(key), Some(location)) = (entry.cache_key, entry.archive_location) else {
            return Ok(None);
        };

        // The archive location is pre-signed, so no service headers go with it.
        let response = reqwest::get(&location)
            .await
            .map_err(|e| BkStateError::http("downloading cache archive", e))?;
        let response = check_status("downloading cache archive", response).await?;

        let mut extra = HashMap::new();
        if let Some(scope) = entry.scope {
            extra.insert("scope".to_string(), scope.into());
        }
        if let Some(created) = entry.creation_time {
            extra.insert("creation_time".to_string(), created.into());
        }
        if let Some(length) = response.content_length() {
            extra.insert("content_length".to_string(), length.into());
        }

        let data: ByteStream = response.bytes_stream().map_err(io::Error::other).boxed();
        Ok(Some(LoadedCache { key, data, extra }))
    }

    async fn save(&self, key: &str, data: Bytes) -> BkStateResult<()> {
        let size = data.len() as u64;
        let id = self.reserve(key, size).await?;
        self.upload(id, &data).await?;
        self.commit(id, size).await?;
        info!(key, size, "snapshot stored in actions cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> ActionsCacheBackend {
        ActionsCacheBackend::new(&ActionsCacheSettings {
            base_url: format!("{}/", server.uri()),
            token: "secret".into(),
        })
        .unwrap()
    }

    #[test]
    fn version_is_stable() {
        assert_eq!(cache_version(), cache_version());
        assert_eq!(cache_version().len(), 64);
    }

    #[tokio::test]
    async fn miss_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_apis/artifactcache/cache"))
            .and(query_param("keys", "linux-abc,linux-"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let found = backend(&server)
            .load("linux-abc", &["linux-".to_string()])
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn hit_streams_archive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_apis/artifactcache/cache"))
            .and(header("authorization", "Bearer secret"))
            .and(header("accept", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "cacheKey": "linux-old",
                "scope": "refs/heads/main",
                "archiveLocation": format!("{}/archive/123", server.uri()),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/archive/123"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"compressed".to_vec()))
            .mount(&server)
            .await;

        let cache = backend(&server)
            .load("linux-abc", &["linux-".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cache.key, "linux-old");
        assert_eq!(cache.extra["scope"], "refs/heads/main");
        let chunks: Vec<Bytes> = cache.data.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"compressed");
    }

    #[tokio::test]
    async fn lookup_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_apis/artifactcache/cache"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = backend(&server).load("k", &[]).await.unwrap_err();
        assert!(matches!(err, BkStateError::ActionsCache { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn save_reserves_uploads_and_commits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_apis/artifactcache/caches"))
            .and(body_json(json!({
                "key": "linux-abc",
                "version": cache_version(),
                "cacheSize": 8,
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "cacheId": 42 })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/_apis/artifactcache/caches/42"))
            .and(header("content-range", "bytes 0-7/*"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/_apis/artifactcache/caches/42"))
            .and(body_json(json!({ "size": 8 })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        backend(&server)
            .save("linux-abc", Bytes::from_static(b"snapshot"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reservation_conflict_fails_save() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_apis/artifactcache/caches"))
            .respond_with(ResponseTemplate::new(409).set_body_string("already exists"))
            .mount(&server)
            .await;

        let err = backend(&server)
            .save("linux-abc", Bytes::from_static(b"snapshot"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
