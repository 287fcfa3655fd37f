//! S3 (and S3-compatible) snapshot storage
//!
//! Objects are stored at `v1/<prefix>/<key>`. Resolution lists every
//! requested key prefix concurrently and applies the shared matching rule.

use crate::driver::ByteStream;
use crate::error::{BkStateError, BkStateResult};
use crate::remote::matcher::{resolve_concurrently, Candidate, PrefixLister};
use crate::remote::{combined_keys, LoadedCache, RemoteBackend, NAMESPACE_VERSION};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Connection settings for the object store
#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    pub bucket: String,
    pub key_prefix: String,
    /// Custom endpoint; implies path-style addressing
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
}

/// Snapshot storage in an S3 bucket
pub struct S3Backend {
    client: Client,
    bucket: String,
    key_prefix: String,
}

impl S3Backend {
    /// Build a client from the ambient AWS configuration
    pub async fn from_settings(settings: &S3Settings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut config = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(url) = &settings.endpoint_url {
            config = config.endpoint_url(url).force_path_style(true);
        }

        Self::new(
            Client::from_conf(config.build()),
            settings.bucket.clone(),
            settings.key_prefix.clone(),
        )
    }

    pub fn new(client: Client, bucket: String, key_prefix: String) -> Self {
        Self {
            client,
            bucket,
            key_prefix,
        }
    }

    /// `v1/<prefix>/`, always ending in a slash
    fn namespace(&self) -> String {
        format!("{}/", join_key(&[NAMESPACE_VERSION, &self.key_prefix]))
    }

    /// Full object key for a caller key.
    ///
    /// The caller key is appended verbatim so a trailing `/` keeps its
    /// meaning as a prefix boundary.
    pub fn object_key(&self, key: &str) -> String {
        format!("{}{key}", self.namespace())
    }

    /// Caller key for a full object key
    fn caller_key(&self, object_key: &str) -> String {
        object_key
            .strip_prefix(&self.namespace())
            .unwrap_or(object_key)
            .to_string()
    }
}

/// Join namespace segments with `/`, dropping empty ones
fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn to_chrono(time: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.secs(), time.subsec_nanos())
}

struct ObjectLister {
    client: Client,
    bucket: String,
}

#[async_trait]
impl PrefixLister for ObjectLister {
    type Item = ();

    async fn list_pages(
        &self,
        prefix: String,
        pages: mpsc::Sender<Vec<Candidate<()>>>,
    ) -> BkStateResult<()> {
        let mut paginator = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&prefix)
            .into_paginator()
            .send();

        while let Some(page) = paginator.next().await {
            let page = page.map_err(|e| {
                BkStateError::s3(format!("listing s3://{}/{}", self.bucket, prefix), DisplayErrorContext(&e))
            })?;
            let batch: Vec<Candidate<()>> = page
                .contents()
                .iter()
                .filter_map(|object| {
                    Some(Candidate {
                        name: object.key()?.to_string(),
                        modified: object.last_modified().and_then(to_chrono),
                        item: (),
                    })
                })
                .collect();
            debug!(prefix = %prefix, objects = batch.len(), "listed page");
            if pages.send(batch).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for S3Backend {
    async fn load(
        &self,
        primary: &str,
        secondary: &[String],
    ) -> BkStateResult<Option<LoadedCache>> {
        let keys: Vec<String> = combined_keys(primary, secondary)
            .iter()
            .map(|k| self.object_key(k))
            .collect();
        let lister = Arc::new(ObjectLister {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
        });

        let Some(found) = resolve_concurrently(lister, keys).await? else {
            return Ok(None);
        };

        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&found.name)
            .send()
            .await
            .map_err(|e| {
                BkStateError::s3(format!("downloading s3://{}/{}", self.bucket, found.name), DisplayErrorContext(&e))
            })?;

        let mut extra = HashMap::new();
        extra.insert("object_key".to_string(), found.name.clone().into());
        if let Some(length) = object.content_length() {
            extra.insert("content_length".to_string(), length.into());
        }
        if let Some(etag) = object.e_tag() {
            extra.insert("etag".to_string(), etag.into());
        }

        let data: ByteStream = stream::unfold(object.body, |mut body| async move {
            match body.next().await {
                Some(Ok(chunk)) => Some((Ok(chunk), body)),
                Some(Err(e)) => Some((Err(io::Error::other(e)), body)),
                None => None,
            }
        })
        .boxed();

        Ok(Some(LoadedCache {
            key: self.caller_key(&found.name),
            data,
            extra,
        }))
    }

    async fn save(&self, key: &str, data: Bytes) -> BkStateResult<()> {
        let object_key = self.object_key(key);
        let size = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(data.into())
            .send()
            .await
            .map_err(|e| {
                BkStateError::s3(format!("uploading s3://{}/{}", self.bucket, object_key), DisplayErrorContext(&e))
            })?;
        info!(bucket = %self.bucket, key = %object_key, size, "snapshot uploaded");
        Ok(())
    }
}
