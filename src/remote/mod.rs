use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;

use crate::remote::model::PushResponse;

pub mod model;

/// Contract of the hosted document store: addressable by
/// `(collection, record id?)` path, with push/merge/remove/read-all
/// operations. Every method may fail on connectivity loss; a failed call
/// leaves remote state unchanged.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert a new record under `collection`; returns the assigned key.
    async fn create(&self, collection: &str, payload: &Map<String, Value>) -> Result<String>;

    /// Partial-merge update of `collection/{id}`.
    async fn update(&self, collection: &str, id: &str, payload: &Map<String, Value>) -> Result<()>;

    /// Remove `collection/{id}`.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// All records under `collection` as `(key, payload)` pairs.
    async fn read_all(&self, collection: &str) -> Result<Vec<(String, Value)>>;
}

/// REST client for a Firebase-style realtime database tree: every node is
/// addressable as `{base}/{path}.json`, with an optional `auth` query
/// parameter carrying the database secret.
#[derive(Clone)]
pub struct FirebaseClient {
    http: Client,
    base_url: Url,
    auth: Option<String>,
}

impl fmt::Debug for FirebaseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirebaseClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl FirebaseClient {
    pub fn new(base_url: &str, auth: Option<String>) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid remote base URL")?;
        let http = Client::builder()
            .user_agent("knox-pos/0.1")
            .build()
            .context("reqwest client")?;
        Ok(Self {
            http,
            base_url,
            auth,
        })
    }

    /// Build the `.json` endpoint for a node path like `supply` or
    /// `supply/-Nab12`, appending the auth parameter when configured.
    pub fn node_url(&self, path: &str) -> Result<Url> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(anyhow!("empty remote path"));
        }
        let mut url = self
            .base_url
            .join(&format!("{trimmed}.json"))
            .context("invalid remote node path")?;
        if let Some(token) = &self.auth {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }

    /// Cheap reachability check used by the connectivity probe: a shallow
    /// read of the tree root. Any well-formed HTTP response counts as
    /// reachable, including auth errors.
    pub async fn probe(&self) -> bool {
        let mut url = match self.base_url.join(".json") {
            Ok(url) => url,
            Err(_) => return false,
        };
        url.query_pairs_mut().append_pair("shallow", "true");
        if let Some(token) = &self.auth {
            url.query_pairs_mut().append_pair("auth", token);
        }
        match self.http.get(url).send().await {
            Ok(_) => true,
            Err(err) => {
                warn!(?err, "remote probe failed");
                false
            }
        }
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status == StatusCode::OK {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(anyhow!("remote store returned {status}: {body}"))
    }
}

#[async_trait]
impl RemoteStore for FirebaseClient {
    async fn create(&self, collection: &str, payload: &Map<String, Value>) -> Result<String> {
        let url = self.node_url(collection)?;
        let resp = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .context("remote create request failed")?;
        let resp = Self::check_status(resp).await?;
        let push: PushResponse = resp
            .json()
            .await
            .context("remote create returned an unreadable body")?;
        Ok(push.name)
    }

    async fn update(&self, collection: &str, id: &str, payload: &Map<String, Value>) -> Result<()> {
        let url = self.node_url(&format!("{collection}/{id}"))?;
        let resp = self
            .http
            .patch(url)
            .json(payload)
            .send()
            .await
            .context("remote update request failed")?;
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let url = self.node_url(&format!("{collection}/{id}"))?;
        let resp = self
            .http
            .delete(url)
            .send()
            .await
            .context("remote delete request failed")?;
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        let url = self.node_url(collection)?;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("remote read request failed")?;
        let resp = Self::check_status(resp).await?;
        let body: Value = resp
            .json()
            .await
            .context("remote read returned an unreadable body")?;
        // An empty collection reads back as JSON null.
        match body {
            Value::Null => Ok(Vec::new()),
            Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(anyhow!("unexpected collection shape: {other}")),
        }
    }
}
