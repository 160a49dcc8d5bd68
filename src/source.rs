// 📡 Record Source - where raw batches come from
//
// The sync loop only knows `RecordSource`; `XtrackClient` is the HTTP
// implementation against the provider API.

use crate::entities::EntityKind;
use crate::normalize::RawRecord;
use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub trait RecordSource: Send + Sync + 'static {
    /// Fetch the full current batch of one entity kind.
    fn fetch(&self, kind: EntityKind) -> impl Future<Output = Result<Vec<RawRecord>>> + Send;

    /// Where this source reads from, for the info endpoint.
    fn base_url(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct XtrackClient {
    http: reqwest::Client,
    base_url: String,
}

impl XtrackClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(XtrackClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `{base}/locations` or `{base}/objects`
    pub fn endpoint(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url, kind.plural())
    }
}

impl RecordSource for XtrackClient {
    async fn fetch(&self, kind: EntityKind) -> Result<Vec<RawRecord>> {
        let url = self.endpoint(kind);
        debug!(%url, "fetching");

        let records = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?
            .error_for_status()
            .with_context(|| format!("GET {url} returned an error status"))?
            .json::<Vec<RawRecord>>()
            .await
            .with_context(|| format!("GET {url} did not return a JSON array of objects"))?;

        Ok(records)
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}
