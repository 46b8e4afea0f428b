//! Minimal Apify actor client: start a run, long-poll it, read its dataset.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

const BASE_URL: &str = "https://api.apify.com/v2";
pub const ENV_APIFY_TOKEN: &str = "APIFY_TOKEN";

/// apify/instagram-post-scraper
pub const INSTAGRAM_POST_SCRAPER: &str = "nH2AHrwxeTRJoN5hX";
/// apidojo/tweet-scraper
pub const TWEET_SCRAPER: &str = "61RPP7dywgiy0JPD0";

#[derive(Debug, Clone, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub id: String,
    pub status: String,
    #[serde(rename = "defaultDatasetId")]
    pub default_dataset_id: String,
}

#[derive(Clone)]
pub struct ApifyClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl ApifyClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: BASE_URL.to_string(),
        }
    }

    /// `None` when `APIFY_TOKEN` is unset or blank.
    pub fn from_env() -> Option<Self> {
        std::env::var(ENV_APIFY_TOKEN)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(Self::new)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn check<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, FetchError> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(FetchError::Api {
                status: status.as_u16(),
                message,
            });
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Start an actor run. Returns immediately with run metadata.
    pub async fn start_run<I: Serialize + ?Sized>(
        &self,
        actor: &str,
        input: &I,
    ) -> Result<RunData, FetchError> {
        let url = format!("{}/acts/{}/runs", self.base_url, actor);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(input)
            .send()
            .await?;
        let api: ApiResponse<RunData> = Self::check(resp).await?;
        Ok(api.data)
    }

    /// Poll until a run completes, with `waitForFinish=60` long-polling.
    /// Unbounded on its own; callers wrap it in the fetch timeout.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<RunData, FetchError> {
        loop {
            let url = format!("{}/actor-runs/{}?waitForFinish=60", self.base_url, run_id);
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .send()
                .await?;
            let api: ApiResponse<RunData> = Self::check(resp).await?;
            match api.data.status.as_str() {
                "SUCCEEDED" => return Ok(api.data),
                "FAILED" | "ABORTED" | "TIMED-OUT" => {
                    return Err(FetchError::RunFailed(api.data.status));
                }
                _ => {
                    tracing::debug!(run_id, status = %api.data.status, "apify run still in progress");
                }
            }
        }
    }

    /// Ask Apify to stop a run. Terminal runs answer with an error, which
    /// callers may ignore.
    pub async fn abort_run(&self, run_id: &str) -> Result<RunData, FetchError> {
        let url = format!("{}/actor-runs/{}/abort", self.base_url, run_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let api: ApiResponse<RunData> = Self::check(resp).await?;
        Ok(api.data)
    }

    pub async fn get_dataset_items<T: DeserializeOwned>(
        &self,
        dataset_id: &str,
    ) -> Result<Vec<T>, FetchError> {
        let url = format!("{}/datasets/{}/items?format=json", self.base_url, dataset_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(resp).await
    }

    /// Start, wait, read: the whole scrape in one call.
    ///
    /// If the returned future is dropped (the caller's timeout fired) or the
    /// wait fails before the run finished, the remote run is aborted.
    pub async fn run_actor<I, T>(&self, actor: &str, input: &I) -> Result<Vec<T>, FetchError>
    where
        I: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let run = self.start_run(actor, input).await?;
        tracing::debug!(actor, run_id = %run.id, "apify run started");
        let pending = AbortOnDrop::new(self.clone(), run.id.clone());
        let done = match self.wait_for_run(&run.id).await {
            Ok(done) => done,
            Err(e @ FetchError::RunFailed(_)) => {
                pending.disarm();
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        pending.disarm();
        let items: Vec<T> = self.get_dataset_items(&done.default_dataset_id).await?;
        tracing::debug!(actor, run_id = %done.id, count = items.len(), "apify dataset read");
        Ok(items)
    }
}

/// Aborts a started run when dropped while still armed.
struct AbortOnDrop {
    client: Option<ApifyClient>,
    run_id: String,
}

impl AbortOnDrop {
    fn new(client: ApifyClient, run_id: String) -> Self {
        Self {
            client: Some(client),
            run_id,
        }
    }

    fn disarm(mut self) {
        self.client = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(run_id = %self.run_id, "no runtime to abort apify run");
            return;
        };
        let run_id = std::mem::take(&mut self.run_id);
        rt.spawn(async move {
            match client.abort_run(&run_id).await {
                Ok(run) => tracing::info!(run_id = %run_id, status = %run.status, "apify run aborted"),
                Err(e) => tracing::warn!(run_id = %run_id, error = %e, "apify run abort failed"),
            }
        });
    }
}
