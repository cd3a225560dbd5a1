use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, Url};
use serde::Serialize;

use crate::{
    config::WorkerSettings,
    error::SourceError,
    models::{Job, OutcomeCollection},
};

const CLAIM_PATH: &str = "api/v1/worker/claim";

/// `fetch` must be safe to call concurrently from every slot; claim atomicity is the
/// source's responsibility.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// `Ok(None)` is the normal "no work" answer, not a failure.
    async fn fetch(&self) -> Result<Option<Job>, SourceError>;

    async fn fetch_artifact(&self, location: &str) -> Result<Bytes, SourceError>;

    async fn report(&self, collection: &OutcomeCollection, job: &Job) -> Result<(), SourceError>;

    async fn report_death(&self, job: &Job, reason: &str) -> Result<(), SourceError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerIdentity {
    pub worker_id: String,
    pub capabilities: Vec<String>,
    pub hostname: String,
}

impl WorkerIdentity {
    pub fn from_settings(settings: &WorkerSettings) -> Self {
        Self {
            worker_id: settings.worker_id.clone(),
            capabilities: settings.capabilities.clone(),
            hostname: local_hostname(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeathNotice<'a> {
    test_setup_id: &'a str,
    attempt: u32,
    worker_id: &'a str,
    reason: &'a str,
}

#[derive(Clone)]
pub struct HttpJobSource {
    client: reqwest::Client,
    base_url: Url,
    identity: WorkerIdentity,
}

impl HttpJobSource {
    pub fn new(
        base_url: Url,
        identity: WorkerIdentity,
        request_timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .timeout(request_timeout)
            .user_agent(crate::collection::RUNNER_VERSION)
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            client,
            base_url: with_trailing_slash(base_url),
            identity,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        self.base_url
            .join(path)
            .map_err(|err| SourceError::InvalidLocation {
                location: path.to_string(),
                message: err.to_string(),
            })
    }

    fn submission_endpoint(&self, job: &Job, action: &str) -> Result<Url, SourceError> {
        let mut url = self.endpoint("api/v1/worker/submissions/")?;
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidLocation {
                location: self.base_url.to_string(),
                message: "base url cannot carry a path".into(),
            })?
            .pop_if_empty()
            .push(&job.submission_id)
            .push(action);
        Ok(url)
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    async fn fetch(&self) -> Result<Option<Job>, SourceError> {
        let response = self
            .client
            .post(self.endpoint(CLAIM_PATH)?)
            .json(&self.identity)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::OK => {
                let body = response.bytes().await?;
                let job = serde_json::from_slice::<Job>(&body).map_err(|err| {
                    SourceError::Malformed {
                        endpoint: "claim",
                        message: err.to_string(),
                    }
                })?;
                if job.attempt == 0 {
                    return Err(SourceError::Malformed {
                        endpoint: "claim",
                        message: "attempt numbers are 1-based".into(),
                    });
                }
                Ok(Some(job))
            }
            status => Err(SourceError::Status {
                endpoint: "claim",
                status,
            }),
        }
    }

    async fn fetch_artifact(&self, location: &str) -> Result<Bytes, SourceError> {
        let url = self.endpoint(location)?;
        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.bytes().await?),
            status => Err(SourceError::Status {
                endpoint: "artifact",
                status,
            }),
        }
    }

    async fn report(&self, collection: &OutcomeCollection, job: &Job) -> Result<(), SourceError> {
        let response = self
            .client
            .post(self.submission_endpoint(job, "results")?)
            .json(collection)
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(SourceError::Status {
                endpoint: "results",
                status,
            }),
        }
    }

    async fn report_death(&self, job: &Job, reason: &str) -> Result<(), SourceError> {
        let notice = DeathNotice {
            test_setup_id: &job.test_setup_id,
            attempt: job.attempt,
            worker_id: &self.identity.worker_id,
            reason,
        };
        let response = self
            .client
            .post(self.submission_endpoint(job, "death")?)
            .json(&notice)
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(SourceError::Status {
                endpoint: "death",
                status,
            }),
        }
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn local_hostname() -> String {
    whoami::fallible::hostname().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "could not read hostname");
        "unknown".to_string()
    })
}
