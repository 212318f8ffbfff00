use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use http::StatusCode;
use primacy_application::{DistributedLockManager, LockAcquisition};
use primacy_core::{AppError, AppResult, NonEmptyString};
use primacy_domain::{LockHandle, LockHandleInput, LockResourceName, LockTarget, validate_owner};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::{Url, form_urlencoded};

use crate::retry::{RetryPolicy, cancelled};

const DEFAULT_RENEW_DEADLINE: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for [`SidecarLockManager`].
///
/// Requests go to `{endpoint}/{namespace}/lock/acquire`, `.../lock/release`
/// and `.../lock`, with the lock id sent unchanged as the `name` query value.
/// The namespace segment is the normalised [`LockResourceName`] segment, so
/// equal lock ids in different namespaces never share sidecar state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarConfig {
    /// Base URL of the lock sidecar.
    pub endpoint: Url,
    /// Owner used when callers pass an empty owner.
    pub instance_id: Option<String>,
    /// Renew deadline forwarded to the sidecar.
    pub renew_deadline: Duration,
    /// Timeout applied to each HTTP request.
    pub request_timeout: Duration,
    /// Retry settings for 5xx responses and connection failures.
    pub retry: RetryPolicy,
}

impl SidecarConfig {
    /// Creates a configuration with default timings for one endpoint.
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            instance_id: None,
            renew_deadline: DEFAULT_RENEW_DEADLINE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SidecarLockBody {
    #[serde(default)]
    lock_id: Option<String>,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    lock_period: Option<u64>,
}

#[derive(Debug)]
struct SidecarResponse {
    status: StatusCode,
    body: String,
}

impl SidecarResponse {
    fn parse_lock(&self, operation: &str) -> AppResult<SidecarLockBody> {
        serde_json::from_str(self.body.as_str()).map_err(|error| {
            AppError::Transport(format!(
                "{operation} returned an unreadable lock body: {error}"
            ))
        })
    }
}

/// Joins an endpoint with a path-and-query fragment using exactly one slash.
pub fn request_uri(endpoint: &Url, fragment: &str) -> AppResult<Url> {
    let base = endpoint.as_str().trim_end_matches('/');
    let fragment = fragment.trim_start_matches('/');
    let joined = if fragment.is_empty() {
        base.to_owned()
    } else {
        format!("{base}/{fragment}")
    };

    Url::parse(joined.as_str()).map_err(|error| {
        AppError::Validation(format!("invalid lock sidecar uri '{joined}': {error}"))
    })
}

fn encode_query(pairs: &[(&str, &str)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

fn whole_seconds(duration: Duration) -> u64 {
    duration.as_secs().max(1)
}

/// Lock manager delegating lock state to an HTTP sidecar.
///
/// Used on container platforms where a leader-election sidecar runs next to
/// each host.
pub struct SidecarLockManager {
    http_client: reqwest::Client,
    config: SidecarConfig,
}

impl SidecarLockManager {
    /// Creates a sidecar lock manager.
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: SidecarConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    fn resolve_owner(&self, owner: &str) -> AppResult<NonEmptyString> {
        if !owner.trim().is_empty() {
            return validate_owner(owner);
        }

        validate_owner(self.config.instance_id.as_deref().unwrap_or_default())
    }

    fn lock_uri(
        &self,
        target: &LockTarget,
        operation: &str,
        extra: &[(&str, &str)],
    ) -> AppResult<Url> {
        let resource = LockResourceName::new(target);
        let mut pairs = vec![("name", target.lock_id())];
        pairs.extend_from_slice(extra);
        let query = encode_query(&pairs);
        request_uri(
            &self.config.endpoint,
            format!("{}/{operation}?{query}", resource.namespace_segment()).as_str(),
        )
    }

    fn acquire_uri(
        &self,
        target: &LockTarget,
        owner: &str,
        lease_period: Duration,
    ) -> AppResult<Url> {
        let duration = whole_seconds(lease_period).to_string();
        let renew_deadline = whole_seconds(self.config.renew_deadline).to_string();
        self.lock_uri(
            target,
            "lock/acquire",
            &[
                ("owner", owner),
                ("duration", duration.as_str()),
                ("renewDeadline", renew_deadline.as_str()),
            ],
        )
    }

    async fn send_with_retry<F>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut build: F,
    ) -> AppResult<SidecarResponse>
    where
        F: FnMut(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let max_attempts = self.config.retry.max_attempts();
        let mut attempt = 0_u8;
        let mut last_response: Option<SidecarResponse> = None;
        let mut last_error: Option<String> = None;

        while attempt < max_attempts {
            attempt = attempt.saturating_add(1);
            let request = build(&self.http_client)
                .timeout(self.config.request_timeout)
                .send();
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(operation)),
                response = request => response,
            };

            match response {
                Ok(response)
                    if response.status().is_server_error()
                        || response.status() == StatusCode::TOO_MANY_REQUESTS =>
                {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    last_response = Some(SidecarResponse { status, body });
                    last_error = None;
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<response body unavailable>".to_owned());
                    return Ok(SidecarResponse { status, body });
                }
                Err(error) => {
                    last_error = Some(format!("{operation} transport error: {error}"));
                }
            }

            if attempt < max_attempts {
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    "lock sidecar request failed; retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(cancelled(operation)),
                    _ = tokio::time::sleep(self.config.retry.delay()) => {}
                }
            }
        }

        match (last_error, last_response) {
            (Some(error), _) => Err(AppError::Transient(error)),
            (None, Some(response)) => Ok(response),
            (None, None) => Err(AppError::Transient(format!(
                "{operation} made no attempts"
            ))),
        }
    }

    /// Asks the sidecar to grant or extend the lock for `owner`.
    async fn acquire(
        &self,
        target: &LockTarget,
        owner: &str,
        lease_period: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<SidecarResponse> {
        let uri = self.acquire_uri(target, owner, lease_period)?;
        self.send_with_retry("acquire sidecar lock", cancel, |client| {
            client.post(uri.clone())
        })
        .await
    }
}

#[async_trait]
impl DistributedLockManager for SidecarLockManager {
    async fn try_lock(
        &self,
        namespace: &str,
        lock_id: &str,
        owner: &str,
        proposed_lease_period: Duration,
        cancel: &CancellationToken,
    ) -> AppResult<LockAcquisition> {
        let target = LockTarget::new(namespace, lock_id)?;
        let owner = self.resolve_owner(owner)?;
        if proposed_lease_period.is_zero() {
            return Err(AppError::Validation(
                "proposed lease period must be greater than zero".to_owned(),
            ));
        }

        let response = self
            .acquire(&target, owner.as_str(), proposed_lease_period, cancel)
            .await?;
        if response.status != StatusCode::OK {
            debug!(
                lock_id = %lock_id,
                owner = %owner,
                status = response.status.as_u16(),
                "lock sidecar did not grant the lock"
            );
            return Ok(LockAcquisition::Conflict);
        }

        let body = response.parse_lock("acquire sidecar lock")?;
        let holder = body
            .owner
            .filter(|holder| !holder.is_empty())
            .unwrap_or_else(|| owner.to_string());
        if holder != owner.as_str() {
            debug!(
                lock_id = %lock_id,
                owner = %owner,
                holder = %holder,
                lock = ?body.lock_id,
                "lock sidecar reports another holder"
            );
            return Ok(LockAcquisition::Conflict);
        }

        let lease_period = body
            .lock_period
            .filter(|seconds| *seconds > 0)
            .map_or(proposed_lease_period, Duration::from_secs);
        let handle = LockHandle::new(LockHandleInput {
            target,
            owner: holder.clone(),
            lease_period,
            token: holder,
            acquired_at: Utc::now(),
        })?;
        Ok(LockAcquisition::Acquired(handle))
    }

    async fn renew(&self, handle: &LockHandle, cancel: &CancellationToken) -> AppResult<bool> {
        let response = self
            .acquire(handle.target(), handle.owner(), handle.lease_period(), cancel)
            .await?;

        if response.status.is_server_error() || response.status == StatusCode::TOO_MANY_REQUESTS
        {
            return Err(AppError::Transient(format!(
                "lock sidecar renewal failed with status {}",
                response.status
            )));
        }
        if response.status != StatusCode::OK {
            return Ok(false);
        }

        let body = response.parse_lock("renew sidecar lock")?;
        Ok(body
            .owner
            .is_none_or(|holder| holder.is_empty() || holder == handle.owner()))
    }

    async fn release(&self, handle: &LockHandle, cancel: &CancellationToken) -> AppResult<()> {
        let uri = self.lock_uri(
            handle.target(),
            "lock/release",
            &[("owner", handle.owner())],
        )?;

        let response = self
            .send_with_retry("release sidecar lock", cancel, |client| {
                client.post(uri.clone())
            })
            .await?;

        match response.status {
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            status => Err(AppError::Transport(format!(
                "lock sidecar release failed with status {status}: {}",
                response.body
            ))),
        }
    }

    async fn get_owner(
        &self,
        namespace: &str,
        lock_id: &str,
        cancel: &CancellationToken,
    ) -> AppResult<Option<String>> {
        let target = LockTarget::new(namespace, lock_id)?;
        let uri = self.lock_uri(&target, "lock", &[])?;

        let response = self
            .send_with_retry("read sidecar lock owner", cancel, |client| {
                client.get(uri.clone())
            })
            .await?;
        if response.status != StatusCode::OK {
            return Err(AppError::Transport(format!(
                "lock sidecar owner lookup failed with status {}: {}",
                response.status, response.body
            )));
        }

        let body = response.parse_lock("read sidecar lock owner")?;
        Ok(body.owner.filter(|owner| !owner.is_empty()))
    }
}

#[cfg(test)]
mod tests;
