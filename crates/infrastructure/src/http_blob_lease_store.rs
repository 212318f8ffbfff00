use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use reqwest::header::HeaderMap;
use url::Url;

use crate::blob_lease_store::{
    BlobLeaseProperties, BlobLeaseState, BlobLeaseStatus, BlobLeaseStore, BlobStoreError,
    BlobStoreResult,
};

const STORAGE_API_VERSION: &str = "2021-08-06";
const METADATA_HEADER_PREFIX: &str = "x-ms-meta-";
const ERROR_CODE_HEADER: &str = "x-ms-error-code";
const CONTAINER_ALREADY_EXISTS: &str = "ContainerAlreadyExists";

/// Blob lease store speaking the storage REST protocol over reqwest.
///
/// Requests are authorized with a shared access signature appended to the
/// query string.
pub struct HttpBlobLeaseStore {
    http_client: reqwest::Client,
    account_url: Url,
    sas_token: Option<String>,
}

impl HttpBlobLeaseStore {
    /// Creates a store for one storage account endpoint.
    #[must_use]
    pub fn new(http_client: reqwest::Client, account_url: Url, sas_token: Option<String>) -> Self {
        let sas_token = sas_token
            .map(|token| token.trim().trim_start_matches('?').to_owned())
            .filter(|token| !token.is_empty());

        Self {
            http_client,
            account_url,
            sas_token,
        }
    }

    fn resource_url(
        &self,
        container: &str,
        blob: Option<&str>,
        query: &[(&str, &str)],
    ) -> BlobStoreResult<Url> {
        let mut url = self.account_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                BlobStoreError::transport(format!(
                    "storage account url '{}' cannot carry a path",
                    self.account_url
                ))
            })?;
            segments.pop_if_empty().push(container);
            if let Some(blob) = blob {
                segments.extend(blob.split('/'));
            }
        }

        let mut pairs = query
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>();
        if let Some(sas_token) = &self.sas_token {
            pairs.push(sas_token.clone());
        }
        if !pairs.is_empty() {
            url.set_query(Some(pairs.join("&").as_str()));
        }

        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, url)
            .header("x-ms-version", STORAGE_API_VERSION)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> BlobStoreResult<reqwest::Response> {
        let response = builder.send().await.map_err(|error| {
            BlobStoreError::transport(format!("storage transport error: {error}"))
        })?;

        if response.status().is_success() {
            return Ok(response);
        }

        Err(error_from_response(response).await)
    }
}

async fn error_from_response(response: reqwest::Response) -> BlobStoreError {
    let status = response.status();
    let code = header_value(response.headers(), ERROR_CODE_HEADER).map(str::to_owned);
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("storage request failed")
            .to_owned()
    } else {
        body
    };

    BlobStoreError {
        status: Some(status),
        code,
        message,
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn metadata_from_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(METADATA_HEADER_PREFIX)?;
            let value = value.to_str().ok()?;
            Some((key.to_owned(), value.to_owned()))
        })
        .collect()
}

#[async_trait]
impl BlobLeaseStore for HttpBlobLeaseStore {
    async fn create_container_if_missing(&self, container: &str) -> BlobStoreResult<()> {
        let url = self.resource_url(container, None, &[("restype", "container")])?;
        match self.send(self.request(reqwest::Method::PUT, url)).await {
            Ok(_) => Ok(()),
            Err(error)
                if error.status == Some(StatusCode::CONFLICT)
                    && error.code.as_deref() == Some(CONTAINER_ALREADY_EXISTS) =>
            {
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    async fn create_empty_blob(&self, container: &str, blob: &str) -> BlobStoreResult<()> {
        let url = self.resource_url(container, Some(blob), &[])?;
        self.send(
            self.request(reqwest::Method::PUT, url)
                .header("x-ms-blob-type", "BlockBlob")
                .header("If-None-Match", "*")
                .body(""),
        )
        .await?;
        Ok(())
    }

    async fn acquire_lease(
        &self,
        container: &str,
        blob: &str,
        duration: Duration,
        proposed_lease_id: &str,
    ) -> BlobStoreResult<String> {
        let url = self.resource_url(container, Some(blob), &[("comp", "lease")])?;
        let response = self
            .send(
                self.request(reqwest::Method::PUT, url)
                    .header("x-ms-lease-action", "acquire")
                    .header("x-ms-lease-duration", duration.as_secs().to_string())
                    .header("x-ms-proposed-lease-id", proposed_lease_id),
            )
            .await?;

        Ok(header_value(response.headers(), "x-ms-lease-id")
            .unwrap_or(proposed_lease_id)
            .to_owned())
    }

    async fn renew_lease(
        &self,
        container: &str,
        blob: &str,
        lease_id: &str,
    ) -> BlobStoreResult<()> {
        let url = self.resource_url(container, Some(blob), &[("comp", "lease")])?;
        self.send(
            self.request(reqwest::Method::PUT, url)
                .header("x-ms-lease-action", "renew")
                .header("x-ms-lease-id", lease_id),
        )
        .await?;
        Ok(())
    }

    async fn release_lease(
        &self,
        container: &str,
        blob: &str,
        lease_id: &str,
    ) -> BlobStoreResult<()> {
        let url = self.resource_url(container, Some(blob), &[("comp", "lease")])?;
        self.send(
            self.request(reqwest::Method::PUT, url)
                .header("x-ms-lease-action", "release")
                .header("x-ms-lease-id", lease_id),
        )
        .await?;
        Ok(())
    }

    async fn get_properties(
        &self,
        container: &str,
        blob: &str,
    ) -> BlobStoreResult<BlobLeaseProperties> {
        let url = self.resource_url(container, Some(blob), &[])?;
        let response = self.send(self.request(reqwest::Method::HEAD, url)).await?;
        let headers = response.headers();

        Ok(BlobLeaseProperties {
            lease_state: header_value(headers, "x-ms-lease-state")
                .map_or(BlobLeaseState::Available, BlobLeaseState::parse),
            lease_status: header_value(headers, "x-ms-lease-status")
                .map_or(BlobLeaseStatus::Unlocked, BlobLeaseStatus::parse),
            metadata: metadata_from_headers(headers),
        })
    }

    async fn set_metadata(
        &self,
        container: &str,
        blob: &str,
        lease_id: &str,
        metadata: &HashMap<String, String>,
    ) -> BlobStoreResult<()> {
        let url = self.resource_url(container, Some(blob), &[("comp", "metadata")])?;
        let mut builder = self
            .request(reqwest::Method::PUT, url)
            .header("x-ms-lease-id", lease_id);
        for (key, value) in metadata {
            builder = builder.header(format!("{METADATA_HEADER_PREFIX}{key}"), value.as_str());
        }

        self.send(builder).await?;
        Ok(())
    }
}
