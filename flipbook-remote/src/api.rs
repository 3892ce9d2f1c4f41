use std::time::Duration;

use async_trait::async_trait;
use flipbook_core::config::ApiConfig;
use flipbook_core::{PageRecord, ProjectSnapshot, ProjectStore, RecordStore, StoreError};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::{parse_base, status_error, transport, RemoteError};

const BULK_DELETE_ROUTE: &str = "/api/images/bulk";

/// Client for the flipbook backend (`/api/images`, `/api/projects`, `/api/analytics`).
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base: Url,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteOne {
    page_index: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteMany<'a> {
    page_indexes: &'a [usize],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ViewEvent<'a> {
    share_id: &'a str,
    page_index: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Published {
    share_id: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("flipbook/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base: parse_base(base_url)?,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, RemoteError> {
        Self::new(&config.base_url, config.timeout)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request.send().await.map_err(transport)?;
        debug!(status = %response.status(), url = %response.url(), "api response");
        Ok(response)
    }
}

fn expect_success(response: &Response) -> Result<(), StoreError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(StoreError::NotFound);
    }
    if !status.is_success() {
        return Err(status_error(status));
    }
    Ok(())
}

#[async_trait]
impl RecordStore for ApiClient {
    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<PageRecord>, StoreError> {
        let url = self.endpoint(&["api", "images"]);
        let response = self.send(self.client.get(url)).await?;
        expect_success(&response)?;
        response
            .json::<Vec<PageRecord>>()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))
    }

    #[instrument(skip(self, record), fields(page_index = record.page_index))]
    async fn upsert(&self, record: &PageRecord) -> Result<(), StoreError> {
        let url = self.endpoint(&["api", "images"]);
        let response = self.send(self.client.post(url).json(record)).await?;
        expect_success(&response)
    }

    #[instrument(skip(self))]
    async fn delete(&self, page_index: usize) -> Result<(), StoreError> {
        let url = self.endpoint(&["api", "images"]);
        let body = DeleteOne { page_index };
        let response = self.send(self.client.delete(url).json(&body)).await?;
        expect_success(&response)
    }

    #[instrument(skip(self))]
    async fn delete_many(&self, page_indexes: &[usize]) -> Result<(), StoreError> {
        let url = self.endpoint(&["api", "images", "bulk"]);
        let body = DeleteMany { page_indexes };
        let response = self.send(self.client.delete(url).json(&body)).await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED => {
                Err(StoreError::EndpointMissing(BULK_DELETE_ROUTE.to_string()))
            }
            _ => expect_success(&response),
        }
    }
}

#[async_trait]
impl ProjectStore for ApiClient {
    #[instrument(skip(self))]
    async fn fetch(&self, share_id: &str) -> Result<ProjectSnapshot, StoreError> {
        let url = self.endpoint(&["api", "projects", share_id]);
        let response = self.send(self.client.get(url)).await?;
        expect_success(&response)?;
        response
            .json::<ProjectSnapshot>()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))
    }

    #[instrument(skip(self, snapshot), fields(pages = snapshot.pages.len()))]
    async fn publish(&self, snapshot: &ProjectSnapshot) -> Result<String, StoreError> {
        let url = self.endpoint(&["api", "projects"]);
        let response = self.send(self.client.post(url).json(snapshot)).await?;
        expect_success(&response)?;
        let published = response
            .json::<Published>()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))?;
        Ok(published.share_id)
    }

    async fn track_view(&self, share_id: &str, page_index: usize) -> Result<(), StoreError> {
        let url = self.endpoint(&["api", "analytics", "view"]);
        let body = ViewEvent {
            share_id,
            page_index,
        };
        let response = self.send(self.client.post(url).json(&body)).await?;
        expect_success(&response)
    }
}
