use async_trait::async_trait;
use edumart_core::retry::{with_retry, RetryConfig};
use edumart_core::{CoreError, CoreResult};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::course::CourseSnapshot;

/// Read-only view of the course catalog owned by another service.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// `Ok(None)` when the course does not exist (or was hard-deleted).
    async fn get_course(&self, course_id: Uuid) -> CoreResult<Option<CourseSnapshot>>;
}

/// Catalog backed by a map. Used for tests and local runs without the catalog service.
#[derive(Default)]
pub struct InMemoryCatalog {
    courses: RwLock<HashMap<Uuid, CourseSnapshot>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, course: CourseSnapshot) {
        self.courses.write().await.insert(course.id, course);
    }
}

#[async_trait]
impl CatalogClient for InMemoryCatalog {
    async fn get_course(&self, course_id: Uuid) -> CoreResult<Option<CourseSnapshot>> {
        Ok(self.courses.read().await.get(&course_id).cloned())
    }
}

/// `GET {base_url}/api/courses/{id}/purchase-info` on the catalog service.
pub struct HttpCatalogClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpCatalogClient {
    pub fn new(base_url: &str, timeout: Duration) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::InternalError(format!("Failed to build catalog client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch(&self, course_id: Uuid) -> CoreResult<Option<CourseSnapshot>> {
        let url = format!("{}/api/courses/{}/purchase-info", self.base_url, course_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::UpstreamUnavailable(format!("catalog: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<CourseSnapshot>()
                .await
                .map(Some)
                .map_err(|e| CoreError::InternalError(format!("Malformed catalog response: {}", e))),
            status if status.is_server_error() => {
                Err(CoreError::UpstreamUnavailable(format!("catalog returned {}", status)))
            }
            status => {
                warn!("Catalog rejected lookup of course {}: {}", course_id, status);
                Err(CoreError::InternalError(format!("catalog returned {}", status)))
            }
        }
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn get_course(&self, course_id: Uuid) -> CoreResult<Option<CourseSnapshot>> {
        with_retry(&self.retry, "catalog lookup", move || self.fetch(course_id)).await
    }
}
