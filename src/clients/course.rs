//! Course service client, used to enrich provider line items.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub title: String,
    pub description: String,
    pub thumbnail: Option<String>,
}

#[async_trait]
pub trait CourseClient: Send + Sync {
    async fn get_courses_by_ids(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Course>>;
}

pub struct HttpCourseClient {
    client: reqwest::Client,
    base_url: String,
    deadline: Duration,
    max_retries: u32,
}

impl HttpCourseClient {
    pub fn new(base_url: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("course client init failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            deadline: Duration::from_secs(10),
            max_retries: 2,
        })
    }

    async fn fetch(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Course>> {
        let url = format!("{}/api/courses/batch", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "ids": ids }))
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("course service request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "course service returned HTTP {}",
                response.status()
            )));
        }
        response
            .json::<HashMap<Uuid, Course>>()
            .await
            .map_err(|e| AppError::Internal(format!("invalid course response: {}", e)))
    }
}

#[async_trait]
impl CourseClient for HttpCourseClient {
    async fn get_courses_by_ids(&self, ids: &[Uuid]) -> AppResult<HashMap<Uuid, Course>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match tokio::time::timeout(self.deadline, self.fetch(ids)).await {
                Ok(Ok(courses)) => return Ok(courses),
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "course lookup failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(attempt, "course lookup deadline exceeded");
                    last_error = Some(AppError::Timeout { service: "course" });
                }
            }
            if attempt < self.max_retries {
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }
        }
        Err(last_error.unwrap_or(AppError::Timeout { service: "course" }))
    }
}
