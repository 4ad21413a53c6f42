//! REST client for the workspace backend: snapshot fetch, task CRUD,
//! combiner-backed tasks, and the persisted layout resource.

use serde::Serialize;
use thiserror::Error;

use crate::layout::LayoutDoc;
use crate::reconcile::{TaskPayload, WorkspaceSnapshot};
use crate::state::CombinerKind;

/// Cloneable so completion messages can carry it through the update loop.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("server returned status {0}")]
    Status(u16),
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        ApiError::Http(error.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewTask {
    pub from: String,
    pub to: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewCombinerTask {
    pub combiner_id: String,
    pub kind: CombinerKind,
    pub instruction: String,
    pub agent: String,
    pub input_task_ids: Vec<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    workspace: String,
}

impl ApiClient {
    pub fn new(base: &str, workspace: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            workspace: workspace.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/workspaces/{}{}", self.base, self.workspace, path)
    }

    pub async fn fetch_snapshot(&self) -> Result<WorkspaceSnapshot, ApiError> {
        let response = self.http.get(self.url("")).send().await?;
        let response = check(response)?;
        Ok(response.json().await?)
    }

    pub async fn create_task(&self, task: NewTask) -> Result<TaskPayload, ApiError> {
        let response = self
            .http
            .post(self.url("/tasks"))
            .json(&task)
            .send()
            .await?;
        let response = check(response)?;
        Ok(response.json().await?)
    }

    pub async fn delete_task(&self, id: String) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(self.url(&format!("/tasks/{id}")))
            .send()
            .await?;
        check(response)?;
        Ok(())
    }

    pub async fn assign_task(&self, id: String, agent: String) -> Result<TaskPayload, ApiError> {
        let response = self
            .http
            .post(self.url(&format!("/tasks/{id}/assign")))
            .json(&serde_json::json!({ "agent": agent }))
            .send()
            .await?;
        let response = check(response)?;
        Ok(response.json().await?)
    }

    pub async fn create_combiner_task(
        &self,
        request: NewCombinerTask,
    ) -> Result<TaskPayload, ApiError> {
        let response = self
            .http
            .post(self.url("/combiner-tasks"))
            .json(&request)
            .send()
            .await?;
        let response = check(response)?;
        Ok(response.json().await?)
    }

    /// The layout resource may not exist yet for a fresh workspace.
    pub async fn load_layout(&self) -> Result<Option<LayoutDoc>, ApiError> {
        let response = self.http.get(self.url("/layout")).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response)?;
        Ok(Some(response.json().await?))
    }

    pub async fn save_layout(&self, doc: LayoutDoc) -> Result<(), ApiError> {
        let response = self
            .http
            .put(self.url("/layout"))
            .json(&doc)
            .send()
            .await?;
        check(response)?;
        Ok(())
    }
}

fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ApiError::Status(response.status().as_u16()))
    }
}
