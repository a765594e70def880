//! HTTP implementation of the task service client.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::error::{classify_http_status, ServiceError, ServiceErrorKind};
use super::TaskService;
use crate::task::{RemoteId, RemoteTask, TaskFields, TaskListId};

/// Client for a Google-Tasks-style REST surface, authenticated with a
/// bearer token.
pub struct HttpTaskService {
    client: Client,
    base: Url,
    token: String,
}

/// Response envelope of the list endpoint.
#[derive(Debug, Deserialize)]
struct TaskPage {
    #[serde(default)]
    items: Vec<RemoteTask>,
}

impl HttpTaskService {
    /// Create a new client against `base` (the API root, ending in a
    /// slash).
    pub fn new(base: Url, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base,
            token: token.into(),
        }
    }

    fn tasks_url(&self, list: &TaskListId) -> Result<Url, ServiceError> {
        self.base
            .join(&format!("lists/{}/tasks", list))
            .map_err(|e| ServiceError::parse_error(format!("Invalid endpoint: {}", e)))
    }

    fn task_url(&self, list: &TaskListId, task: &RemoteId) -> Result<Url, ServiceError> {
        self.base
            .join(&format!("lists/{}/tasks/{}", list, task))
            .map_err(|e| ServiceError::parse_error(format!("Invalid endpoint: {}", e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Content-Type", "application/json")
    }

    /// Parse Retry-After header if present.
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok().map(Duration::from_secs))
    }

    /// Create a ServiceError from HTTP response status and body.
    fn create_error(
        status: reqwest::StatusCode,
        body: &str,
        retry_after: Option<Duration>,
    ) -> ServiceError {
        let status_code = status.as_u16();
        match classify_http_status(status_code) {
            ServiceErrorKind::RateLimited => {
                ServiceError::rate_limited(body.to_string(), retry_after)
            }
            ServiceErrorKind::ServerError => {
                ServiceError::server_error(status_code, body.to_string())
            }
            ServiceErrorKind::ClientError => {
                ServiceError::client_error(status_code, body.to_string())
            }
            _ => ServiceError::server_error(status_code, body.to_string()),
        }
    }

    /// Send a request and return the raw successful response body.
    async fn execute(&self, request: RequestBuilder) -> Result<String, ServiceError> {
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                if e.is_timeout() {
                    return Err(ServiceError::network_error(format!(
                        "Request timeout: {}",
                        e
                    )));
                } else if e.is_connect() {
                    return Err(ServiceError::network_error(format!(
                        "Connection failed: {}",
                        e
                    )));
                } else {
                    return Err(ServiceError::network_error(format!("Request failed: {}", e)));
                }
            }
        };

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Self::create_error(status, &body, retry_after));
        }

        Ok(body)
    }

    /// Send a request and decode the successful response body as `T`.
    async fn execute_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ServiceError> {
        let body = self.execute(request).await?;
        serde_json::from_str(&body).map_err(|e| {
            ServiceError::parse_error(format!("Failed to parse response: {}, body: {}", e, body))
        })
    }
}

#[async_trait]
impl TaskService for HttpTaskService {
    async fn insert(
        &self,
        list: &TaskListId,
        previous: Option<&RemoteId>,
    ) -> Result<RemoteTask, ServiceError> {
        let mut url = self.tasks_url(list)?;
        if let Some(previous) = previous {
            url.query_pairs_mut().append_pair("previous", previous.as_str());
        }
        let request = self
            .request(Method::POST, url)
            .json(&serde_json::json!({}));
        self.execute_json(request).await
    }

    async fn patch(
        &self,
        list: &TaskListId,
        task: &RemoteId,
        fields: &TaskFields,
    ) -> Result<RemoteTask, ServiceError> {
        let url = self.task_url(list, task)?;
        let request = self.request(Method::PATCH, url).json(fields);
        self.execute_json(request).await
    }

    async fn delete(&self, list: &TaskListId, task: &RemoteId) -> Result<(), ServiceError> {
        let url = self.task_url(list, task)?;
        self.execute(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn move_task(
        &self,
        list: &TaskListId,
        task: &RemoteId,
        previous: Option<&RemoteId>,
    ) -> Result<RemoteTask, ServiceError> {
        let mut url = self.task_url(list, task)?;
        url.path_segments_mut()
            .map_err(|_| ServiceError::parse_error("Base URL cannot be a base".to_string()))?
            .push("move");
        if let Some(previous) = previous {
            url.query_pairs_mut().append_pair("previous", previous.as_str());
        }
        self.execute_json(self.request(Method::POST, url)).await
    }

    async fn list(&self, list: &TaskListId) -> Result<Vec<RemoteTask>, ServiceError> {
        let url = self.tasks_url(list)?;
        let page: TaskPage = self.execute_json(self.request(Method::GET, url)).await?;
        Ok(page.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_envelope_parses_with_and_without_items() {
        let page: TaskPage =
            serde_json::from_str(r#"{"items": [{"id": "a", "title": "milk"}]}"#).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id.as_str(), "a");

        let empty: TaskPage = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty());
    }

    #[test]
    fn endpoints_nest_under_the_base_url() {
        let service = HttpTaskService::new(
            Url::parse("https://tasks.example.com/v1/").unwrap(),
            "token",
        );
        let list = TaskListId::new("inbox");
        let url = service.tasks_url(&list).unwrap();
        assert_eq!(url.as_str(), "https://tasks.example.com/v1/lists/inbox/tasks");

        let task = service
            .task_url(&list, &RemoteId::new("t42"))
            .unwrap();
        assert_eq!(
            task.as_str(),
            "https://tasks.example.com/v1/lists/inbox/tasks/t42"
        );
    }

    #[test]
    fn patch_body_carries_only_changed_fields() {
        let fields = TaskFields::title("renamed");
        let body = serde_json::to_value(&fields).unwrap();
        assert_eq!(body, serde_json::json!({"title": "renamed"}));
    }
}
