//! HTTP implementation of the [`RestApi`] port.

use std::time::Duration;

use async_trait::async_trait;
use pearl_protocol::{
    ActiveInstances, AoiId, AoiRecord, ApiMeta, CheckpointId, CheckpointRecord, InstanceId,
    InstanceRecord, ModelId, ModelRecord, NewInstance, NewProject, Project, ProjectId, RestApi,
    RestError,
};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;

#[derive(Debug, Clone)]
pub struct RestClientConfig {
    pub base_url: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    pub timeout: Duration,
    pub request_attempts: usize,
}

impl RestClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn request_attempts(mut self, attempts: usize) -> Self {
        self.request_attempts = attempts;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpRestClient {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
}

/// Envelope of `GET /api/project/{id}/aoi`.
#[derive(Debug, Deserialize)]
struct AoiList {
    #[serde(default)]
    aois: Vec<AoiRecord>,
}

impl HttpRestClient {
    pub fn new(config: RestClientConfig) -> Result<Self, RestError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            token: config.token.filter(|token| !token.trim().is_empty()),
            timeout: config.timeout.max(Duration::from_millis(250)),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub fn meta_path() -> &'static str {
        "/api"
    }

    pub fn active_instances_path(project_id: ProjectId) -> String {
        format!("/api/project/{project_id}/instance/?status=active")
    }

    pub fn instances_path(project_id: ProjectId) -> String {
        format!("/api/project/{project_id}/instance")
    }

    pub fn instance_path(project_id: ProjectId, instance_id: InstanceId) -> String {
        format!("/api/project/{project_id}/instance/{instance_id}")
    }

    pub fn model_path(model_id: ModelId) -> String {
        format!("/api/model/{model_id}")
    }

    pub fn projects_path() -> &'static str {
        "/api/project"
    }

    pub fn checkpoint_path(project_id: ProjectId, checkpoint_id: CheckpointId) -> String {
        format!("/api/project/{project_id}/checkpoint/{checkpoint_id}")
    }

    pub fn aois_path(project_id: ProjectId) -> String {
        format!("/api/project/{project_id}/aoi")
    }

    pub fn aoi_path(project_id: ProjectId, aoi_id: AoiId) -> String {
        format!("/api/project/{project_id}/aoi/{aoi_id}")
    }

    pub async fn get_json<T>(&self, path: &str) -> Result<T, RestError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self.send(Method::GET, path, None::<&()>).await?;
        decode_json_response(response).await
    }

    pub async fn post_json<Req, Res>(&self, path: &str, payload: &Req) -> Result<Res, RestError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> Deserialize<'de>,
    {
        let response = self.send(Method::POST, path, Some(payload)).await?;
        decode_json_response(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), RestError> {
        let response = self.send(Method::DELETE, path, None::<&()>).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(format_http_error(status, &body))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self
            .http
            .request(method, url)
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<Req>(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Req>,
    ) -> Result<reqwest::Response, RestError>
    where
        Req: Serialize + ?Sized,
    {
        let url = self.endpoint(path);
        let mut last_error: Option<String> = None;

        for attempt in 0..self.request_attempts {
            let mut request = self.request(method.clone(), &url);
            if let Some(payload) = payload {
                request = request.json(payload);
            }
            debug!(%method, %url, attempt, "rest request");

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    warn!(%method, %url, attempt, %error, "rest request failed");
                    last_error = Some(error.to_string());
                    if attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }

        Err(RestError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_owned()),
        })
    }
}

#[async_trait]
impl RestApi for HttpRestClient {
    async fn get_api_meta(&self) -> Result<ApiMeta, RestError> {
        self.get_json(Self::meta_path()).await
    }

    async fn get_active_instances(
        &self,
        project_id: ProjectId,
    ) -> Result<ActiveInstances, RestError> {
        self.get_json(&Self::active_instances_path(project_id)).await
    }

    async fn get_instance(
        &self,
        project_id: ProjectId,
        instance_id: InstanceId,
    ) -> Result<InstanceRecord, RestError> {
        self.get_json(&Self::instance_path(project_id, instance_id))
            .await
    }

    async fn create_instance(
        &self,
        project_id: ProjectId,
        request: NewInstance,
    ) -> Result<InstanceRecord, RestError> {
        self.post_json(&Self::instances_path(project_id), &request)
            .await
    }

    async fn get_model(&self, model_id: ModelId) -> Result<ModelRecord, RestError> {
        self.get_json(&Self::model_path(model_id)).await
    }

    async fn create_project(&self, request: NewProject) -> Result<Project, RestError> {
        self.post_json(Self::projects_path(), &request).await
    }

    async fn get_checkpoint(
        &self,
        project_id: ProjectId,
        checkpoint_id: CheckpointId,
    ) -> Result<CheckpointRecord, RestError> {
        self.get_json(&Self::checkpoint_path(project_id, checkpoint_id))
            .await
    }

    async fn get_aois(&self, project_id: ProjectId) -> Result<Vec<AoiRecord>, RestError> {
        let list: AoiList = self.get_json(&Self::aois_path(project_id)).await?;
        Ok(list.aois)
    }

    async fn delete_aoi(&self, project_id: ProjectId, aoi_id: AoiId) -> Result<(), RestError> {
        self.delete(&Self::aoi_path(project_id, aoi_id)).await
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> RestError {
    let body = String::from_utf8_lossy(body).trim().to_owned();
    RestError::Http {
        status: status.as_u16(),
        body: if body.is_empty() {
            "<empty>".to_owned()
        } else {
            body
        },
    }
}

fn normalize_base_url(base_url: &str) -> Result<String, RestError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(RestError::Request {
            message: "api base url is missing".to_owned(),
        });
    }
    Ok(trimmed.trim_end_matches('/').to_owned())
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, RestError>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();
    let bytes = response.bytes().await.map_err(|error| RestError::Request {
        message: error.to_string(),
    })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| RestError::Decode {
        message: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_joins_base_and_path() {
        let client =
            HttpRestClient::new(RestClientConfig::new("https://api.pearl.example/")).unwrap();
        assert_eq!(
            client.endpoint("/api/model/1"),
            "https://api.pearl.example/api/model/1"
        );
        assert_eq!(client.endpoint("api"), "https://api.pearl.example/api");
    }

    #[test]
    fn paths_follow_api_layout() {
        let project = ProjectId::new(1);
        assert_eq!(
            HttpRestClient::active_instances_path(project),
            "/api/project/1/instance/?status=active"
        );
        assert_eq!(
            HttpRestClient::instance_path(project, InstanceId::new(3)),
            "/api/project/1/instance/3"
        );
        assert_eq!(
            HttpRestClient::checkpoint_path(project, CheckpointId::new(9)),
            "/api/project/1/checkpoint/9"
        );
        assert_eq!(
            HttpRestClient::aoi_path(project, AoiId::new(2)),
            "/api/project/1/aoi/2"
        );
        assert_eq!(HttpRestClient::model_path(ModelId::new(4)), "/api/model/4");
    }

    #[test]
    fn blank_base_url_is_rejected() {
        assert!(matches!(
            HttpRestClient::new(RestClientConfig::new("  ")),
            Err(RestError::Request { .. })
        ));
    }

    #[test]
    fn blank_token_is_dropped() {
        let client =
            HttpRestClient::new(RestClientConfig::new("http://localhost:2000").token(" ")).unwrap();
        assert!(client.token.is_none());
    }

    #[test]
    fn http_errors_keep_status_and_body() {
        let error = format_http_error(StatusCode::NOT_FOUND, b" no such project ");
        assert_eq!(error.to_string(), "http 404: no such project");
        let empty = format_http_error(StatusCode::BAD_GATEWAY, b"");
        assert_eq!(empty.to_string(), "http 502: <empty>");
    }

    #[test]
    fn aoi_list_envelope_decodes() {
        let list: AoiList = serde_json::from_value(json!({
            "total": 1,
            "project_id": 1,
            "aois": [{
                "id": 1,
                "name": "A name",
                "created": "2021-03-18T18:42:42.224Z",
                "storage": true
            }]
        }))
        .unwrap();
        assert_eq!(list.aois.len(), 1);
        assert_eq!(list.aois[0].name, "A name");
    }

    #[tokio::test]
    async fn unreachable_server_reports_request_error() {
        let client = HttpRestClient::new(
            RestClientConfig::new("http://127.0.0.1:9")
                .timeout(Duration::from_millis(500))
                .request_attempts(1),
        )
        .unwrap();
        let result = client.get_api_meta().await;
        assert!(matches!(result, Err(RestError::Request { .. })));
    }
}
