use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use validator::Validate;

use crate::{
    dto::{
        auth::{
            Admission, RegisterRequest, RegisterResponse, ValidateTokenRequest,
            ValidateTokenResponse,
        },
        gameplay::{
            ActivityRequest, AnswerResponse, CodeResponse, LevelContent, SubmitAnswerRequest,
            SubmitCodeRequest,
        },
        status::StatusResponse,
    },
    services::api::{ApiError, ApiResult, ServerApi},
};

const REGISTER_PATH: &str = "/api/player/register";
const VALIDATE_PATH: &str = "/api/validate-token";
const STATUS_PATH: &str = "/api/game_status";
const SUBMIT_ANSWER_PATH: &str = "/api/submit_answer";
const SUBMIT_CODE_PATH: &str = "/api/submit_code";
const HEARTBEAT_PATH: &str = "/api/player/heartbeat";
const ACTIVITY_PATH: &str = "/api/player/activity";

/// [`ServerApi`] over HTTP with JSON bodies.
#[derive(Clone)]
pub struct HttpServerApi {
    client: Client,
    base_url: Arc<str>,
}

impl HttpServerApi {
    /// Build a client for the server rooted at `base_url`.
    pub fn new(base_url: &str, request_timeout: Duration) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|source| ApiError::transport("failed to build http client", source))?;
        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, path: &str, builder: RequestBuilder) -> ApiResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|source| ApiError::transport(format!("request to `{path}` failed"), source))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let detail = error_detail(response).await;
        debug!(path, status = status.as_u16(), detail = %detail, "server rejected request");
        Err(match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized { detail },
            StatusCode::FORBIDDEN => ApiError::Forbidden { detail },
            StatusCode::CONFLICT => ApiError::Conflict { detail },
            StatusCode::NOT_FOUND => ApiError::NotFound { detail },
            other => ApiError::Status {
                path: path.to_string(),
                status: other.as_u16(),
                detail,
            },
        })
    }

    async fn send_json<T>(&self, path: &str, builder: RequestBuilder) -> ApiResult<T>
    where
        T: DeserializeOwned,
    {
        let response = self.send(path, builder).await?;
        response.json::<T>().await.map_err(|source| ApiError::Decode {
            path: path.to_string(),
            source: Box::new(source),
        })
    }
}

/// Extract the human-readable `detail` of an error body, if any.
async fn error_detail(response: Response) -> String {
    let Ok(body) = response.text().await else {
        return String::new();
    };
    match serde_json::from_str::<Value>(&body) {
        Ok(Value::Object(map)) => match map.get("detail") {
            Some(Value::String(detail)) => detail.clone(),
            Some(other) => other.to_string(),
            None => body,
        },
        _ => body,
    }
}

impl ServerApi for HttpServerApi {
    fn register(&self, request: RegisterRequest) -> BoxFuture<'static, ApiResult<Admission>> {
        let api = self.clone();
        Box::pin(async move {
            request
                .validate()
                .map_err(|err| ApiError::InvalidInput(err.to_string()))?;
            let builder = api.request(Method::POST, REGISTER_PATH, None).json(&request);
            let response: RegisterResponse = api.send_json(REGISTER_PATH, builder).await?;
            Ok(response.into_admission())
        })
    }

    fn validate(&self, token: String) -> BoxFuture<'static, ApiResult<Admission>> {
        let api = self.clone();
        Box::pin(async move {
            let body = ValidateTokenRequest {
                token: token.clone(),
            };
            let builder = api.request(Method::POST, VALIDATE_PATH, None).json(&body);
            let response: ValidateTokenResponse = api.send_json(VALIDATE_PATH, builder).await?;
            Ok(response.into_admission(token))
        })
    }

    fn status(&self) -> BoxFuture<'static, ApiResult<StatusResponse>> {
        let api = self.clone();
        Box::pin(async move {
            let builder = api.request(Method::GET, STATUS_PATH, None);
            api.send_json(STATUS_PATH, builder).await
        })
    }

    fn level_content(
        &self,
        level: u32,
        path: Option<String>,
    ) -> BoxFuture<'static, ApiResult<LevelContent>> {
        let api = self.clone();
        Box::pin(async move {
            let route = format!("/api/questions/{level}");
            let mut builder = api.request(Method::GET, &route, None);
            if let Some(path) = path {
                builder = builder.query(&[("path", path)]);
            }
            api.send_json(&route, builder).await
        })
    }

    fn submit_answer(
        &self,
        token: String,
        request: SubmitAnswerRequest,
    ) -> BoxFuture<'static, ApiResult<AnswerResponse>> {
        let api = self.clone();
        Box::pin(async move {
            let builder = api
                .request(Method::POST, SUBMIT_ANSWER_PATH, Some(&token))
                .json(&request);
            api.send_json(SUBMIT_ANSWER_PATH, builder).await
        })
    }

    fn submit_code(&self, token: String, code: String) -> BoxFuture<'static, ApiResult<CodeResponse>> {
        let api = self.clone();
        Box::pin(async move {
            let builder = api
                .request(Method::POST, SUBMIT_CODE_PATH, Some(&token))
                .json(&SubmitCodeRequest { code });
            api.send_json(SUBMIT_CODE_PATH, builder).await
        })
    }

    fn heartbeat(&self, token: String) -> BoxFuture<'static, ApiResult<()>> {
        let api = self.clone();
        Box::pin(async move {
            let builder = api.request(Method::POST, HEARTBEAT_PATH, Some(&token));
            api.send(HEARTBEAT_PATH, builder).await.map(|_| ())
        })
    }

    fn log_activity(
        &self,
        token: String,
        request: ActivityRequest,
    ) -> BoxFuture<'static, ApiResult<()>> {
        let api = self.clone();
        Box::pin(async move {
            let builder = api
                .request(Method::POST, ACTIVITY_PATH, Some(&token))
                .json(&request);
            api.send(ACTIVITY_PATH, builder).await.map(|_| ())
        })
    }
}
