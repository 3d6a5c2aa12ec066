use std::time::Duration;

use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use crate::assistant::AssistantService;
use crate::assistant::error::AssistantError;
use crate::assistant::stream::{EventStream, event_stream};
use crate::assistant::types::{
    AssistantObject, CreateMessageRequest, CreateRunRequest, RunRef, SubmitToolOutputsRequest,
    ThreadObject, ToolOutput,
};
use crate::config::AssistantConfig;

pub const HEADER_OPENAI_BETA: HeaderName = HeaderName::from_static("openai-beta");
const ASSISTANTS_BETA: &str = "assistants=v2";

/// HTTP adapter over the hosted Assistants API.
#[derive(Debug, Clone)]
pub struct AssistantClient {
    pub base_url: String,
    api_key: String,
    pub(crate) inner: reqwest::Client,
    request_timeout: Option<Duration>,
}

impl AssistantClient {
    #[cfg(test)]
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, AssistantError> {
        let inner = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            inner,
            request_timeout: None,
        })
    }

    pub fn from_config(cfg: &AssistantConfig) -> Result<Self, AssistantError> {
        let mut builder = reqwest::Client::builder();
        if let Some(ms) = cfg.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        Ok(Self {
            base_url: cfg.base_url.clone(),
            api_key: cfg.api_key.clone(),
            inner: builder.build()?,
            // Streams are never cut by this; it only bounds the plain JSON calls.
            request_timeout: cfg.request_timeout_ms.map(Duration::from_millis),
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn headers(&self, stream: bool) -> Result<HeaderMap, AssistantError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(HEADER_OPENAI_BETA, HeaderValue::from_static(ASSISTANTS_BETA));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|_| AssistantError::InvalidHeader("authorization"))?,
        );
        if stream {
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        }
        Ok(headers)
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> Result<T, AssistantError> {
        let request = match self.request_timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        };
        let resp = request.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!(status=%status.as_u16(), body=%text, endpoint, "assistant non-success status");
            return Err(AssistantError::Status(status, text));
        }
        let text = resp.text().await?;
        debug!(response_body=%text, endpoint, "assistant response");
        Ok(serde_json::from_str(&text)?)
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AssistantError> {
        let url = self.url(path);
        if let Ok(payload) = serde_json::to_string(body) {
            debug!(payload=%payload, endpoint=%url, "sending assistant payload");
        }
        let request = self.inner.post(&url).headers(self.headers(false)?).json(body);
        self.read_json(request, &url).await
    }

    async fn open_stream<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<EventStream, AssistantError> {
        let url = self.url(path);
        if let Ok(payload) = serde_json::to_string(body) {
            debug!(payload=%payload, endpoint=%url, "opening assistant stream");
        }
        let resp = self
            .inner
            .post(&url)
            .headers(self.headers(true)?)
            .json(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!(status=%status.as_u16(), body=%text, endpoint=%url, "assistant stream rejected");
            return Err(AssistantError::Status(status, text));
        }
        Ok(event_stream(resp))
    }

    /// Look up the configured assistant; used at startup as a credentials check.
    pub async fn retrieve_assistant(
        &self,
        assistant_id: &str,
    ) -> Result<AssistantObject, AssistantError> {
        let url = self.url(&format!("assistants/{assistant_id}"));
        let request = self.inner.get(&url).headers(self.headers(false)?);
        let assistant: AssistantObject = self.read_json(request, &url).await?;
        info!(
            assistant_id = %assistant.id,
            name = ?assistant.name,
            model = ?assistant.model,
            "assistant retrieved"
        );
        Ok(assistant)
    }
}

#[async_trait::async_trait]
impl AssistantService for AssistantClient {
    async fn create_thread(&self) -> Result<String, AssistantError> {
        let thread: ThreadObject = self.post_json("threads", &serde_json::json!({})).await?;
        info!(thread_id = %thread.id, "thread created");
        Ok(thread.id)
    }

    async fn add_user_message(&self, thread_id: &str, content: &str) -> Result<(), AssistantError> {
        let req = CreateMessageRequest {
            role: "user",
            content,
        };
        let _: serde_json::Value = self
            .post_json(&format!("threads/{thread_id}/messages"), &req)
            .await?;
        Ok(())
    }

    async fn stream_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<EventStream, AssistantError> {
        let req = CreateRunRequest {
            assistant_id,
            stream: true,
        };
        self.open_stream(&format!("threads/{thread_id}/runs"), &req)
            .await
    }

    async fn submit_tool_outputs_stream(
        &self,
        run: &RunRef,
        outputs: &[ToolOutput],
    ) -> Result<EventStream, AssistantError> {
        let req = SubmitToolOutputsRequest {
            tool_outputs: outputs,
            stream: true,
        };
        self.open_stream(
            &format!(
                "threads/{}/runs/{}/submit_tool_outputs",
                run.thread_id, run.id
            ),
            &req,
        )
        .await
    }
}
