use crate::api::types::{
    ChatReply, ChatRequest, ErrorBody, ExtractedInfo, FilePart, TranscribeReply, UploadReply,
};
use crate::api::{ApiError, Backend};
use crate::documents::ExtractEndpoint;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use serde::de::DeserializeOwned;
use tracing::{debug, error};

/// reqwest-backed client bound to one origin.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("insura/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn file_form(file: FilePart) -> Result<Form, ApiError> {
        let part = Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(&file.mime_type)?;
        Ok(Form::new().part("file", part))
    }

    async fn post_form<T: DeserializeOwned>(&self, path: &str, form: Form) -> Result<T, ApiError> {
        debug!("-> POST {} (multipart)", path);
        let response = self.http.post(self.url(path)).multipart(form).send().await?;
        Self::decode(path, response).await
    }

    async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(ErrorBody::into_message);
            error!("{} failed with {}: {:?}", path, status, message);
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        let body = response.json::<T>().await?;
        debug!("<- {} {}", status.as_u16(), path);
        Ok(body)
    }
}

#[async_trait]
impl Backend for ApiClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, ApiError> {
        debug!("-> POST /chat/ user_id={} extracted={}", request.user_id, request.is_extracted_info);
        let response = self.http.post(self.url("/chat/")).json(request).send().await?;
        Self::decode("/chat/", response).await
    }

    async fn upload(&self, file: FilePart) -> Result<String, ApiError> {
        let reply: UploadReply = self.post_form("/upload/", Self::file_form(file)?).await?;
        reply
            .file_path
            .filter(|p| !p.is_empty())
            .ok_or(ApiError::MissingField("file_path"))
    }

    async fn transcribe(&self, audio: FilePart) -> Result<String, ApiError> {
        let reply: TranscribeReply = self
            .post_form("/transcribe/", Self::file_form(audio)?)
            .await?;
        reply.transcript.ok_or(ApiError::MissingField("transcript"))
    }

    async fn extract(
        &self,
        endpoint: ExtractEndpoint,
        file: FilePart,
        user_id: &str,
    ) -> Result<ExtractedInfo, ApiError> {
        let form = Self::file_form(file)?.text("user_id", user_id.to_string());
        self.post_form(endpoint.path(), form).await
    }

    async fn fetch_document(&self, name: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.document_url(name);
        debug!("-> GET {}", url);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: None,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}
