//! Storage client
//!
//! Uploads, signed and public URLs, listing and removal of objects in
//! Supabase Storage buckets.

use bytes::Bytes;
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use url::Url;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("API error: {message} (Status: {status})")]
    ApiError { status: StatusCode, message: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid object path: {0}")]
    InvalidPath(String),
}

/// Upload options
#[derive(Debug, Clone, Serialize, Default)]
pub struct FileOptions {
    pub cache_control: Option<String>,
    pub content_type: Option<String>,
    pub upsert: Option<bool>,
}

impl FileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_control(mut self, cache_control: &str) -> Self {
        self.cache_control = Some(cache_control.to_string());
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = Some(upsert);
        self
    }
}

/// Listing options
#[derive(Debug, Clone, Serialize, Default)]
pub struct ListOptions {
    pub limit: Option<i32>,
    pub offset: Option<i32>,
    pub search: Option<String>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn search(mut self, search: &str) -> Self {
        self.search = Some(search.to_string());
        self
    }
}

/// Entry returned by [`StorageBucketClient::list`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileObject {
    pub name: String,
    pub id: Option<String>,
    pub updated_at: Option<String>,
    pub created_at: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(rename = "Key")]
    key: Option<String>,
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL", alias = "signedUrl", alias = "signed_url")]
    signed_url: String,
}

/// Client scoped to one bucket
pub struct StorageBucketClient<'a> {
    parent: &'a StorageClient,
    bucket_id: String,
}

#[derive(Debug, Clone)]
pub struct StorageClient {
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    http_client: Client,
}

impl StorageClient {
    pub fn new(base_url: &str, api_key: &str, http_client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: None,
            http_client,
        }
    }

    /// Copy of this client that authorizes as the given user.
    pub fn with_auth(&self, access_token: &str) -> Self {
        Self {
            access_token: Some(access_token.to_string()),
            ..self.clone()
        }
    }

    pub fn from<'a>(&'a self, bucket_id: &str) -> StorageBucketClient<'a> {
        StorageBucketClient {
            parent: self,
            bucket_id: bucket_id.to_string(),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.access_token.as_deref().unwrap_or(&self.api_key);
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", token))
    }

    fn object_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| StorageError::InvalidPath(self.base_url.clone()))?;
            path.pop_if_empty().extend(["storage", "v1", "object"]);
            for segment in segments {
                path.extend(segment.split('/').filter(|s| !s.is_empty()));
            }
        }
        Ok(url)
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error response".to_string());
    if status == StatusCode::NOT_FOUND {
        return Err(StorageError::FileNotFound(message));
    }
    Err(StorageError::ApiError { status, message })
}

impl<'a> StorageBucketClient<'a> {
    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    /// Upload bytes to `path`. Returns the stored object path inside the bucket.
    pub async fn upload(
        &self,
        path: &str,
        data: Bytes,
        options: Option<FileOptions>,
    ) -> Result<String> {
        if path.trim().is_empty() {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        let url = self.parent.object_url(&[&self.bucket_id, path])?;
        let options = options.unwrap_or_default();

        let file_name = path.rsplit('/').next().unwrap_or(path).to_string();
        let mut part = Part::stream(data).file_name(file_name);
        if let Some(content_type) = &options.content_type {
            part = part.mime_str(content_type)?;
        }
        let mut form = Form::new().part("file", part);
        if let Some(cache_control) = &options.cache_control {
            form = form.text("cacheControl", cache_control.clone());
        }

        debug!("uploading {}/{}", self.bucket_id, path);
        let request = self
            .parent
            .authorize(self.parent.http_client.post(url))
            .header("x-upsert", options.upsert.unwrap_or(false).to_string())
            .multipart(form);
        let response = check(request.send().await?).await?;

        let body = response.json::<UploadResponse>().await?;
        let prefix = format!("{}/", self.bucket_id);
        Ok(body
            .key
            .map(|key| key.strip_prefix(&prefix).map(str::to_string).unwrap_or(key))
            .unwrap_or_else(|| path.to_string()))
    }

    pub async fn download(&self, path: &str) -> Result<Bytes> {
        let url = self.parent.object_url(&[&self.bucket_id, path])?;
        let request = self.parent.authorize(self.parent.http_client.get(url));
        let response = check(request.send().await?).await?;
        Ok(response.bytes().await?)
    }

    pub async fn list(&self, prefix: &str, options: Option<ListOptions>) -> Result<Vec<FileObject>> {
        let url = self.parent.object_url(&["list", &self.bucket_id])?;
        let options = options.unwrap_or_default();
        let body = json!({
            "prefix": prefix,
            "limit": options.limit.unwrap_or(100),
            "offset": options.offset.unwrap_or(0),
            "search": options.search,
        });

        let request = self
            .parent
            .authorize(self.parent.http_client.post(url))
            .json(&body);
        let response = check(request.send().await?).await?;
        Ok(response.json::<Vec<FileObject>>().await?)
    }

    pub async fn remove(&self, paths: &[&str]) -> Result<()> {
        let url = self.parent.object_url(&[&self.bucket_id])?;
        let request = self
            .parent
            .authorize(self.parent.http_client.delete(url))
            .json(&json!({ "prefixes": paths }));
        check(request.send().await?).await?;
        Ok(())
    }

    /// Public URL of an object in a public bucket. Makes no request.
    pub fn get_public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.parent.base_url,
            self.bucket_id,
            path.trim_start_matches('/')
        )
    }

    /// Time-limited URL for an object in a private bucket.
    pub async fn create_signed_url(&self, path: &str, expires_in: u64) -> Result<String> {
        let url = self.parent.object_url(&["sign", &self.bucket_id, path])?;
        let request = self
            .parent
            .authorize(self.parent.http_client.post(url))
            .json(&json!({ "expiresIn": expires_in }));
        let response = check(request.send().await?).await?;

        let signed = response.json::<SignedUrlResponse>().await?;
        if signed.signed_url.starts_with("http") {
            return Ok(signed.signed_url);
        }
        Ok(format!(
            "{}/storage/v1/{}",
            self.parent.base_url,
            signed.signed_url.trim_start_matches('/')
        ))
    }
}
