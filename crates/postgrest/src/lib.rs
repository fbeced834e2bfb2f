//! PostgREST client
//!
//! A small query builder over the PostgREST HTTP API: filters, ordering,
//! limits, the write verbs, RPC calls and exact counts. Row lookups through
//! [`PostgrestClient::single`] report "no rows" as [`PostgrestError::NotFound`]
//! so callers can tell an absent row from a failed request.

use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use url::Url;

/// PostgREST error code for "JSON object requested, multiple (or no) rows returned".
pub const NO_ROWS_CODE: &str = "PGRST116";

/// Error body returned by PostgREST
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PostgrestApiErrorDetails {
    pub code: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl fmt::Display for PostgrestApiErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(code) = &self.code {
            parts.push(format!("Code: {}", code));
        }
        if let Some(message) = &self.message {
            parts.push(format!("Message: {}", message));
        }
        if let Some(details) = &self.details {
            parts.push(format!("Details: {}", details));
        }
        if let Some(hint) = &self.hint {
            parts.push(format!("Hint: {}", hint));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// Error type
#[derive(Error, Debug)]
pub enum PostgrestError {
    #[error("API error: {details} (Status: {status})")]
    ApiError {
        details: PostgrestApiErrorDetails,
        status: StatusCode,
    },

    #[error("API error (unparsed): {message} (Status: {status})")]
    UnparsedApiError { message: String, status: StatusCode },

    #[error("No rows found")]
    NotFound,

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl PostgrestError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PostgrestError::NotFound)
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Query builder bound to one table (or one RPC function)
#[derive(Debug, Clone)]
pub struct PostgrestClient {
    base_url: String,
    table: String,
    http_client: Client,
    headers: HeaderMap,
    query_params: Vec<(String, String)>,
    rpc_params: Option<Value>,
}

impl PostgrestClient {
    pub fn new(base_url: &str, api_key: &str, table: &str, http_client: Client) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(api_key) {
            headers.insert("apikey", value);
        }
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            table: table.to_string(),
            http_client,
            headers,
            query_params: Vec::new(),
            rpc_params: None,
        }
    }

    /// Client for calling a stored procedure
    pub fn rpc(
        base_url: &str,
        api_key: &str,
        function_name: &str,
        params: Value,
        http_client: Client,
    ) -> Self {
        let mut client = Self::new(base_url, api_key, function_name, http_client);
        client.rpc_params = Some(params);
        client
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Result<Self, PostgrestError> {
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            PostgrestError::InvalidParameters(format!("Invalid header value for {}", key))
        })?;
        let header_name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
            PostgrestError::InvalidParameters(format!("Invalid header name: {}", key))
        })?;

        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Send requests with the given user token instead of the anon key.
    pub fn with_auth(self, token: &str) -> Result<Self, PostgrestError> {
        self.with_header("Authorization", &format!("Bearer {}", token))
    }

    fn param(mut self, key: &str, value: String) -> Self {
        self.query_params.push((key.to_string(), value));
        self
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.query_params.retain(|(k, _)| k != "select");
        self.param("select", columns.to_string())
    }

    pub fn eq(self, column: &str, value: &str) -> Self {
        self.param(column, format!("eq.{}", value))
    }

    pub fn neq(self, column: &str, value: &str) -> Self {
        self.param(column, format!("neq.{}", value))
    }

    pub fn gt(self, column: &str, value: &str) -> Self {
        self.param(column, format!("gt.{}", value))
    }

    pub fn lt(self, column: &str, value: &str) -> Self {
        self.param(column, format!("lt.{}", value))
    }

    pub fn is_null(self, column: &str) -> Self {
        self.param(column, "is.null".to_string())
    }

    pub fn not_null(self, column: &str) -> Self {
        self.param(column, "not.is.null".to_string())
    }

    pub fn in_list(self, column: &str, values: &[&str]) -> Self {
        let values: Vec<String> = values.iter().map(|v| quote_value(v)).collect();
        self.param(column, format!("in.({})", values.join(",")))
    }

    /// Raw `or` group, e.g. `client_id.eq.1,tasker_id.eq.1`. Values are
    /// inserted as given; see [`PostgrestClient::or_eq`].
    pub fn or(self, filters: &str) -> Self {
        self.param("or", format!("({})", filters))
    }

    /// Rows where any of `columns` equals `value`
    pub fn or_eq(self, columns: &[&str], value: &str) -> Self {
        let value = quote_value(value);
        let filters: Vec<String> = columns
            .iter()
            .map(|column| format!("{}.eq.{}", column, value))
            .collect();
        self.or(&filters.join(","))
    }

    pub fn order(self, column: &str, order: SortOrder) -> Self {
        let dir = match order {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        };
        self.param("order", format!("{}.{}", column, dir))
    }

    pub fn limit(mut self, count: u32) -> Self {
        self.query_params.retain(|(k, _)| k != "limit");
        self.param("limit", count.to_string())
    }

    fn build_url(&self) -> Result<Url, PostgrestError> {
        let path = if self.rpc_params.is_some() {
            format!("{}/rest/v1/rpc/{}", self.base_url, self.table)
        } else {
            format!("{}/rest/v1/{}", self.base_url, self.table)
        };
        let mut url = Url::parse(&path)?;
        if !self.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query_params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        extra_headers: &[(&'static str, &'static str)],
        body: Option<Value>,
    ) -> Result<reqwest::Response, PostgrestError> {
        let url = self.build_url()?;
        let mut headers = self.headers.clone();
        for (name, value) in extra_headers {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }

        debug!("{} {}", method, url.path());
        let mut request = self.http_client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());

        match serde_json::from_str::<PostgrestApiErrorDetails>(&error_text) {
            Ok(details) if details.code.as_deref() == Some(NO_ROWS_CODE) => {
                Err(PostgrestError::NotFound)
            }
            Ok(details) => Err(PostgrestError::ApiError { details, status }),
            Err(_) => Err(PostgrestError::UnparsedApiError {
                message: error_text,
                status,
            }),
        }
    }

    async fn read_rows<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Vec<T>, PostgrestError> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str::<Vec<T>>(&text)
            .map_err(|e| PostgrestError::DeserializationError(e.to_string()))
    }

    /// Run the select and return all matching rows
    pub async fn execute<T: DeserializeOwned>(&self) -> Result<Vec<T>, PostgrestError> {
        let response = self.send(Method::GET, &[], None).await?;
        Self::read_rows(response).await
    }

    /// Fetch exactly one row. No match is [`PostgrestError::NotFound`].
    pub async fn single<T: DeserializeOwned>(&self) -> Result<T, PostgrestError> {
        let response = self
            .send(
                Method::GET,
                &[("accept", "application/vnd.pgrst.object+json")],
                None,
            )
            .await?;
        response
            .json::<T>()
            .await
            .map_err(|e| PostgrestError::DeserializationError(e.to_string()))
    }

    /// Like [`single`](Self::single) but maps "no rows" to `None`.
    pub async fn maybe_single<T: DeserializeOwned>(&self) -> Result<Option<T>, PostgrestError> {
        match self.single::<T>().await {
            Ok(row) => Ok(Some(row)),
            Err(PostgrestError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Exact row count of the filtered query
    pub async fn count(&self) -> Result<u64, PostgrestError> {
        let response = self
            .send(Method::HEAD, &[("prefer", "count=exact")], None)
            .await?;
        let range = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                PostgrestError::DeserializationError("missing Content-Range header".to_string())
            })?;
        parse_content_range_total(range).ok_or_else(|| {
            PostgrestError::DeserializationError(format!("unparseable Content-Range: {}", range))
        })
    }

    pub async fn insert<T: Serialize, R: DeserializeOwned>(
        &self,
        values: T,
    ) -> Result<Vec<R>, PostgrestError> {
        let body = serde_json::to_value(values)?;
        let response = self
            .send(Method::POST, &[("prefer", "return=representation")], Some(body))
            .await?;
        Self::read_rows(response).await
    }

    /// Insert or merge on the `on_conflict` column(s)
    pub async fn upsert<T: Serialize, R: DeserializeOwned>(
        &self,
        values: T,
        on_conflict: &str,
    ) -> Result<Vec<R>, PostgrestError> {
        let body = serde_json::to_value(values)?;
        let client = self.clone().param("on_conflict", on_conflict.to_string());
        let response = client
            .send(
                Method::POST,
                &[(
                    "prefer",
                    "resolution=merge-duplicates,return=representation",
                )],
                Some(body),
            )
            .await?;
        Self::read_rows(response).await
    }

    /// Update the filtered rows and return them
    pub async fn update<T: Serialize, R: DeserializeOwned>(
        &self,
        values: T,
    ) -> Result<Vec<R>, PostgrestError> {
        if self.query_params.iter().all(|(k, _)| k == "select") {
            return Err(PostgrestError::InvalidParameters(
                "update without a filter would touch every row".to_string(),
            ));
        }
        let body = serde_json::to_value(values)?;
        let response = self
            .send(Method::PATCH, &[("prefer", "return=representation")], Some(body))
            .await?;
        Self::read_rows(response).await
    }

    pub async fn delete(&self) -> Result<(), PostgrestError> {
        if self.query_params.is_empty() {
            return Err(PostgrestError::InvalidParameters(
                "delete without a filter would touch every row".to_string(),
            ));
        }
        self.send(Method::DELETE, &[], None).await?;
        Ok(())
    }

    /// Call the function this client was built for with [`PostgrestClient::rpc`]
    pub async fn call_rpc<T: DeserializeOwned>(&self) -> Result<T, PostgrestError> {
        let params = self.rpc_params.clone().ok_or_else(|| {
            PostgrestError::InvalidParameters(
                "Client was not created for RPC. Use PostgrestClient::rpc().".to_string(),
            )
        })?;
        let response = self.send(Method::POST, &[], Some(params)).await?;
        let text = response.text().await?;
        let text = if text.trim().is_empty() { "null" } else { &text };
        serde_json::from_str::<T>(text).map_err(|e| {
            PostgrestError::DeserializationError(format!(
                "Failed to deserialize RPC response: {}",
                e
            ))
        })
    }
}

/// `0-24/3573` or `*/0` -> total
fn parse_content_range_total(range: &str) -> Option<u64> {
    range.rsplit('/').next()?.trim().parse().ok()
}

/// Quote a value for a list filter (`in.(..)`, `or=(..)`) when it carries
/// characters PostgREST reads as delimiters.
pub fn quote_value(value: &str) -> String {
    let reserved =
        |c: char| matches!(c, ',' | '.' | ':' | '(' | ')' | '"' | '\\') || c.is_whitespace();
    if !value.contains(reserved) {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_values_are_quoted_only_when_needed() {
        assert_eq!(quote_value("0b9d3c1e-55aa-4f"), "0b9d3c1e-55aa-4f");
        assert_eq!(
            quote_value("u1,tasker_id.neq.x"),
            "\"u1,tasker_id.neq.x\""
        );
        assert_eq!(quote_value(r#"a"b"#), r#""a\"b""#);
    }

    #[test]
    fn or_eq_keeps_the_group_closed() {
        let client = PostgrestClient::new("http://localhost", "k", "bookings", Client::new())
            .or_eq(&["client_id", "tasker_id"], "u1),id.gt.(0");
        let url = client.build_url().unwrap();
        let (_, or) = url.query_pairs().find(|(k, _)| k == "or").unwrap();
        assert_eq!(
            or,
            r#"(client_id.eq."u1),id.gt.(0",tasker_id.eq."u1),id.gt.(0")"#
        );
    }

    #[test]
    fn content_range_totals() {
        assert_eq!(parse_content_range_total("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-9/*"), None);
    }

    #[test]
    fn filters_keep_duplicate_columns() {
        let client = PostgrestClient::new("http://localhost", "k", "bookings", Client::new())
            .not_null("latitude")
            .not_null("longitude")
            .is_null("tasker_id");
        let url = client.build_url().unwrap();
        let query = url.query().unwrap();
        assert!(query.contains("latitude=not.is.null"));
        assert!(query.contains("longitude=not.is.null"));
        assert!(query.contains("tasker_id=is.null"));
    }

    #[test]
    fn rpc_targets_function_path() {
        let client = PostgrestClient::rpc(
            "http://localhost/",
            "k",
            "approve_tasker",
            serde_json::json!({}),
            Client::new(),
        );
        assert_eq!(
            client.build_url().unwrap().path(),
            "/rest/v1/rpc/approve_tasker"
        );
    }
}
