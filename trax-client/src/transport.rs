//! HTTP transport helper
//!
//! One [`Transport`] per client, built from an immutable [`ClientConfig`].
//! Every resource operation describes its request as a [`RequestSpec`] and
//! hands it to [`Transport::execute`] (buffered body) or
//! [`Transport::stream_to_file`] (downloads). Each call performs exactly one
//! HTTP exchange, following redirects.
//!
//! Failures stay distinguishable: connection-level problems are
//! [`ClientError::Transport`], unparseable bodies and unexpected statuses are
//! [`ClientError::Protocol`], and a request that stays idle longer than the
//! configured timeout is dropped and reported as [`ClientError::Timeout`].

use crate::error::{ClientError, ClientResult};
use crate::models::{DownloadOutcome, Params};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::debug;
use trax_common::config::{ClientConfig, ResponseFormat};

const USER_AGENT: &str = concat!("trax/", env!("CARGO_PKG_VERSION"));

/// HTTP method used by the service API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    fn as_reqwest(&self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        }
    }
}

/// Request body variants
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON with `Content-Type: application/json`
    Json(Value),
    /// Serialized as a form-encoded string
    Form(Params),
    /// Multipart body with a single file part
    Multipart {
        field: String,
        file_name: String,
        bytes: Vec<u8>,
    },
}

/// Description of a single request, shared by all resource operations
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: Method,
    /// Relative to the endpoint (`/audiofile/`), or an absolute URL
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub query: Params,
    pub body: Option<RequestBody>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            query: Params::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.insert(name.into(), value.to_string());
        self
    }

    /// Merge caller parameters over the ones already set; caller values win
    pub fn params(mut self, extra: &Params) -> Self {
        for (k, v) in extra {
            self.query.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn form(mut self, body: Params) -> Self {
        self.body = Some(RequestBody::Form(body));
        self
    }

    pub fn multipart(
        mut self,
        field: impl Into<String>,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.body = Some(RequestBody::Multipart {
            field: field.into(),
            file_name: file_name.into(),
            bytes,
        });
        self
    }
}

/// Parsed response body
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    /// Decode into a typed record
    ///
    /// Text bodies are parsed as JSON first. Either failure is a protocol error.
    pub fn into_typed<T: DeserializeOwned>(self) -> ClientResult<T> {
        let value = match self {
            ResponseBody::Json(value) => value,
            ResponseBody::Text(text) => {
                serde_json::from_str(&text).map_err(ClientError::bad_json)?
            }
        };
        serde_json::from_value(value).map_err(|e| ClientError::Protocol {
            context: "unexpected response shape".to_string(),
            message: e.to_string(),
        })
    }
}

/// Multipart upload chunk size; each chunk handed to the socket counts as activity
const UPLOAD_CHUNK: usize = 64 * 1024;

/// Last time bytes moved on a request, shared with the upload body stream
#[derive(Clone)]
struct Activity {
    start: Instant,
    last_ms: Arc<AtomicU64>,
}

impl Activity {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    fn touch(&self) {
        let elapsed = self.start.elapsed().as_millis() as u64;
        self.last_ms.store(elapsed, Ordering::Relaxed);
    }

    fn idle_deadline(&self, idle: Duration) -> Instant {
        self.start + Duration::from_millis(self.last_ms.load(Ordering::Relaxed)) + idle
    }
}

/// HTTP transport bound to one service configuration
///
/// `config.timeout` is an idle timeout: it bounds connecting, each wait for
/// the response head and each wait for the next body chunk. A transfer that
/// keeps moving bytes is never cut off, however long it runs.
pub struct Transport {
    http_client: reqwest::Client,
    config: ClientConfig,
}

impl Transport {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.timeout)
            .build()
            .map_err(ClientError::Transport)?;

        Ok(Self {
            http_client,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve a request path against the configured base URL
    pub fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.config.base_url(), path)
        }
    }

    /// Perform one request and parse the body per the configured format
    pub async fn execute(&self, spec: RequestSpec) -> ClientResult<ResponseBody> {
        let mut response = self.send(spec).await?;
        let status = response.status();

        let mut body = Vec::new();
        while let Some(chunk) = self.next_chunk(&mut response).await? {
            body.extend_from_slice(&chunk);
        }
        let text = String::from_utf8_lossy(&body).into_owned();

        if !status.is_success() {
            return Err(ClientError::unexpected_status(status.as_u16(), &text));
        }

        match self.config.response_format {
            ResponseFormat::Json => serde_json::from_str(&text)
                .map(ResponseBody::Json)
                .map_err(ClientError::bad_json),
            ResponseFormat::Text => Ok(ResponseBody::Text(text)),
        }
    }

    /// Perform one request and decode the body into `T`
    pub async fn execute_typed<T: DeserializeOwned>(&self, spec: RequestSpec) -> ClientResult<T> {
        self.execute(spec).await?.into_typed()
    }

    /// Perform one request and stream a success body into `dest`
    ///
    /// Nothing is written when the final response is not a success. Any
    /// failure after the file is created (read, write or idle timeout)
    /// removes the partial file.
    pub async fn stream_to_file(
        &self,
        spec: RequestSpec,
        dest: &Path,
    ) -> ClientResult<DownloadOutcome> {
        let mut response = self.send(spec).await?;
        let status = response.status();

        if !status.is_success() {
            debug!(
                status = status.as_u16(),
                dest = %dest.display(),
                "Non-success response, skipping write"
            );
            return Ok(DownloadOutcome::Skipped {
                status: status.as_u16(),
            });
        }

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = match self.write_body(&mut response, dest).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(dest).await {
                    debug!(dest = %dest.display(), error = %rm, "Partial file not removed");
                }
                return Err(e);
            }
        };

        debug!(dest = %dest.display(), bytes = bytes, "Response body written");
        Ok(DownloadOutcome::Written {
            path: dest.to_path_buf(),
            bytes,
        })
    }

    async fn write_body(&self, response: &mut reqwest::Response, dest: &Path) -> ClientResult<u64> {
        let mut file = tokio::fs::File::create(dest).await?;
        let mut bytes = 0u64;
        while let Some(chunk) = self.next_chunk(response).await? {
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(bytes)
    }

    /// Next body chunk, failing once the body stays silent for the idle timeout
    async fn next_chunk(&self, response: &mut reqwest::Response) -> ClientResult<Option<Vec<u8>>> {
        match tokio::time::timeout(self.config.timeout, response.chunk()).await {
            Ok(Ok(chunk)) => Ok(chunk.map(|c| c.to_vec())),
            Ok(Err(e)) => Err(self.map_error(e)),
            Err(_) => Err(ClientError::Timeout(self.config.timeout)),
        }
    }

    async fn send(&self, spec: RequestSpec) -> ClientResult<reqwest::Response> {
        let url = self.resolve_url(&spec.path);
        let activity = Activity::new();

        let mut builder = self
            .http_client
            .request(spec.method.as_reqwest(), &url)
            .header("Accept", "*/*")
            .header("Authorization", self.config.credentials.authorization());

        for (name, value) in &spec.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if !spec.query.is_empty() {
            builder = builder.query(&spec.query);
        }

        builder = match spec.body {
            None => builder,
            Some(RequestBody::Json(value)) => builder.json(&value),
            Some(RequestBody::Form(form)) => builder.form(&form),
            Some(RequestBody::Multipart {
                field,
                file_name,
                bytes,
            }) => {
                let length = bytes.len() as u64;
                let part = reqwest::multipart::Part::stream_with_length(
                    upload_body(bytes, activity.clone()),
                    length,
                )
                .file_name(file_name);
                builder.multipart(reqwest::multipart::Form::new().part(field, part))
            }
        };

        let request = builder.build().map_err(ClientError::Transport)?;

        if self.config.debug {
            let headers: Vec<String> = request
                .headers()
                .iter()
                .map(|(name, value)| {
                    if *name == reqwest::header::AUTHORIZATION {
                        format!("{}: ApiKey {}:<redacted>", name, self.config.credentials.access_key)
                    } else {
                        format!("{}: {}", name, value.to_str().unwrap_or("<binary>"))
                    }
                })
                .collect();
            debug!(
                method = %request.method(),
                url = %request.url(),
                headers = ?headers,
                "Sending request"
            );
        }

        activity.touch();
        let response = self
            .until_idle(&activity, self.http_client.execute(request))
            .await?;

        if self.config.debug {
            debug!(
                status = response.status().as_u16(),
                url = %response.url(),
                headers = ?response.headers(),
                "Received response"
            );
        }

        Ok(response)
    }

    /// Drive `exchange` until it completes or `activity` stays still for the idle timeout
    async fn until_idle<F>(&self, activity: &Activity, exchange: F) -> ClientResult<reqwest::Response>
    where
        F: Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        tokio::pin!(exchange);
        loop {
            let deadline = activity.idle_deadline(self.config.timeout);
            tokio::select! {
                result = &mut exchange => return result.map_err(|e| self.map_error(e)),
                _ = tokio::time::sleep_until(deadline) => {
                    if activity.idle_deadline(self.config.timeout) <= Instant::now() {
                        return Err(ClientError::Timeout(self.config.timeout));
                    }
                }
            }
        }
    }

    fn map_error(&self, e: reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::Timeout(self.config.timeout)
        } else {
            ClientError::Transport(e)
        }
    }
}

/// Upload bytes as a chunked stream that records activity as the socket drains it
fn upload_body(bytes: Vec<u8>, activity: Activity) -> reqwest::Body {
    let chunks: Vec<Vec<u8>> = bytes.chunks(UPLOAD_CHUNK).map(|c| c.to_vec()).collect();
    let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
        activity.touch();
        Ok::<_, std::io::Error>(chunk)
    }));
    reqwest::Body::wrap_stream(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trax_common::config::Credentials;

    fn transport() -> Transport {
        let config = ClientConfig::new(Credentials::new("k", "s"))
            .with_secure(false)
            .with_host("localhost")
            .with_port(Some(8080));
        Transport::new(config).unwrap()
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let t = transport();
        assert_eq!(
            t.resolve_url("/audiofile/"),
            "http://localhost:8080/api/v1/audiofile/"
        );
        assert_eq!(
            t.resolve_url("https://cdn.example/file.wav"),
            "https://cdn.example/file.wav"
        );
    }

    #[test]
    fn test_params_caller_wins() {
        let mut extra = Params::new();
        extra.insert("baseline".to_string(), "v4".to_string());
        extra.insert("limit".to_string(), "5".to_string());

        let spec = RequestSpec::get("/preanalysis/start/")
            .param("file_id", 42)
            .param("baseline", "v3")
            .params(&extra);

        assert_eq!(spec.query["file_id"], "42");
        assert_eq!(spec.query["baseline"], "v4");
        assert_eq!(spec.query["limit"], "5");
    }

    #[test]
    fn test_into_typed_parses_text() {
        #[derive(Debug, serde::Deserialize)]
        struct Id {
            id: u64,
        }

        let body = ResponseBody::Text("{\"id\": 9}".to_string());
        let id: Id = body.into_typed().unwrap();
        assert_eq!(id.id, 9);

        let bad = ResponseBody::Text("<html>".to_string());
        let err = bad.into_typed::<Id>().unwrap_err();
        assert!(err.to_string().starts_with("bad json"));
    }

    #[test]
    fn test_into_typed_reports_shape_mismatch() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Id {
            id: u64,
        }

        let err = ResponseBody::Json(json!({ "error": "nope" }))
            .into_typed::<Id>()
            .unwrap_err();
        assert!(err.is_protocol());
    }
}
