//! Resource client for the audio-separation service
//!
//! One method per remote resource. Each operation composes its path and
//! default query parameters, merges the caller's extra parameters over them
//! (caller values win) and delegates to the shared [`Transport`].

use crate::error::{ClientError, ClientResult};
use crate::models::{
    Algorithm, AudioFile, AudioFileListing, Configuration, DownloadOutcome, FilesResponse,
    JobStatus, Params, PreAnalysisJob, ResourceKind, SeparationJob,
};
use crate::transport::{RequestSpec, ResponseBody, Transport};
use crate::workflow::poller::StatusSource;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};
use trax_common::config::{is_valid_key, ClientConfig};
use trax_common::fileutil;

/// Baseline version sent with pre-analysis requests unless overridden
pub const DEFAULT_BASELINE: &str = "v3";

/// Multipart field carrying the uploaded audio
const UPLOAD_FIELD: &str = "file";

/// Client for the audio-separation REST API
pub struct TraxClient {
    transport: Transport,
}

impl TraxClient {
    /// Create a client
    ///
    /// Blank credentials are rejected here, before any request is made.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        if !is_valid_key(&config.credentials.access_key) {
            return Err(ClientError::MissingCredentials("access key is empty".to_string()));
        }
        if !is_valid_key(&config.credentials.access_secret) {
            return Err(ClientError::MissingCredentials(
                "access secret is empty".to_string(),
            ));
        }

        Ok(Self {
            transport: Transport::new(config)?,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        self.transport.config()
    }

    /// Send an arbitrary request through the shared transport
    pub async fn request(&self, spec: RequestSpec) -> ClientResult<ResponseBody> {
        self.transport.execute(spec).await
    }

    /// Upload a local audio file
    ///
    /// The file is read before any network call; a read failure is
    /// [`ClientError::MediaRead`].
    pub async fn upload(&self, path: &Path, params: &Params) -> ClientResult<AudioFile> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ClientError::MediaRead {
                path: path.to_path_buf(),
                source,
            })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.wav".to_string());

        debug!(path = %path.display(), bytes = bytes.len(), "Uploading audio file");

        let spec = RequestSpec::post("/audiofile/")
            .params(params)
            .multipart(UPLOAD_FIELD, file_name, bytes);

        let file: AudioFile = self.transport.execute_typed(spec).await?;
        info!(file_id = file.id, valid = ?file.is_valid, "Audio file uploaded");
        Ok(file)
    }

    /// Start a pre-analysis job
    ///
    /// `baseline` defaults to [`DEFAULT_BASELINE`].
    pub async fn preanalysis(
        &self,
        file_id: u64,
        algo: Algorithm,
        baseline: Option<&str>,
        params: &Params,
    ) -> ClientResult<PreAnalysisJob> {
        let spec = RequestSpec::get("/preanalysis/start/")
            .param("file_id", file_id)
            .param("algo", algo.as_str())
            .param("baseline", baseline.unwrap_or(DEFAULT_BASELINE))
            .params(params);

        let job: PreAnalysisJob = self.transport.execute_typed(spec).await?;
        info!(
            preanalysis_id = job.id,
            file_id = file_id,
            algo = %algo,
            "Pre-analysis started"
        );
        Ok(job)
    }

    /// Start a separation job, optionally guided by a configuration
    pub async fn separation(
        &self,
        file_id: u64,
        config_id: Option<u64>,
        params: &Params,
    ) -> ClientResult<SeparationJob> {
        let mut spec = RequestSpec::get("/separation/").param("file_id", file_id);
        if let Some(config_id) = config_id {
            spec = spec.param("config_id", config_id);
        }
        let spec = spec.params(params);

        let job: SeparationJob = self.transport.execute_typed(spec).await?;
        info!(
            separation_id = job.id,
            file_id = file_id,
            config_id = ?config_id,
            "Separation started"
        );
        Ok(job)
    }

    /// Fetch one audio file by id, or the paginated listing
    pub async fn files(&self, file_id: Option<u64>, params: &Params) -> ClientResult<FilesResponse> {
        match file_id {
            Some(id) => {
                let spec = RequestSpec::get(format!("/audiofile/{}/", id)).params(params);
                let file: AudioFile = self.transport.execute_typed(spec).await?;
                Ok(FilesResponse::Single(file))
            }
            None => {
                let spec = RequestSpec::get("/audiofile/").params(params);
                let listing: AudioFileListing = self.transport.execute_typed(spec).await?;
                Ok(FilesResponse::Listing(listing))
            }
        }
    }

    /// Fetch the status record of a job
    pub async fn status(
        &self,
        kind: ResourceKind,
        job_id: u64,
        params: &Params,
    ) -> ClientResult<JobStatus> {
        let spec = RequestSpec::get(format!("/{}/{}/", kind.as_str(), job_id)).params(params);
        let status: JobStatus = self.transport.execute_typed(spec).await?;
        debug!(
            resource = %kind,
            job_id = job_id,
            status = status.status,
            "Fetched job status"
        );
        Ok(status)
    }

    /// Download an audio file (typically the extracted result) to `dest`
    pub async fn download(
        &self,
        pk: u64,
        dest: &Path,
        params: &Params,
    ) -> ClientResult<DownloadOutcome> {
        let spec = RequestSpec::get("/audiofile/").param("pk", pk).params(params);
        let outcome = self.transport.stream_to_file(spec, dest).await?;
        log_outcome("download", pk, &outcome);
        Ok(outcome)
    }

    /// Download the annotation artifact of a finished pre-analysis job to `dest`
    pub async fn annotation(
        &self,
        preanalysis_id: u64,
        dest: &Path,
        params: &Params,
    ) -> ClientResult<DownloadOutcome> {
        let spec =
            RequestSpec::get(format!("/preanalysis/{}/result/", preanalysis_id)).params(params);
        let outcome = self.transport.stream_to_file(spec, dest).await?;
        log_outcome("annotation", preanalysis_id, &outcome);
        Ok(outcome)
    }

    /// Upload a configuration document
    pub async fn configuration(&self, payload: &Value, params: &Params) -> ClientResult<Configuration> {
        let spec = RequestSpec::post("/configuration/")
            .params(params)
            .json(payload.clone());

        let configuration: Configuration = self.transport.execute_typed(spec).await?;
        info!(configuration_id = configuration.id, "Configuration uploaded");
        Ok(configuration)
    }

    /// Read a JSON artifact and upload it as a configuration
    pub async fn configuration_from_file(
        &self,
        path: &Path,
        params: &Params,
    ) -> ClientResult<Configuration> {
        let payload: Value = fileutil::read_json_async(path).await?;
        self.configuration(&payload, params).await
    }
}

fn log_outcome(what: &str, id: u64, outcome: &DownloadOutcome) {
    match outcome {
        DownloadOutcome::Written { path, bytes } => {
            info!(id = id, path = %path.display(), bytes = *bytes, "{} written", what)
        }
        DownloadOutcome::Skipped { status } => {
            info!(id = id, status = *status, "{} not available, nothing written", what)
        }
    }
}

#[async_trait]
impl StatusSource for TraxClient {
    async fn fetch_status(&self, kind: ResourceKind, job_id: u64) -> ClientResult<JobStatus> {
        self.status(kind, job_id, &Params::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trax_common::config::Credentials;

    #[test]
    fn test_blank_credentials_rejected() {
        let result = TraxClient::new(ClientConfig::new(Credentials::new("", "secret")));
        assert!(matches!(result, Err(ClientError::MissingCredentials(_))));

        let result = TraxClient::new(ClientConfig::new(Credentials::new("key", "  ")));
        assert!(matches!(result, Err(ClientError::MissingCredentials(_))));
    }

    #[tokio::test]
    async fn test_upload_missing_file_is_media_read_error() {
        // Unroutable host: a network attempt would fail with a different variant
        let config = ClientConfig::new(Credentials::new("key", "secret"))
            .with_secure(false)
            .with_host("127.0.0.1")
            .with_port(Some(9));
        let client = TraxClient::new(config).unwrap();

        let err = client
            .upload(Path::new("/nonexistent/sample.wav"), &Params::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::MediaRead { .. }));
    }
}
