//! Separation workflow orchestrator
//!
//! # Stage Progression
//! UPLOAD → PREANALYSIS (pitch ∥ csnt) → PREANALYSIS_POLLING (both) →
//! ANNOTATION_DOWNLOAD → MERGE → CONFIGURATION → SEPARATION →
//! SEPARATION_POLLING → DOWNLOAD
//!
//! Each stage's output is the next stage's typed input. No stage starts
//! before its predecessor has reached a terminal state. The two pre-analysis
//! branches run concurrently and a failure in one does not cancel the other:
//! both are awaited, then the first error aborts the workflow.

pub mod poller;

use crate::client::TraxClient;
use crate::error::{ClientError, ClientResult};
use crate::models::{
    Algorithm, AudioFile, Configuration, DownloadOutcome, JobStatus, Params, PreAnalysisJob,
    ResourceKind, SeparationJob,
};
use chrono::Utc;
use poller::{JobPoller, PollerConfig};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use trax_common::annotation;
use trax_common::events::{EventBus, TraxEvent, WorkflowStage};

/// Workflow settings
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Directory receiving annotation artifacts and the extracted audio
    pub work_dir: PathBuf,
    pub poller: PollerConfig,
    /// Pre-analysis baseline; the client default when `None`
    pub baseline: Option<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            poller: PollerConfig::default(),
            baseline: None,
        }
    }
}

/// Everything the workflow produced
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub file: AudioFile,
    pub pitch_job: PreAnalysisJob,
    pub consonant_job: PreAnalysisJob,
    pub pitch_annotation: PathBuf,
    pub consonant_annotation: PathBuf,
    pub merged_configuration: PathBuf,
    pub configuration: Configuration,
    pub separation: SeparationJob,
    pub separation_status: JobStatus,
    pub extracted_file_id: u64,
    pub output: PathBuf,
    pub output_bytes: u64,
}

/// Drives the full upload-to-download pipeline
pub struct WorkflowOrchestrator {
    client: Arc<TraxClient>,
    config: WorkflowConfig,
    events: EventBus,
    cancel: CancellationToken,
}

impl WorkflowOrchestrator {
    pub fn new(client: Arc<TraxClient>, config: WorkflowConfig) -> Self {
        Self {
            client,
            config,
            events: EventBus::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run every stage for the audio file at `audio_path`
    pub async fn run(&self, audio_path: &Path) -> ClientResult<WorkflowReport> {
        let params = Params::new();
        info!(path = %audio_path.display(), "Starting separation workflow");

        // 1. Upload
        let file = self
            .stage(
                WorkflowStage::Upload,
                self.client.upload(audio_path, &params),
                |f: &AudioFile| format!("file_id={}", f.id),
            )
            .await?;

        // 2. Pre-analysis, both algorithms
        let baseline = self.config.baseline.as_deref();
        let (pitch_job, consonant_job) = self
            .stage(
                WorkflowStage::PreAnalysis,
                async {
                    let (pitch, consonant) = tokio::join!(
                        self.client
                            .preanalysis(file.id, Algorithm::Pitch, baseline, &params),
                        self.client
                            .preanalysis(file.id, Algorithm::Consonant, baseline, &params),
                    );
                    Ok::<_, ClientError>((pitch?, consonant?))
                },
                |(p, c): &(PreAnalysisJob, PreAnalysisJob)| {
                    format!("pitch_id={} csnt_id={}", p.id, c.id)
                },
            )
            .await?;

        // 3. Wait for both pre-analysis jobs
        let poller = self.poller();
        self.stage(
            WorkflowStage::PreAnalysisPolling,
            async {
                let (pitch, consonant) = tokio::join!(
                    poller.poll(ResourceKind::PreAnalysis, pitch_job.id),
                    poller.poll(ResourceKind::PreAnalysis, consonant_job.id),
                );
                Ok::<_, ClientError>((pitch?, consonant?))
            },
            |_: &(JobStatus, JobStatus)| "both finished".to_string(),
        )
        .await?;

        // 4. Annotation artifacts
        let pitch_annotation = self.artifact_path(format!("annotation_{}.json", pitch_job.id));
        let consonant_annotation =
            self.artifact_path(format!("annotation_{}.json", consonant_job.id));
        self.stage(
            WorkflowStage::AnnotationDownload,
            async {
                let (pitch, consonant) = tokio::join!(
                    self.fetch_annotation(pitch_job.id, &pitch_annotation),
                    self.fetch_annotation(consonant_job.id, &consonant_annotation),
                );
                pitch?;
                consonant?;
                Ok::<_, ClientError>(())
            },
            |_: &()| "annotations written".to_string(),
        )
        .await?;

        // 5. Merge, consonant keys overwrite pitch keys
        let merged_configuration = self.artifact_path(format!(
            "annotation_{}_{}.json",
            pitch_job.id, consonant_job.id
        ));
        let merged = self
            .stage(
                WorkflowStage::Merge,
                async {
                    annotation::merge_files(
                        &pitch_annotation,
                        &consonant_annotation,
                        &merged_configuration,
                    )
                    .await
                    .map_err(ClientError::from)
                },
                |_| merged_configuration.display().to_string(),
            )
            .await?;

        // 6. Configuration upload
        let configuration = self
            .stage(
                WorkflowStage::Configuration,
                self.client.configuration(&merged, &params),
                |c: &Configuration| format!("config_id={}", c.id),
            )
            .await?;

        // 7. Separation
        let separation = self
            .stage(
                WorkflowStage::Separation,
                self.client.separation(file.id, Some(configuration.id), &params),
                |s: &SeparationJob| format!("separation_id={}", s.id),
            )
            .await?;

        // 8. Wait for separation
        let separation_status = self
            .stage(
                WorkflowStage::SeparationPolling,
                poller.poll(ResourceKind::Separation, separation.id),
                |s: &JobStatus| format!("status={}", s.status),
            )
            .await?;

        // 9. Extracted audio
        let extracted_file_id = match separation_status
            .extracted_file_id
            .or(separation.extracted_file_id)
        {
            Some(id) => id,
            None => {
                let err = ClientError::Protocol {
                    context: "separation finished".to_string(),
                    message: format!("no extracted_file_id for separation {}", separation.id),
                };
                self.fail(WorkflowStage::Download, &err);
                return Err(err);
            }
        };
        let output = self.artifact_path(format!("extracted_{}.wav", extracted_file_id));
        let output_bytes = self
            .stage(
                WorkflowStage::Download,
                async {
                    match self.client.download(extracted_file_id, &output, &params).await? {
                        DownloadOutcome::Written { bytes, .. } => Ok::<_, ClientError>(bytes),
                        DownloadOutcome::Skipped { status } => {
                            Err(ClientError::unexpected_status(status, "extracted audio unavailable"))
                        }
                    }
                },
                |bytes: &u64| format!("{} bytes", bytes),
            )
            .await?;

        info!(
            file_id = file.id,
            separation_id = separation.id,
            output = %output.display(),
            "Separation workflow complete"
        );

        Ok(WorkflowReport {
            file,
            pitch_job,
            consonant_job,
            pitch_annotation,
            consonant_annotation,
            merged_configuration,
            configuration,
            separation,
            separation_status,
            extracted_file_id,
            output,
            output_bytes,
        })
    }

    fn poller(&self) -> JobPoller<TraxClient> {
        JobPoller::new(self.client.clone(), self.config.poller.clone())
            .with_events(self.events.clone())
            .with_cancellation(self.cancel.clone())
    }

    fn artifact_path(&self, name: String) -> PathBuf {
        self.config.work_dir.join(name)
    }

    async fn fetch_annotation(&self, preanalysis_id: u64, dest: &Path) -> ClientResult<()> {
        match self
            .client
            .annotation(preanalysis_id, dest, &Params::new())
            .await?
        {
            DownloadOutcome::Written { .. } => Ok(()),
            DownloadOutcome::Skipped { status } => Err(ClientError::unexpected_status(
                status,
                &format!("annotation for pre-analysis {} unavailable", preanalysis_id),
            )),
        }
    }

    /// Run one stage, reporting start, completion or failure on the bus
    async fn stage<T, F, D>(&self, stage: WorkflowStage, work: F, describe: D) -> ClientResult<T>
    where
        F: Future<Output = ClientResult<T>>,
        D: FnOnce(&T) -> String,
    {
        info!(stage = %stage, "Stage started");
        self.events.emit_lossy(TraxEvent::StageStarted {
            stage,
            timestamp: Utc::now(),
        });

        match work.await {
            Ok(value) => {
                let detail = describe(&value);
                info!(stage = %stage, detail = %detail, "Stage completed");
                self.events.emit_lossy(TraxEvent::StageCompleted {
                    stage,
                    detail,
                    timestamp: Utc::now(),
                });
                Ok(value)
            }
            Err(e) => {
                self.fail(stage, &e);
                Err(e)
            }
        }
    }

    fn fail(&self, stage: WorkflowStage, e: &ClientError) {
        error!(stage = %stage, error = %e, "Stage failed");
        self.events.emit_lossy(TraxEvent::StageFailed {
            stage,
            error: e.to_string(),
            timestamp: Utc::now(),
        });
    }
}
