//! trax-client library interface
//!
//! Client for a cloud audio-separation REST API: upload, pre-analysis,
//! separation, status polling, artifact download and configuration upload,
//! plus the workflow orchestrator chaining them.

pub mod client;
pub mod error;
pub mod models;
pub mod transport;
pub mod workflow;

pub use crate::client::TraxClient;
pub use crate::error::{ClientError, ClientResult};
pub use crate::models::{Algorithm, Params, ResourceKind};
pub use crate::workflow::poller::{JobPoller, PollerConfig, StatusSource};
pub use crate::workflow::{WorkflowConfig, WorkflowOrchestrator, WorkflowReport};
