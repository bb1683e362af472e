#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::unnecessary_literal_bound,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod approval;
pub mod audit;
pub mod config;
pub mod error;
#[doc(hidden)]
pub mod observability;
pub mod pipeline;
pub mod policy;
pub mod scenario;
pub mod scheduler;
pub mod session;
pub mod severity;
pub mod tools;
pub mod units;

pub use config::PraetorConfig;
pub use error::{PraetorError, Result};
pub use pipeline::{PipelineController, RunReport, RunStatus};
pub use scenario::ThreatScenario;
pub use severity::Severity;
