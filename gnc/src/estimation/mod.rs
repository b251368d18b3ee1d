//! Sensor fusion pipeline.
//!
//! A [`pipeline::FilterPipeline`] runs an ordered list of
//! [`filter::StateFilter`] stages over a shared [`state::StateEstimation`]
//! record. Each stage consumes the fresh sensor values it needs and marks
//! the values it produces.

pub mod alarm;
pub mod deltatime;
pub mod filter;
pub mod filters;
pub mod pipeline;
pub mod settings;
pub mod state;

pub use filter::{FilterInitError, FilterResult, StateFilter};
pub use pipeline::{FilterPipeline, PipelineError, StageKind, stage_kinds};
pub use settings::{EstimationSettings, FusionAlgorithm, HomeLocation};
pub use state::{SensorUpdates, StateEstimation};
