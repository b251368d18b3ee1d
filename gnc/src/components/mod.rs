pub mod state_estimation;

pub use state_estimation::{
    Schedule, StateEstimationComponent, StateEstimationHarness, TickOutcome,
};
