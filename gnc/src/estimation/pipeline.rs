use alloc::boxed::Box;
use core::fmt;

use heapless::Vec;
use thiserror::Error;

use super::{
    filter::{FilterInitError, FilterResult, StateFilter},
    filters::{
        AirFilter, BaroFilter, ComplementaryFilter, EkfFilter, MagFilter, StationaryFilter,
        VelocityFilter,
    },
    settings::{EstimationSettings, FusionAlgorithm},
    state::StateEstimation,
};
use crate::Instant;

pub const MAX_STAGES: usize = 8;

/// Catalog of the available pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StageKind {
    Mag,
    Air,
    Baro,
    BaroIndoor,
    Stationary,
    Ekf,
    EkfNavOnly,
    EkfIndoor,
    EkfIndoorNavOnly,
    Velocity,
    Complementary,
    ComplementaryMag,
}

impl StageKind {
    fn instantiate(self) -> Box<dyn StateFilter + Send> {
        match self {
            StageKind::Mag => Box::new(MagFilter::new()),
            StageKind::Air => Box::new(AirFilter::new()),
            StageKind::Baro => Box::new(BaroFilter::with_gps()),
            StageKind::BaroIndoor => Box::new(BaroFilter::indoor()),
            StageKind::Stationary => Box::new(StationaryFilter),
            StageKind::Ekf => Box::new(EkfFilter::gps()),
            StageKind::EkfNavOnly => Box::new(EkfFilter::gps_nav_only()),
            StageKind::EkfIndoor => Box::new(EkfFilter::indoor()),
            StageKind::EkfIndoorNavOnly => Box::new(EkfFilter::indoor_nav_only()),
            StageKind::Velocity => Box::new(VelocityFilter::new()),
            StageKind::Complementary => Box::new(ComplementaryFilter::new()),
            StageKind::ComplementaryMag => Box::new(ComplementaryFilter::with_mag()),
        }
    }
}

/// Ordered stages run for each fusion algorithm.
pub fn stage_kinds(algorithm: FusionAlgorithm) -> &'static [StageKind] {
    use StageKind::*;

    match algorithm {
        FusionAlgorithm::AcroNoSensors => &[Complementary],
        FusionAlgorithm::BasicComplementary => &[Air, BaroIndoor, Complementary],
        FusionAlgorithm::ComplementaryMag => &[Mag, Air, BaroIndoor, ComplementaryMag],
        FusionAlgorithm::ComplementaryMagGpsOutdoor => &[Mag, Air, Baro, ComplementaryMag],
        FusionAlgorithm::Ins13Indoor => &[Mag, Air, BaroIndoor, Stationary, EkfIndoor, Velocity],
        FusionAlgorithm::GpsNavigationIns13 => &[Mag, Air, Baro, Ekf, Velocity],
        FusionAlgorithm::GpsNavigationIns13Cf => {
            &[Mag, Air, Baro, EkfNavOnly, Velocity, ComplementaryMag]
        }
        FusionAlgorithm::TestingInsIndoorCf => &[
            Mag,
            Air,
            BaroIndoor,
            Stationary,
            EkfIndoorNavOnly,
            Velocity,
            ComplementaryMag,
        ],
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PipelineError {
    #[error("Too many stages, at most {MAX_STAGES} are supported")]
    TooManyStages,

    #[error("Stage '{stage}' rejected its configuration")]
    StageInit {
        stage: &'static str,
        #[source]
        source: FilterInitError,
    },
}

pub struct FilterPipelineBuilder {
    stages: Vec<Box<dyn StateFilter + Send>, MAX_STAGES>,
}

impl FilterPipelineBuilder {
    pub fn new() -> Self {
        FilterPipelineBuilder { stages: Vec::new() }
    }

    pub fn add_stage<T>(&mut self, stage: T) -> Result<(), PipelineError>
    where
        T: StateFilter + Send + 'static,
    {
        self.push(Box::new(stage))
    }

    fn push(&mut self, stage: Box<dyn StateFilter + Send>) -> Result<(), PipelineError> {
        self.stages
            .push(stage)
            .map_err(|_| PipelineError::TooManyStages)
    }

    /// Initializes every stage with `settings`. Fails on the first stage
    /// that rejects them.
    pub fn build(
        mut self,
        algorithm: FusionAlgorithm,
        settings: &EstimationSettings,
    ) -> Result<FilterPipeline, PipelineError> {
        init_stages(&mut self.stages, settings)?;
        Ok(FilterPipeline {
            algorithm,
            stages: self.stages,
        })
    }
}

impl Default for FilterPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn init_stages(
    stages: &mut [Box<dyn StateFilter + Send>],
    settings: &EstimationSettings,
) -> Result<(), PipelineError> {
    for stage in stages.iter_mut() {
        stage
            .init(settings)
            .map_err(|source| PipelineError::StageInit {
                stage: stage.name(),
                source,
            })?;
    }
    Ok(())
}

/// Ordered chain of filter stages sharing one [`StateEstimation`] record.
pub struct FilterPipeline {
    algorithm: FusionAlgorithm,
    stages: Vec<Box<dyn StateFilter + Send>, MAX_STAGES>,
}

impl FilterPipeline {
    pub fn build(
        algorithm: FusionAlgorithm,
        settings: &EstimationSettings,
    ) -> Result<Self, PipelineError> {
        let mut builder = FilterPipelineBuilder::new();
        for kind in stage_kinds(algorithm) {
            builder.push(kind.instantiate())?;
        }
        builder.build(algorithm, settings)
    }

    pub fn algorithm(&self) -> FusionAlgorithm {
        self.algorithm
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stages.iter().map(|s| s.name())
    }

    /// Runs all stages in order and returns the worst result.
    pub fn run(&mut self, now: Instant, state: &mut StateEstimation) -> FilterResult {
        self.stages
            .iter_mut()
            .map(|stage| stage.filter(now, state))
            .fold(FilterResult::Uninitialised, FilterResult::max)
    }
}

impl fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("algorithm", &self.algorithm)
            .field("stages", &self.stages.len())
            .finish()
    }
}
