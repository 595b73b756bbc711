pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod presentation;
pub mod trigger;
pub mod utils;

pub use config::cli::LocalStorage;
#[cfg(feature = "cli")]
pub use config::CliConfig;

#[cfg(feature = "s3")]
pub use config::cloud::{CloudConfig, S3Storage};

pub use core::etl::{run_extraction, run_with_config, EtlEngine, ExtractionOptions, ExtractionSettings};
pub use core::pipeline::RegistrationPipeline;
pub use domain::model::{Destination, EvType, ExtractionResult, RegistrationRecord};
pub use trigger::{handle_trigger, TriggerResponse};
pub use utils::error::{EtlError, Result};
