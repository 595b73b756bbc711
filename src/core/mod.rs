pub mod artifact;
pub mod etl;
pub mod normalize;
pub mod pipeline;
pub mod publish;

pub use crate::domain::model::{RegistrationRecord, TransformResult};
pub use crate::domain::ports::{ConfigProvider, InvalidRecordPolicy, Pipeline, Storage};
pub use crate::utils::error::Result;
