pub mod cli;
#[cfg(feature = "s3")]
pub mod cloud;
pub mod toml_config;
pub mod warehouse;

#[cfg(feature = "cli")]
pub use cli_args::CliConfig;

#[cfg(feature = "cli")]
mod cli_args {
    use crate::core::{ConfigProvider, InvalidRecordPolicy};
    use crate::domain::model::Destination;
    use crate::utils::error::Result;
    use crate::utils::retry::RetryPolicy;
    use crate::utils::validation::{self, Validate};
    use clap::Parser;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    pub const DEFAULT_API_ENDPOINT: &str = "https://data.wa.gov/resource/f6w7-q2d2.json";

    #[derive(Debug, Clone, Serialize, Deserialize, Parser)]
    #[command(name = "ev-elt")]
    #[command(about = "Extract the EV registration feed into a Parquet artifact")]
    pub struct CliConfig {
        #[arg(long, env = "API_ENDPOINT", default_value = DEFAULT_API_ENDPOINT)]
        pub api_endpoint: String,

        /// Local object-store root; artifacts land in `<output_path>/<bucket>/<key>`
        #[arg(long, default_value = "./output")]
        pub output_path: String,

        #[arg(long, env = "EV_BUCKET", default_value = "ev-raw")]
        pub bucket: String,

        /// Base object key; every run derives a timestamped key from it
        #[arg(long, default_value = "raw/ev_registrations.parquet")]
        pub object_key: String,

        /// Per-request timeout in seconds
        #[arg(long, default_value = "30")]
        pub timeout: u64,

        #[arg(long, default_value = "3")]
        pub retry_attempts: u32,

        /// Initial backoff delay in milliseconds
        #[arg(long, default_value = "500")]
        pub retry_delay_ms: u64,

        /// What to do with records that fail validation: skip or fail
        #[arg(long, default_value = "skip")]
        pub on_invalid: InvalidRecordPolicy,

        /// Overall time budget in seconds (0 disables it)
        #[arg(long, default_value = "300")]
        pub invocation_timeout: u64,

        #[arg(long, help = "Enable verbose output")]
        pub verbose: bool,

        #[arg(long, help = "Log CPU and memory usage per phase")]
        pub monitor: bool,
    }

    impl ConfigProvider for CliConfig {
        fn api_endpoint(&self) -> &str {
            &self.api_endpoint
        }

        fn destination(&self) -> Destination {
            Destination::new(self.bucket.clone(), self.object_key.clone())
        }

        fn request_timeout(&self) -> Duration {
            Duration::from_secs(self.timeout)
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::new(
                self.retry_attempts,
                Duration::from_millis(self.retry_delay_ms),
            )
        }

        fn invalid_record_policy(&self) -> InvalidRecordPolicy {
            self.on_invalid
        }

        fn invocation_timeout(&self) -> Option<Duration> {
            (self.invocation_timeout > 0).then(|| Duration::from_secs(self.invocation_timeout))
        }
    }

    impl Validate for CliConfig {
        fn validate(&self) -> Result<()> {
            validation::validate_url("api_endpoint", &self.api_endpoint)?;
            validation::validate_path("output_path", &self.output_path)?;
            validation::validate_bucket_name("bucket", &self.bucket)?;
            validation::validate_object_key("object_key", &self.object_key)?;
            validation::validate_range("timeout", self.timeout, 1, 600)?;
            validation::validate_range("retry_attempts", self.retry_attempts, 1, 10)?;

            tracing::debug!("✅ CLI configuration validation passed");
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_defaults_point_at_the_public_feed() {
            let config = CliConfig::parse_from(["ev-elt"]);
            assert_eq!(config.api_endpoint, DEFAULT_API_ENDPOINT);
            assert_eq!(
                config.destination(),
                Destination::new("ev-raw", "raw/ev_registrations.parquet")
            );
            assert_eq!(config.invalid_record_policy(), InvalidRecordPolicy::Skip);
            assert_eq!(config.invocation_timeout(), Some(Duration::from_secs(300)));
            assert!(config.validate().is_ok());
        }

        #[test]
        fn test_flags_override_defaults() {
            let config = CliConfig::parse_from([
                "ev-elt",
                "--bucket",
                "ev-landing",
                "--on-invalid",
                "fail",
                "--invocation-timeout",
                "0",
                "--retry-attempts",
                "5",
            ]);
            assert_eq!(config.destination().bucket, "ev-landing");
            assert_eq!(config.invalid_record_policy(), InvalidRecordPolicy::Fail);
            assert_eq!(config.invocation_timeout(), None);
            assert_eq!(config.retry_policy().max_attempts, 5);
        }

        #[test]
        fn test_validation_rejects_bad_bucket() {
            let config = CliConfig::parse_from(["ev-elt", "--bucket", "EV_Raw!"]);
            assert!(config.validate().is_err());
        }
    }
}
