use crate::constants::{
    ASSUME_ROLE_SESSION_NAME, DEFAULT_ASSUME_ROLE_SESSION_DURATION, MAX_SDK_ATTEMPTS,
};
use crate::error::{self, Result};
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_smithy_types::retry::{RetryConfig, RetryMode};
use log::info;
use std::time::Duration;

/// Set up the config for aws calls in `region`, assuming `assume_role` through `sts` if a role arn
/// is provided. Credentials otherwise come from the default provider chain.
pub async fn aws_config(
    region: &str,
    assume_role: Option<&str>,
    assume_role_session_duration: Option<Duration>,
) -> Result<SdkConfig> {
    if region.is_empty() {
        return error::EnvSetupSnafu {
            what: "a region is required to configure the AWS clients",
        }
        .fail();
    }
    info!("Creating the aws config for region '{}'", region);

    let mut config_loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .retry_config(
            RetryConfig::standard()
                .with_retry_mode(RetryMode::Adaptive)
                .with_max_attempts(MAX_SDK_ATTEMPTS),
        );

    if let Some(role_arn) = assume_role.filter(|arn| !arn.is_empty()) {
        info!("Assuming role '{}'", role_arn);
        let provider = AssumeRoleProvider::builder(role_arn)
            .region(Region::new(region.to_string()))
            .session_name(ASSUME_ROLE_SESSION_NAME)
            .session_length(assume_role_session_duration.unwrap_or(Duration::from_secs(
                DEFAULT_ASSUME_ROLE_SESSION_DURATION,
            )))
            .build()
            .await;
        config_loader = config_loader.credentials_provider(provider);
    }

    Ok(config_loader.load().await)
}
