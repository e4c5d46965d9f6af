//! Shared AWS client configuration for the S3, SQS and SNS sinks.
//!
//! Credentials resolve in order: a static access/secret pair from the
//! sink's `configurations` map, else a shared credentials file plus
//! profile, else the SDK default chain. Region comes from `aws.region`
//! with the usual default.

use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use rivulet_core::spec::{config_str, Configurations};
use tracing::debug;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_PROFILE: &str = "default";

/// Resolve an [`SdkConfig`] from a sink's `configurations` map.
pub async fn sdk_config(configurations: &Configurations) -> SdkConfig {
    let region = config_str(configurations, "aws.region")
        .unwrap_or(DEFAULT_REGION)
        .to_string();
    let profile = config_str(configurations, "aws.profile").unwrap_or(DEFAULT_PROFILE);

    let loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region));

    let access_key = config_str(configurations, "aws.access.key").unwrap_or_default();
    let secret_key = config_str(configurations, "aws.secret.key").unwrap_or_default();
    if !access_key.is_empty() && !secret_key.is_empty() {
        return loader
            .credentials_provider(Credentials::new(access_key, secret_key, None, None, "static"))
            .load()
            .await;
    }

    if let Some(file) = config_str(configurations, "aws.credential.file") {
        if std::path::Path::new(file).exists() {
            let provider = ProfileFileCredentialsProvider::builder()
                .profile_files(
                    ProfileFiles::builder()
                        .with_file(ProfileFileKind::Credentials, file)
                        .build(),
                )
                .profile_name(profile)
                .build();
            return loader.credentials_provider(provider).load().await;
        }

        debug!("aws credential file {file} not found");
    }

    loader.load().await
}
