use super::{ObjectMetadata, PartCompletionHandle, StorageClient};
use crate::{Config, ObjectReference, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_types::region::Region;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use snafu::prelude::*;
use std::{ops::RangeInclusive, sync::Arc};
use tracing::{debug, instrument};

/// Characters in an object key that must be escaped when the key is used in the `x-amz-copy-source`
/// header.  `/` is left alone since S3 treats it as just another key character there.
const COPY_SOURCE_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Implementation of [`StorageClient`] for S3 and S3-compatible APIs
#[derive(Clone)]
pub struct S3StorageClient {
    inner: Arc<S3Inner>,
}
struct S3Inner {
    client: aws_sdk_s3::Client,
}

impl S3StorageClient {
    /// Construct a client using the endpoint, region and credentials in `config`.
    ///
    /// Anything not specified in `config` is resolved the usual AWS SDK way, from the environment
    /// and the AWS config files.
    pub async fn new(config: &Config) -> Self {
        Self::from_client(make_s3_client(config).await)
    }

    /// Wrap an already-configured AWS SDK client
    pub fn from_client(client: aws_sdk_s3::Client) -> Self {
        Self {
            inner: Arc::new(S3Inner { client }),
        }
    }

    /// The value of the `x-amz-copy-source` header which identifies `source` as the object to copy
    /// from.
    fn copy_source(source: &ObjectReference) -> String {
        format!(
            "{}/{}",
            source.bucket(),
            utf8_percent_encode(source.key(), COPY_SOURCE_ESCAPES)
        )
    }
}

#[async_trait::async_trait]
impl StorageClient for S3StorageClient {
    #[instrument(skip(self, object), fields(object = %object))]
    async fn head_object(
        &self,
        object: &ObjectReference,
        part_number: Option<u32>,
    ) -> Result<ObjectMetadata> {
        let response = self
            .inner
            .client
            .head_object()
            .bucket(object.bucket())
            .key(object.key())
            .set_part_number(part_number.map(sdk_part_number).transpose()?)
            .send()
            .await
            .with_context(|_| crate::error::HeadObjectSnafu {
                bucket: object.bucket().to_string(),
                key: object.key().to_string(),
            })?;

        let e_tag = response
            .e_tag()
            .with_context(|| crate::error::MissingETagSnafu {
                bucket: object.bucket().to_string(),
                key: object.key().to_string(),
            })?
            .to_string();

        debug!(%e_tag, content_range = ?response.content_range(), "Got object metadata");

        Ok(ObjectMetadata {
            e_tag,
            content_range: response.content_range().map(|range| range.to_string()),
            content_length: response
                .content_length()
                .and_then(|length| u64::try_from(length).ok()),
        })
    }

    #[instrument(skip(self, source, target), fields(source = %source, target = %target))]
    async fn copy_object(&self, source: &ObjectReference, target: &ObjectReference) -> Result<()> {
        self.inner
            .client
            .copy_object()
            .bucket(target.bucket())
            .key(target.key())
            .copy_source(Self::copy_source(source))
            .send()
            .await
            .with_context(|_| crate::error::CopyObjectSnafu {
                source_bucket: source.bucket().to_string(),
                source_key: source.key().to_string(),
                bucket: target.bucket().to_string(),
                key: target.key().to_string(),
            })?;

        debug!("Copied object in a single request");

        Ok(())
    }

    #[instrument(skip(self, target), fields(target = %target))]
    async fn create_multipart_upload(&self, target: &ObjectReference) -> Result<String> {
        let response = self
            .inner
            .client
            .create_multipart_upload()
            .bucket(target.bucket())
            .key(target.key())
            .send()
            .await
            .with_context(|_| crate::error::CreateMultipartUploadSnafu {
                bucket: target.bucket().to_string(),
                key: target.key().to_string(),
            })?;

        let upload_id = response
            .upload_id()
            .with_context(|| crate::error::MissingUploadIdSnafu {
                bucket: target.bucket().to_string(),
                key: target.key().to_string(),
            })?
            .to_string();

        debug!(%upload_id, "Started multipart upload");

        Ok(upload_id)
    }

    #[instrument(skip(self, source, target))]
    async fn upload_part_copy(
        &self,
        source: &ObjectReference,
        target: &ObjectReference,
        upload_id: &str,
        part_number: u32,
        byte_range: RangeInclusive<u64>,
    ) -> Result<String> {
        let (first_byte, last_byte) = byte_range.into_inner();

        let response = self
            .inner
            .client
            .upload_part_copy()
            .bucket(target.bucket())
            .key(target.key())
            .upload_id(upload_id)
            .part_number(sdk_part_number(part_number)?)
            .copy_source(Self::copy_source(source))
            .copy_source_range(format!("bytes={first_byte}-{last_byte}"))
            .send()
            .await
            .with_context(|_| crate::error::UploadPartCopySnafu {
                bucket: target.bucket().to_string(),
                key: target.key().to_string(),
                part_number,
                first_byte,
                last_byte,
            })?;

        let e_tag = response
            .copy_part_result()
            .and_then(|result| result.e_tag())
            .with_context(|| crate::error::MissingETagSnafu {
                bucket: target.bucket().to_string(),
                key: target.key().to_string(),
            })?
            .to_string();

        Ok(e_tag)
    }

    #[instrument(skip(self, target, parts), fields(target = %target, parts = parts.len()))]
    async fn complete_multipart_upload(
        &self,
        target: &ObjectReference,
        upload_id: &str,
        parts: Vec<PartCompletionHandle>,
    ) -> Result<()> {
        let completed_parts = parts
            .into_iter()
            .map(|part| {
                Ok(CompletedPart::builder()
                    .part_number(sdk_part_number(part.part_number)?)
                    .e_tag(part.e_tag)
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;

        self.inner
            .client
            .complete_multipart_upload()
            .bucket(target.bucket())
            .key(target.key())
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .with_context(|_| crate::error::CompleteMultipartUploadSnafu {
                bucket: target.bucket().to_string(),
                key: target.key().to_string(),
            })?;

        debug!("Completed multipart upload");

        Ok(())
    }

    #[instrument(skip(self, target), fields(target = %target))]
    async fn abort_multipart_upload(
        &self,
        target: &ObjectReference,
        upload_id: &str,
    ) -> Result<()> {
        self.inner
            .client
            .abort_multipart_upload()
            .bucket(target.bucket())
            .key(target.key())
            .upload_id(upload_id)
            .send()
            .await
            .with_context(|_| crate::error::AbortMultipartUploadSnafu {
                bucket: target.bucket().to_string(),
                key: target.key().to_string(),
                upload_id: upload_id.to_string(),
            })?;

        debug!("Aborted multipart upload");

        Ok(())
    }
}

impl std::fmt::Debug for S3StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3StorageClient")
            .field("client", &"<...>")
            .finish()
    }
}

/// The SDK models part numbers as `i32`
fn sdk_part_number(part_number: u32) -> Result<i32> {
    i32::try_from(part_number)
        .ok()
        .context(crate::error::InvalidPartNumberSnafu { part_number })
}

/// Create a new AWS SDK S3 client, using the region, endpoint and credentials from `config` where
/// they're specified and the default configuration deduced from the environment where they aren't
async fn make_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let region_provider = if let Some(region) = &config.aws_region {
        RegionProviderChain::first_try(Region::new(region.clone()))
    } else {
        // No explicit region; use the environment
        RegionProviderChain::default_provider().or_else("us-east-1")
    };

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);

    if let (Some(access_key_id), Some(secret_access_key)) =
        (&config.aws_access_key_id, &config.aws_secret_access_key)
    {
        loader = loader.credentials_provider(Credentials::from_keys(
            access_key_id,
            secret_access_key,
            None,
        ));
    }

    let aws_config = loader.load().await;

    let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
    if let Some(s3_endpoint) = &config.s3_endpoint {
        // S3-compatible services generally don't do virtual-hosted buckets
        s3_config_builder = s3_config_builder
            .endpoint_url(s3_endpoint.as_str())
            .force_path_style(true);
    }

    aws_sdk_s3::Client::from_conf(s3_config_builder.build())
}
