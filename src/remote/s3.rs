//! S3 client over the AWS SDK, path-style so S3-compatible endpoints work too.

use std::time::Duration;

use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials as SdkCredentials, Region, RequestChecksumCalculation};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Output;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::Object;
use chrono::{DateTime, Utc};

use super::{ListPage, ObjectStore, RemoteError, RemoteObject};
use crate::config::Credentials;

const PROVIDER_NAME: &str = "docker-log-harvester";
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct S3Client {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Client {
    /// Region and keys come from `credentials` only; the SDK's own
    /// environment and profile chain is never consulted for them.
    pub async fn new(credentials: &Credentials, timeout: Duration) -> Self {
        let keys = SdkCredentials::new(
            &credentials.access_key_id,
            &credentials.secret_access_key,
            None,
            None,
            PROVIDER_NAME,
        );
        let timeouts = TimeoutConfig::builder()
            .operation_timeout(timeout)
            .connect_timeout(timeout.min(MAX_CONNECT_TIMEOUT))
            .build();
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(credentials.region.clone()))
            .credentials_provider(keys)
            .timeout_config(timeouts)
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired);
        if let Some(url) = &credentials.endpoint_url {
            builder = builder.endpoint_url(url);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: credentials.bucket.clone(),
        }
    }
}

impl ObjectStore for S3Client {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), RemoteError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/gzip")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(remote_error)?;
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, RemoteError> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix);
        if let Some(token) = continuation {
            request = request.continuation_token(token);
        }
        let output = request.send().await.map_err(remote_error)?;
        list_page_from(output)
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(remote_error)?;
        Ok(())
    }
}

fn list_page_from(output: ListObjectsV2Output) -> Result<ListPage, RemoteError> {
    let objects = output
        .contents
        .unwrap_or_default()
        .into_iter()
        .map(remote_object)
        .collect::<Result<Vec<_>, _>>()?;

    let next_token = if output.is_truncated.unwrap_or(false) {
        output.next_continuation_token
    } else {
        None
    };
    Ok(ListPage {
        objects,
        next_token,
    })
}

fn remote_object(object: Object) -> Result<RemoteObject, RemoteError> {
    let key = object
        .key
        .ok_or_else(|| RemoteError::Decode("listed object without a key".to_string()))?;
    let last_modified = object
        .last_modified
        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
        .ok_or_else(|| RemoteError::Decode(format!("{key}: missing or invalid LastModified")))?;
    Ok(RemoteObject {
        key,
        size: object.size.unwrap_or(0).max(0) as u64,
        last_modified,
    })
}

fn remote_error<E>(err: SdkError<E, HttpResponse>) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::TimeoutError(_) => RemoteError::Timeout,
        SdkError::DispatchFailure(failure) if failure.is_timeout() => RemoteError::Timeout,
        SdkError::ServiceError(context) => RemoteError::Status {
            status: context.raw().status().as_u16(),
            body: format!(
                "{}: {}",
                err.code().unwrap_or("Unknown"),
                err.message().unwrap_or_default()
            ),
        },
        SdkError::ResponseError(_) => RemoteError::Decode(DisplayErrorContext(&err).to_string()),
        SdkError::ConstructionFailure(_) => {
            RemoteError::InvalidRequest(DisplayErrorContext(&err).to_string())
        }
        _ => RemoteError::Network(DisplayErrorContext(&err).to_string()),
    }
}
