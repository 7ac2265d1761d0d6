// S3 client backed by the rust-s3 crate.
// Credentials are static and bound once at construction; a `Bucket` handle is
// derived per call because rust-s3 scopes every request to one bucket.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::{ListPage, ObjectBackend, ObjectRef};
use crate::config::S3Config;
use crate::types::{ConfigError, PresignMethod, StorageError, StorageResult};

/// Concurrent single-object deletes issued per listing page.
const DELETE_FAN_OUT: usize = 8;

pub struct S3Backend {
    region: Region,
    credentials: Credentials,
    path_style: bool,
}

impl S3Backend {
    pub fn new(config: &S3Config) -> Result<Self, ConfigError> {
        let creds = config.credentials()?;

        let region = match config.endpoint.as_deref() {
            Some(endpoint) if !endpoint.trim().is_empty() => Region::Custom {
                region: creds.region.to_string(),
                endpoint: endpoint.trim_end_matches('/').to_string(),
            },
            _ => creds.region.parse::<Region>().map_err(|e| ConfigError::Invalid {
                key: "s3.region",
                message: e.to_string(),
            })?,
        };

        let credentials = Credentials::new(
            Some(creds.access_key_id),
            Some(creds.secret_access_key),
            None,
            None,
            None,
        )
        .map_err(|e| ConfigError::Invalid {
            key: "s3.aws_access_key_id",
            message: e.to_string(),
        })?;

        Ok(Self {
            region,
            credentials,
            path_style: config.path_style,
        })
    }

    fn bucket(&self, name: &str) -> StorageResult<Bucket> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map_err(|e| StorageError::InvalidInput(format!("bucket {}: {}", name, e)))?;
        Ok(if self.path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }
}

/// Translate a rust-s3 failure for `object` into the storage taxonomy.
fn map_s3_error(object: &str, err: S3Error) -> StorageError {
    match err {
        S3Error::HttpFailWithBody(404, _) => StorageError::NotFound(object.to_string()),
        S3Error::HttpFailWithBody(status, body) => StorageError::TransferFailed {
            status: Some(status),
            message: body,
        },
        S3Error::Io(e) => StorageError::TransferFailed {
            status: None,
            message: e.to_string(),
        },
        other => StorageError::BackendUnavailable(format!("{}: {}", object, other)),
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    fn signature_version(&self) -> &'static str {
        "4"
    }

    fn region(&self) -> String {
        self.region.to_string()
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> StorageResult<ListPage> {
        let handle = self.bucket(bucket)?;
        let (result, _status) = handle
            .list_page(prefix.to_string(), None, continuation_token, None, None)
            .await
            .map_err(|e| map_s3_error(bucket, e))?;

        let keys: Vec<String> = result.contents.into_iter().map(|o| o.key).collect();
        debug!(bucket, prefix, page = keys.len(), "Listed objects page");
        Ok(ListPage {
            keys,
            next_continuation_token: result.next_continuation_token.filter(|t| !t.is_empty()),
        })
    }

    async fn put_object(&self, object: &ObjectRef, data: &[u8], content_type: &str) -> StorageResult<()> {
        let handle = self.bucket(&object.bucket)?;
        handle
            .put_object_with_content_type(&object.key, data, content_type)
            .await
            .map_err(|e| map_s3_error(&object.to_string(), e))?;
        Ok(())
    }

    async fn put_stream(
        &self,
        object: &ObjectRef,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StorageResult<()> {
        let handle = self.bucket(&object.bucket)?;
        let mut reader = reader;
        handle
            .put_object_stream(&mut reader, &object.key)
            .await
            .map_err(|e| map_s3_error(&object.to_string(), e))?;
        Ok(())
    }

    async fn get_object(&self, object: &ObjectRef) -> StorageResult<Bytes> {
        let handle = self.bucket(&object.bucket)?;
        let response = handle
            .get_object(&object.key)
            .await
            .map_err(|e| map_s3_error(&object.to_string(), e))?;
        Ok(response.bytes().clone())
    }

    async fn get_to_writer(
        &self,
        object: &ObjectRef,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> StorageResult<()> {
        let handle = self.bucket(&object.bucket)?;
        let mut writer = writer;
        handle
            .get_object_to_writer(&object.key, &mut writer)
            .await
            .map_err(|e| map_s3_error(&object.to_string(), e))?;
        Ok(())
    }

    async fn delete_object(&self, object: &ObjectRef) -> StorageResult<()> {
        let handle = self.bucket(&object.bucket)?;
        match handle.delete_object(&object.key).await {
            Ok(_) => Ok(()),
            // Some S3-compatible stores answer 404 for a missing key instead of 204.
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(()),
            Err(e) => Err(map_s3_error(&object.to_string(), e)),
        }
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StorageResult<usize> {
        let handle = self.bucket(bucket)?;
        let handle = &handle;
        stream::iter(keys.to_vec())
            .map(|key| async move {
                match handle.delete_object(&key).await {
                    Ok(_) | Err(S3Error::HttpFailWithBody(404, _)) => Ok(()),
                    Err(e) => Err(map_s3_error(&format!("{}/{}", bucket, key), e)),
                }
            })
            .buffer_unordered(DELETE_FAN_OUT)
            .try_collect::<Vec<()>>()
            .await
            .map(|done| done.len())
    }

    async fn presign(&self, object: &ObjectRef, method: PresignMethod, expiry_secs: u32) -> StorageResult<String> {
        let handle = self.bucket(&object.bucket)?;
        let signed = match method {
            PresignMethod::Put => handle.presign_put(&object.key, expiry_secs, None).await,
            PresignMethod::Get => handle.presign_get(&object.key, expiry_secs, None).await,
        };
        signed.map_err(|e| StorageError::SigningFailed(format!("{}: {}", object, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageProvider;
    use crate::storage::Storage;
    use mockito::{Matcher, Server};
    use std::sync::Arc;
    use std::time::Duration;

    fn config(endpoint: Option<&str>) -> S3Config {
        S3Config {
            provider: StorageProvider::S3,
            aws_access_key_id: Some("AKIDEXAMPLE".to_string()),
            aws_secret_access_key: Some("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string()),
            region: Some("ap-southeast-1".to_string()),
            endpoint: endpoint.map(str::to_string),
            path_style: endpoint.is_some(),
            request_timeout_secs: 30,
            transfer_timeout_secs: 3600,
            memory_page_size: 1000,
        }
    }

    #[test]
    fn test_requires_credentials() {
        let mut cfg = config(None);
        cfg.aws_secret_access_key = None;
        assert!(matches!(
            S3Backend::new(&cfg),
            Err(ConfigError::Missing("s3.aws_secret_access_key"))
        ));
    }

    #[test]
    fn test_custom_endpoint_region() {
        let backend = S3Backend::new(&config(Some("http://localhost:9000/"))).unwrap();
        assert_eq!(backend.signature_version(), "4");
        assert!(matches!(
            &backend.region,
            Region::Custom { endpoint, .. } if endpoint == "http://localhost:9000"
        ));
    }

    #[tokio::test]
    async fn test_presign_put_embeds_signature_and_expiry() {
        let backend = S3Backend::new(&config(None)).unwrap();
        let object = ObjectRef::new("my-bucket", "uploads/report.pdf").unwrap();

        let url = backend.presign(&object, PresignMethod::Put, 3600).await.unwrap();
        assert!(url.contains("uploads/report.pdf"));
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("X-Amz-Credential=AKIDEXAMPLE"));
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            map_s3_error("b/k", S3Error::HttpFailWithBody(404, "NoSuchKey".into())),
            StorageError::NotFound(_)
        ));
        assert!(matches!(
            map_s3_error("b/k", S3Error::HttpFailWithBody(403, "AccessDenied".into())),
            StorageError::TransferFailed { status: Some(403), .. }
        ));
    }

    fn list_body(keys: &[&str], next_token: Option<&str>) -> String {
        let contents: String = keys
            .iter()
            .map(|key| {
                format!(
                    "<Contents><Key>{}</Key><LastModified>2024-01-01T00:00:00.000Z</LastModified>\
                     <ETag>\"d41d8cd98f00b204e9800998ecf8427e\"</ETag><Size>1</Size>\
                     <StorageClass>STANDARD</StorageClass></Contents>",
                    key
                )
            })
            .collect();
        let next = next_token
            .map(|t| format!("<NextContinuationToken>{}</NextContinuationToken>", t))
            .unwrap_or_default();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <Name>bucket</Name><Prefix>logs/</Prefix><KeyCount>{}</KeyCount><MaxKeys>1000</MaxKeys>\
             <IsTruncated>{}</IsTruncated>{}{}</ListBucketResult>",
            keys.len(),
            next_token.is_some(),
            next,
            contents
        )
    }

    fn backend_for(server: &Server) -> S3Backend {
        S3Backend::new(&config(Some(&server.url()))).unwrap()
    }

    #[tokio::test]
    async fn test_count_follows_continuation_token() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("GET", Matcher::Regex(r"^/bucket/\?".to_string()))
            .with_status(200)
            .with_header("content-type", "application/xml")
            .with_body(list_body(&["logs/a", "logs/b"], Some("token-1")))
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock(
                "GET",
                Matcher::Regex(r"^/bucket/\?.*continuation-token=token-1".to_string()),
            )
            .with_status(200)
            .with_header("content-type", "application/xml")
            .with_body(list_body(&["logs/c"], None))
            .expect(1)
            .create_async()
            .await;

        let storage = Storage::new(Arc::new(backend_for(&server)), Duration::from_secs(5));
        assert_eq!(storage.count_objects("bucket", "logs/").await.unwrap(), 3);

        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_put_then_get_object() {
        let mut server = Server::new_async().await;
        let put = server
            .mock("PUT", "/bucket/dir/a.txt")
            .match_header("content-type", "text/plain")
            .match_body("hello")
            .with_status(200)
            .create_async()
            .await;
        let get = server
            .mock("GET", "/bucket/dir/a.txt")
            .with_status(200)
            .with_body("hello")
            .create_async()
            .await;

        let backend = backend_for(&server);
        let object = ObjectRef::new("bucket", "dir/a.txt").unwrap();
        backend.put_object(&object, b"hello", "text/plain").await.unwrap();
        assert_eq!(backend.get_object(&object).await.unwrap().as_ref(), b"hello");

        put.assert_async().await;
        get.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_object_on_download_and_delete() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/bucket/ghost")
            .with_status(404)
            .with_body("<Error><Code>NoSuchKey</Code></Error>")
            .create_async()
            .await;
        server
            .mock("DELETE", "/bucket/ghost")
            .with_status(404)
            .with_body("<Error><Code>NoSuchKey</Code></Error>")
            .create_async()
            .await;

        let backend = backend_for(&server);
        let object = ObjectRef::new("bucket", "ghost").unwrap();

        let mut sink = Vec::new();
        let err = backend.get_to_writer(&object, &mut sink).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(sink.is_empty());

        backend.delete_object(&object).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_objects_issues_one_delete_per_key() {
        let mut server = Server::new_async().await;
        let mut mocks = Vec::new();
        for i in 0..3 {
            mocks.push(
                server
                    .mock("DELETE", format!("/bucket/tmp/{}", i).as_str())
                    .with_status(204)
                    .expect(1)
                    .create_async()
                    .await,
            );
        }

        let backend = backend_for(&server);
        let keys: Vec<String> = (0..3).map(|i| format!("tmp/{}", i)).collect();
        assert_eq!(backend.delete_objects("bucket", &keys).await.unwrap(), 3);
        for mock in mocks {
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_delete_objects_surfaces_rejection() {
        let mut server = Server::new_async().await;
        server
            .mock("DELETE", "/bucket/locked")
            .with_status(403)
            .with_body("AccessDenied")
            .create_async()
            .await;

        let backend = backend_for(&server);
        let err = backend
            .delete_objects("bucket", &["locked".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::TransferFailed { status: Some(403), ref message } if message == "AccessDenied"
        ));
    }
}
