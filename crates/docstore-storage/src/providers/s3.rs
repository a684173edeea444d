//! S3-compatible object store.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream as S3Body;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::{Bytes, BytesMut};
use futures::stream::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument, warn};

use docstore_core::config::storage::S3StorageConfig;
use docstore_core::error::{AppError, ErrorKind};
use docstore_core::result::AppResult;
use docstore_core::traits::storage::{ByteStream, ObjectStore};

/// Part size for multipart uploads. S3 requires at least 5 MiB for every
/// part except the last.
pub const MULTIPART_PART_SIZE: usize = 8 * 1024 * 1024;

/// Largest source a single `CopyObject` request accepts.
pub const COPY_OBJECT_LIMIT: u64 = 5 * 1024 * 1024 * 1024;

/// Source range per `UploadPartCopy` request when copying larger objects.
const COPY_PART_SIZE: u64 = 512 * 1024 * 1024;

/// Cuts a byte stream into parts of `part_size` bytes. Only the last part
/// may be shorter.
struct PartReader {
    stream: ByteStream,
    part_size: usize,
    buffer: BytesMut,
    exhausted: bool,
    total_bytes: u64,
}

impl PartReader {
    fn new(stream: ByteStream, part_size: usize) -> Self {
        Self {
            stream,
            part_size: part_size.max(1),
            buffer: BytesMut::new(),
            exhausted: false,
            total_bytes: 0,
        }
    }

    /// The next part, or `None` once the stream is drained.
    async fn next_part(&mut self) -> AppResult<Option<Bytes>> {
        while !self.exhausted && self.buffer.len() < self.part_size {
            match self.stream.next().await {
                Some(chunk) => {
                    let chunk = chunk.map_err(|e| {
                        AppError::with_source(ErrorKind::Storage, "Stream read error", e)
                    })?;
                    self.total_bytes += chunk.len() as u64;
                    self.buffer.extend_from_slice(&chunk);
                }
                None => self.exhausted = true,
            }
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let take = self.buffer.len().min(self.part_size);
        Ok(Some(self.buffer.split_to(take).freeze()))
    }

    /// Bytes read from the stream so far.
    fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

/// Inclusive byte ranges covering `size` bytes in steps of `part_size`.
fn copy_ranges(size: u64, part_size: u64) -> Vec<(u64, u64)> {
    let part_size = part_size.max(1);
    (0..size)
        .step_by(usize::try_from(part_size).unwrap_or(usize::MAX))
        .map(|first| (first, (first + part_size).min(size) - 1))
        .collect()
}

/// Object store backed by an S3 bucket.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    part_size: usize,
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("bucket", &self.bucket)
            .field("part_size", &self.part_size)
            .finish()
    }
}

impl S3ObjectStore {
    /// Build a client from configuration.
    ///
    /// Static credentials are used when `access_key` is set; otherwise the
    /// default AWS credential chain applies.
    pub async fn new(config: &S3StorageConfig) -> AppResult<Self> {
        if config.bucket.is_empty() {
            return Err(AppError::configuration("storage.s3.bucket must be set"));
        }

        let region = Region::new(config.region.clone());
        let mut builder = if config.access_key.is_empty() {
            let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(region)
                .load()
                .await;
            aws_sdk_s3::config::Builder::from(&shared)
        } else {
            let credentials = Credentials::new(
                &config.access_key,
                &config.secret_key,
                None,
                None,
                "docstore-storage",
            );
            aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .credentials_provider(credentials)
                .region(region)
        };

        builder = builder.force_path_style(config.force_path_style);
        if !config.endpoint.is_empty() {
            builder = builder.endpoint_url(&config.endpoint);
        }

        info!(bucket = %config.bucket, endpoint = %config.endpoint, "S3 object store initialized");

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            part_size: MULTIPART_PART_SIZE,
        })
    }

    /// Bucket this store writes to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_single(&self, key: &str, data: Bytes) -> AppResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(S3Body::from(data))
            .send()
            .await
            .map_err(|e| storage_error(format!("Failed to put object: {key}"), e))?;
        Ok(())
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> AppResult<CompletedPart> {
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(S3Body::from(data))
            .send()
            .await
            .map_err(|e| storage_error(format!("Failed to upload part {part_number} of {key}"), e))?;

        Ok(CompletedPart::builder()
            .set_e_tag(output.e_tag().map(str::to_string))
            .part_number(part_number)
            .build())
    }

    async fn start_upload(&self, key: &str) -> AppResult<String> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_error(format!("Failed to start upload of {key}"), e))?;
        created
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| AppError::storage(format!("No upload id returned for {key}")))
    }

    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> AppResult<()> {
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| storage_error(format!("Failed to complete upload of {key}"), e))?;
        Ok(())
    }

    /// Upload `first` and the rest of `reader` as parts, then complete.
    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Bytes,
        reader: &mut PartReader,
    ) -> AppResult<()> {
        let mut parts = vec![self.upload_part(key, upload_id, 1, first).await?];
        while let Some(part) = reader.next_part().await? {
            let part_number = parts.len() as i32 + 1;
            parts.push(self.upload_part(key, upload_id, part_number, part).await?);
        }
        self.complete_upload(key, upload_id, parts).await
    }

    /// Server-side copy of a source too large for `CopyObject`.
    async fn copy_parts(&self, from: &str, to: &str, upload_id: &str, size: u64) -> AppResult<()> {
        let mut parts = Vec::new();
        for (index, (first, last)) in copy_ranges(size, COPY_PART_SIZE).into_iter().enumerate() {
            let part_number = index as i32 + 1;
            let output = self
                .client
                .upload_part_copy()
                .bucket(&self.bucket)
                .key(to)
                .upload_id(upload_id)
                .part_number(part_number)
                .copy_source(format!("{}/{}", self.bucket, from))
                .copy_source_range(format!("bytes={first}-{last}"))
                .send()
                .await
                .map_err(|e| {
                    storage_error(format!("Failed to copy part {part_number} of {from}"), e)
                })?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(
                        output
                            .copy_part_result()
                            .and_then(|r| r.e_tag())
                            .map(str::to_string),
                    )
                    .part_number(part_number)
                    .build(),
            );
        }
        self.complete_upload(to, upload_id, parts).await
    }

    /// Size of the object at `key`, or `None` if there is none.
    async fn object_size(&self, key: &str) -> AppResult<Option<u64>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(
                output
                    .content_length()
                    .and_then(|n| u64::try_from(n).ok())
                    .unwrap_or(0),
            )),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(storage_error(format!("Failed to stat object: {key}"), e)),
        }
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(key, upload_id, error = %DisplayErrorContext(&e), "Failed to abort multipart upload");
        }
    }
}

fn storage_error<E>(message: String, err: E) -> AppError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let message = format!("{message}: {}", DisplayErrorContext(&err));
    AppError::with_source(ErrorKind::Storage, message, err)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn backend(&self) -> &str {
        "s3"
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .is_ok())
    }

    #[instrument(skip(self, data))]
    async fn put(&self, key: &str, data: ByteStream) -> AppResult<u64> {
        let mut reader = PartReader::new(data, self.part_size);
        let first = reader.next_part().await?.unwrap_or_default();

        if first.len() < self.part_size {
            self.put_single(key, first).await?;
            debug!(bucket = %self.bucket, key, bytes = reader.total_bytes(), "Stored object");
            return Ok(reader.total_bytes());
        }

        let upload_id = self.start_upload(key).await?;
        if let Err(e) = self.upload_parts(key, &upload_id, first, &mut reader).await {
            self.abort_upload(key, &upload_id).await;
            return Err(e);
        }
        debug!(
            bucket = %self.bucket,
            key,
            bytes = reader.total_bytes(),
            "Stored object via multipart upload"
        );
        Ok(reader.total_bytes())
    }

    #[instrument(skip(self))]
    async fn get_stream(&self, key: &str) -> AppResult<ByteStream> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(ReaderStream::new(output.body.into_async_read()).boxed()),
            Err(e) => {
                let missing = e.as_service_error().is_some_and(|se| se.is_no_such_key())
                    || e.raw_response().is_some_and(|r| r.status().as_u16() == 404);
                if missing {
                    Err(AppError::not_found(format!("Object not found: {key}")))
                } else {
                    Err(storage_error(format!("Failed to get object: {key}"), e))
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn copy(&self, from: &str, to: &str) -> AppResult<()> {
        let size = self
            .object_size(from)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Object not found: {from}")))?;

        if size <= COPY_OBJECT_LIMIT {
            self.client
                .copy_object()
                .bucket(&self.bucket)
                .copy_source(format!("{}/{}", self.bucket, from))
                .key(to)
                .send()
                .await
                .map_err(|e| storage_error(format!("Failed to copy {from} -> {to}"), e))?;
        } else {
            let upload_id = self.start_upload(to).await?;
            if let Err(e) = self.copy_parts(from, to, &upload_id, size).await {
                self.abort_upload(to, &upload_id).await;
                return Err(e);
            }
        }

        debug!(bucket = %self.bucket, from, to, size, "Copied object");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> AppResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_error(format!("Failed to delete object: {key}"), e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn exists(&self, key: &str) -> AppResult<bool> {
        Ok(self.object_size(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn static_config() -> S3StorageConfig {
        S3StorageConfig {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "documents".to_string(),
            access_key: "minio".to_string(),
            secret_key: "minio-secret".to_string(),
            ..S3StorageConfig::default()
        }
    }

    fn stream_of(chunks: Vec<std::io::Result<Bytes>>) -> ByteStream {
        futures::stream::iter(chunks).boxed()
    }

    async fn part_lengths(reader: &mut PartReader) -> Vec<usize> {
        let mut lengths = Vec::new();
        while let Some(part) = reader.next_part().await.unwrap() {
            lengths.push(part.len());
        }
        lengths
    }

    #[tokio::test]
    async fn test_new_with_static_credentials() {
        let store = S3ObjectStore::new(&static_config()).await.unwrap();
        assert_eq!(store.backend(), "s3");
        assert_eq!(store.bucket(), "documents");
    }

    #[tokio::test]
    async fn test_missing_bucket_is_configuration_error() {
        let config = S3StorageConfig {
            bucket: String::new(),
            ..static_config()
        };
        let err = S3ObjectStore::new(&config).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_part_size_meets_s3_minimum() {
        assert!(MULTIPART_PART_SIZE >= 5 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_exactly_one_part() {
        let mut reader = PartReader::new(stream_of(vec![Ok(Bytes::from(vec![1u8; 8]))]), 8);
        assert_eq!(part_lengths(&mut reader).await, vec![8]);
        assert_eq!(reader.total_bytes(), 8);
    }

    #[tokio::test]
    async fn test_one_byte_over_spills_into_second_part() {
        let chunks = vec![Ok(Bytes::from(vec![1u8; 5])), Ok(Bytes::from(vec![2u8; 4]))];
        let mut reader = PartReader::new(stream_of(chunks), 8);

        let first = reader.next_part().await.unwrap().unwrap();
        assert_eq!(&first[..], &[1, 1, 1, 1, 1, 2, 2, 2]);
        let second = reader.next_part().await.unwrap().unwrap();
        assert_eq!(&second[..], &[2]);
        assert!(reader.next_part().await.unwrap().is_none());
        assert_eq!(reader.total_bytes(), 9);
    }

    #[tokio::test]
    async fn test_empty_stream_has_no_parts() {
        let mut reader = PartReader::new(stream_of(Vec::new()), 8);
        assert!(reader.next_part().await.unwrap().is_none());
        assert_eq!(reader.total_bytes(), 0);
    }

    #[tokio::test]
    async fn test_oversized_chunk_is_split() {
        let mut reader = PartReader::new(stream_of(vec![Ok(Bytes::from(vec![0u8; 20]))]), 8);
        assert_eq!(part_lengths(&mut reader).await, vec![8, 8, 4]);
    }

    #[tokio::test]
    async fn test_mid_stream_error_is_a_storage_failure() {
        let chunks = vec![
            Ok(Bytes::from(vec![1u8; 8])),
            Ok(Bytes::from(vec![1u8; 3])),
            Err(std::io::Error::other("connection reset")),
        ];
        let mut reader = PartReader::new(stream_of(chunks), 8);

        assert_eq!(reader.next_part().await.unwrap().unwrap().len(), 8);
        let err = reader.next_part().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Storage);
    }

    #[test]
    fn test_copy_ranges_cover_source() {
        assert_eq!(copy_ranges(10, 4), vec![(0, 3), (4, 7), (8, 9)]);
        assert_eq!(copy_ranges(8, 4), vec![(0, 3), (4, 7)]);
        assert!(copy_ranges(0, 4).is_empty());

        let size = COPY_OBJECT_LIMIT + 1;
        let ranges = copy_ranges(size, COPY_PART_SIZE);
        assert_eq!(ranges.first(), Some(&(0, COPY_PART_SIZE - 1)));
        assert_eq!(ranges.last().map(|r| r.1), Some(size - 1));
        assert!(ranges.windows(2).all(|w| w[1].0 == w[0].1 + 1));
    }

    const NO_SUCH_KEY: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
        <Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message>\
        <RequestId>1</RequestId></Error>";

    /// An endpoint where no object exists: reads and stats answer 404,
    /// deletes answer 204.
    async fn empty_bucket_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(answer_empty_bucket(socket));
            }
        });
        format!("http://{addr}")
    }

    async fn answer_empty_bucket(mut socket: TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let head_end = loop {
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
                match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < head_end + body_len {
                match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
            buf.drain(..head_end + body_len);

            let response = if head.starts_with("delete") {
                "HTTP/1.1 204 No Content\r\n\r\n".to_string()
            } else {
                let body = if head.starts_with("head") { "" } else { NO_SUCH_KEY };
                format!(
                    "HTTP/1.1 404 Not Found\r\ncontent-type: application/xml\r\n\
                     content-length: {}\r\n\r\n{body}",
                    NO_SUCH_KEY.len()
                )
            };
            if socket.write_all(response.as_bytes()).await.is_err() {
                return;
            }
        }
    }

    async fn store_on_empty_bucket() -> S3ObjectStore {
        let config = S3StorageConfig {
            endpoint: empty_bucket_endpoint().await,
            ..static_config()
        };
        S3ObjectStore::new(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_key_is_not_found() {
        let store = store_on_empty_bucket().await;
        let err = store.get_stream("documents/c/absent.pdf").await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_copy_missing_source_is_not_found() {
        let store = store_on_empty_bucket().await;
        let err = store
            .copy("documents/c/absent.pdf", "documents/c/copy.pdf")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_missing_key_does_not_exist_and_deletes_cleanly() {
        let store = store_on_empty_bucket().await;
        assert!(!store.exists("documents/c/absent.pdf").await.unwrap());
        store.delete("documents/c/absent.pdf").await.unwrap();
    }
}
