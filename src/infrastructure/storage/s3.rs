use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::modules::transcode::layout::{JobLayout, MASTER_PLAYLIST_FILE};
use crate::modules::transcode::traits::Uploader;

// Single PUTs are fine below this; larger files go through multipart.
const MULTIPART_THRESHOLD: u64 = 64 * 1024 * 1024;
// S3 requires at least 5MB per part except the last.
const PART_SIZE: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
    pub bucket: String,
}

impl StorageService {
    pub async fn new(
        endpoint: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
        region: &str,
    ) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        let client = Client::from_conf(config);

        info!("✅ Storage client ready for bucket '{}'", bucket);

        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    pub async fn upload_file(&self, key: &str, path: &Path) -> Result<()> {
        let size = tokio::fs::metadata(path).await?.len();
        let content_type = content_type_for(path);
        debug!("Uploading {} ({} bytes, {}) to {}", path.display(), size, content_type, key);

        if size > MULTIPART_THRESHOLD {
            return self.upload_multipart(key, path, &content_type).await;
        }

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to upload {}: {}", key, e))?;
        Ok(())
    }

    async fn upload_multipart(&self, key: &str, path: &Path, content_type: &str) -> Result<()> {
        let upload_id = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to initiate upload of {}: {}", key, e))?
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("No upload id returned for {}", key))?;

        match self.upload_parts(key, &upload_id, path).await {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| anyhow!("Failed to complete upload of {}: {}", key, e))?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!("Failed to abort upload of {}: {}", key, abort_err);
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(&self, key: &str, upload_id: &str, path: &Path) -> Result<Vec<CompletedPart>> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut parts = Vec::new();
        let mut part_number = 1;

        loop {
            let chunk = read_chunk(&mut file, PART_SIZE).await?;
            if chunk.is_empty() {
                break;
            }

            let result = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| anyhow!("Failed to upload part {} of {}: {}", part_number, key, e))?;

            let e_tag = result
                .e_tag()
                .ok_or_else(|| anyhow!("No ETag for part {} of {}", part_number, key))?;
            parts.push(
                CompletedPart::builder()
                    .e_tag(e_tag)
                    .part_number(part_number)
                    .build(),
            );
            part_number += 1;
        }

        Ok(parts)
    }
}

#[async_trait]
impl Uploader for StorageService {
    async fn upload_dir_and_remove(&self, job: &JobLayout) -> Result<()> {
        let files = upload_order(list_files(job.dir()).await?);
        if files.is_empty() {
            bail!("Nothing to upload in {}", job.dir().display());
        }

        info!(
            file_name = %job.file_name(),
            "⬆️ Uploading {} files to {}/{}",
            files.len(),
            self.bucket,
            job.storage_prefix()
        );
        for relative in &files {
            let key = job.storage_key(relative);
            self.upload_file(&key, &job.dir().join(relative)).await?;
        }

        // The objects are safe in storage; a leftover directory is purged by the next run.
        if let Err(e) = tokio::fs::remove_dir_all(job.dir()).await {
            warn!("Failed to remove {}: {}", job.dir().display(), e);
        }
        Ok(())
    }
}

async fn read_chunk(file: &mut tokio::fs::File, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buffer = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = file.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

/// Relative paths of every file below `root`.
async fn list_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(root) {
                files.push(relative.to_path_buf());
            }
        }
    }
    Ok(files)
}

/// Media first, rendition playlists next, master playlist last, so the
/// stream URL never resolves before everything it references exists.
fn upload_order(mut files: Vec<PathBuf>) -> Vec<PathBuf> {
    files.sort_by_key(|path| {
        let rank = if path == Path::new(MASTER_PLAYLIST_FILE) {
            2
        } else if path.extension().is_some_and(|ext| ext == "m3u8") {
            1
        } else {
            0
        };
        (rank, path.clone())
    });
    files
}

fn content_type_for(path: &Path) -> String {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("m3u8") => "application/vnd.apple.mpegurl".to_string(),
        Some("ts") => "video/mp2t".to_string(),
        _ => mime_guess::from_path(path)
            .first_or(mime::APPLICATION_OCTET_STREAM)
            .to_string(),
    }
}
