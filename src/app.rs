use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::settings::AppConfig;
use crate::infrastructure::queue::rabbitmq::{RabbitMqService, ResultPublisher};
use crate::infrastructure::storage::s3::StorageService;
use crate::modules::transcode::ffmpeg::FfmpegTranscoder;
use crate::modules::transcode::layout::OutputLayout;
use crate::modules::transcode::service::TranscodePipeline;
use crate::state::AppState;

/// Connects every external dependency. Any failure here is fatal at startup.
pub async fn create_state(config: AppConfig) -> Result<AppState> {
    let queue = RabbitMqService::new(&config.amqp_url).await?;
    queue
        .declare_queues(&[config.transcode_queue.as_str(), config.transcoded_queue.as_str()])
        .await?;

    let storage = StorageService::new(
        &config.minio_url,
        &config.minio_bucket,
        &config.minio_access_key,
        &config.minio_secret_key,
        &config.storage_region,
    )
    .await;

    let transcoder = FfmpegTranscoder::new(config.preview_seconds, config.ffmpeg_timeout)?;
    info!("✅ ffmpeg and ffprobe found");

    tokio::fs::create_dir_all(&config.work_dir).await?;
    let layout = OutputLayout::new(config.work_dir.clone(), config.public_base_url.clone())?;

    let publisher = ResultPublisher::new(queue.clone(), config.transcoded_queue.clone());
    let pipeline = TranscodePipeline::new(
        layout,
        Arc::new(transcoder),
        Arc::new(storage),
        Arc::new(publisher),
    );

    Ok(AppState::new(config, queue, Arc::new(pipeline)))
}
