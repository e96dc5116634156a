use std::sync::Arc;

use crate::config::settings::AppConfig;
use crate::infrastructure::queue::rabbitmq::RabbitMqService;
use crate::modules::transcode::service::TranscodePipeline;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub queue: RabbitMqService,
    pub pipeline: Arc<TranscodePipeline>,
}

impl AppState {
    pub fn new(config: AppConfig, queue: RabbitMqService, pipeline: Arc<TranscodePipeline>) -> Self {
        Self {
            config,
            queue,
            pipeline,
        }
    }
}
