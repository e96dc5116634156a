//! Recording stand-ins for the transcoder, uploader and result sink.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::error::TranscodeError;
use super::layout::{JobLayout, OutputLayout};
use super::service::TranscodePipeline;
use super::traits::{ResultSink, Transcoder, Uploader};

pub const FULL_RUN: [&str; 6] = [
    "convert",
    "short_clip",
    "renditions",
    "master_playlist",
    "probe_duration",
    "upload",
];

pub fn pipeline(
    work_dir: &Path,
    transcoder: Arc<StubTranscoder>,
    uploader: Arc<StubUploader>,
    sink: Arc<StubSink>,
) -> TranscodePipeline {
    let layout = OutputLayout::new(
        work_dir,
        Url::parse("https://cdn.example.com/videos").unwrap(),
    )
    .unwrap();
    TranscodePipeline::new(layout, transcoder, uploader, sink)
}

/// Ordered log of (namespace, stage) events shared by all stubs.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<(String, &'static str)>>>,
}

impl Recorder {
    pub fn record(&self, namespace: &str, stage: &'static str) {
        self.events.lock().unwrap().push((namespace.to_string(), stage));
    }

    pub fn stages_for(&self, namespace: &str) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, stage)| *stage)
            .collect()
    }
}

pub struct StubTranscoder {
    recorder: Recorder,
    duration: String,
    canonical_bytes: AtomicUsize,
    delay: Duration,
    fail_at: Option<(Option<String>, &'static str)>,
    cancel_at: Option<&'static str>,
}

impl StubTranscoder {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            duration: "12.5".to_string(),
            canonical_bytes: AtomicUsize::new(1024),
            delay: Duration::ZERO,
            fail_at: None,
            cancel_at: None,
        }
    }

    pub fn with_duration(mut self, duration: &str) -> Self {
        self.duration = duration.to_string();
        self
    }

    pub fn with_canonical_bytes(self, bytes: usize) -> Self {
        self.set_canonical_bytes(bytes);
        self
    }

    pub fn set_canonical_bytes(&self, bytes: usize) {
        self.canonical_bytes.store(bytes, Ordering::SeqCst);
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_at(mut self, stage: &'static str) -> Self {
        self.fail_at = Some((None, stage));
        self
    }

    pub fn failing_for(mut self, namespace: &str, stage: &'static str) -> Self {
        self.fail_at = Some((Some(namespace.to_string()), stage));
        self
    }

    /// Fires the job's token from inside `stage`, as a shutdown would.
    pub fn cancelling_at(mut self, stage: &'static str) -> Self {
        self.cancel_at = Some(stage);
        self
    }

    async fn step(
        &self,
        job: &JobLayout,
        stage: &'static str,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        self.recorder.record(job.file_name(), stage);
        if self.cancel_at == Some(stage) {
            cancel.cancel();
            return Err(TranscodeError::Cancelled);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some((namespace, failing)) = &self.fail_at {
            let applies = namespace.as_deref().is_none_or(|ns| ns == job.file_name());
            if applies && *failing == stage {
                return Err(TranscodeError::Failed {
                    program: "ffmpeg",
                    code: Some(1),
                    stderr: format!("injected {stage} failure"),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn convert(
        &self,
        _source_url: &str,
        job: &JobLayout,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, TranscodeError> {
        self.step(job, "convert", cancel).await?;
        let bytes = self.canonical_bytes.load(Ordering::SeqCst);
        let path = job.canonical_path();
        tokio::fs::write(&path, vec![0u8; bytes]).await?;
        Ok(path)
    }

    async fn short_clip(
        &self,
        _canonical: &Path,
        job: &JobLayout,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        self.step(job, "short_clip", cancel).await?;
        tokio::fs::write(job.preview_path(), b"preview").await?;
        Ok(())
    }

    async fn renditions(
        &self,
        _canonical: &Path,
        job: &JobLayout,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        self.step(job, "renditions", cancel).await?;
        tokio::fs::create_dir_all(job.rendition_dir("360p")).await?;
        tokio::fs::write(job.rendition_playlist("360p"), b"#EXTM3U\n").await?;
        Ok(())
    }

    async fn master_playlist(&self, job: &JobLayout) -> Result<(), TranscodeError> {
        self.step(job, "master_playlist", &CancellationToken::new()).await?;
        tokio::fs::write(job.master_playlist_path(), b"#EXTM3U\n").await?;
        Ok(())
    }

    async fn probe_duration(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, TranscodeError> {
        let namespace = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.recorder.record(&namespace, "probe_duration");
        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }
        Ok(self.duration.clone())
    }
}

/// Lists the job directory, then removes it unless told to fail.
pub struct StubUploader {
    recorder: Recorder,
    fail: bool,
    uploads: Mutex<Vec<(String, Vec<String>)>>,
}

impl StubUploader {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            fail: false,
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Successful uploads as (storage prefix, sorted relative paths).
    pub fn uploads(&self) -> Vec<(String, Vec<String>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Uploader for StubUploader {
    async fn upload_dir_and_remove(&self, job: &JobLayout) -> anyhow::Result<()> {
        self.recorder.record(job.file_name(), "upload");
        if self.fail {
            return Err(anyhow!("injected upload failure"));
        }

        let mut files = Vec::new();
        collect_files(job.dir(), job.dir(), &mut files)?;
        files.sort();
        self.uploads
            .lock()
            .unwrap()
            .push((job.storage_prefix(), files));

        tokio::fs::remove_dir_all(job.dir()).await?;
        Ok(())
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

#[derive(Default)]
pub struct StubSink {
    fail: bool,
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl StubSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultSink for StubSink {
    async fn publish(&self, payload: &[u8]) -> anyhow::Result<()> {
        if self.fail {
            return Err(anyhow!("broker unavailable"));
        }
        self.payloads.lock().unwrap().push(payload.to_vec());
        Ok(())
    }
}
