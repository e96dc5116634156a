//! ffmpeg/ffprobe command-line transcoder.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::TranscodeError;
use super::layout::{JobLayout, RENDITION_PLAYLIST_FILE};
use super::traits::Transcoder;

const FFMPEG: &str = "ffmpeg";
const FFPROBE: &str = "ffprobe";
const HLS_SEGMENT_SECONDS: u32 = 6;
const STDERR_TAIL_LINES: usize = 12;

/// One rung of the HLS bitrate ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rendition {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub video_kbps: u32,
    pub audio_kbps: u32,
}

impl Rendition {
    /// Peak bandwidth advertised in the master playlist, in bits per second.
    pub fn bandwidth(&self) -> u64 {
        u64::from(self.video_kbps + self.audio_kbps) * 1000
    }
}

pub const DEFAULT_LADDER: [Rendition; 3] = [
    Rendition { name: "360p", width: 640, height: 360, video_kbps: 800, audio_kbps: 96 },
    Rendition { name: "720p", width: 1280, height: 720, video_kbps: 2800, audio_kbps: 128 },
    Rendition { name: "1080p", width: 1920, height: 1080, video_kbps: 5000, audio_kbps: 192 },
];

pub struct FfmpegTranscoder {
    preview_seconds: u32,
    timeout: Duration,
    ladder: Vec<Rendition>,
}

impl FfmpegTranscoder {
    /// Fails when ffmpeg or ffprobe is not installed.
    pub fn new(preview_seconds: u32, timeout: Duration) -> Result<Self, TranscodeError> {
        let ffmpeg = which::which(FFMPEG).map_err(|_| TranscodeError::NotFound(FFMPEG))?;
        let ffprobe = which::which(FFPROBE).map_err(|_| TranscodeError::NotFound(FFPROBE))?;
        info!("🎥 Using {} and {}", ffmpeg.display(), ffprobe.display());

        Ok(Self {
            preview_seconds,
            timeout,
            ladder: DEFAULT_LADDER.to_vec(),
        })
    }

    async fn run(
        &self,
        program: &'static str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, TranscodeError> {
        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }
        debug!("Running {} {}", program, args.join(" "));

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => TranscodeError::NotFound(program),
                _ => TranscodeError::Io(e),
            })?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            _ = cancel.cancelled() => {
                warn!("{} cancelled, killing process", program);
                return Err(TranscodeError::Cancelled);
            }
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => match result {
                Ok(output) => output?,
                Err(_) => {
                    warn!("{} timed out after {:?}, killing process", program, self.timeout);
                    return Err(TranscodeError::Timeout {
                        program,
                        secs: self.timeout.as_secs(),
                    });
                }
            },
        };

        if !output.status.success() {
            return Err(TranscodeError::Failed {
                program,
                code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn convert(
        &self,
        source_url: &str,
        job: &JobLayout,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, TranscodeError> {
        let output = job.canonical_path();
        self.run(FFMPEG, &convert_args(source_url, &output), cancel).await?;
        ensure_exists(&output).await?;
        Ok(output)
    }

    async fn short_clip(
        &self,
        canonical: &Path,
        job: &JobLayout,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        let output = job.preview_path();
        self.run(FFMPEG, &short_clip_args(canonical, &output, self.preview_seconds), cancel)
            .await?;
        ensure_exists(&output).await
    }

    async fn renditions(
        &self,
        canonical: &Path,
        job: &JobLayout,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        // One rung at a time; a single ffmpeg already saturates the cores.
        for rendition in &self.ladder {
            let dir = job.rendition_dir(rendition.name);
            tokio::fs::create_dir_all(&dir).await?;
            debug!(file_name = %job.file_name(), "Encoding rendition {}", rendition.name);

            self.run(FFMPEG, &rendition_args(canonical, &dir, rendition), cancel)
                .await?;
            ensure_exists(&job.rendition_playlist(rendition.name)).await?;
        }
        Ok(())
    }

    async fn master_playlist(&self, job: &JobLayout) -> Result<(), TranscodeError> {
        for rendition in &self.ladder {
            ensure_exists(&job.rendition_playlist(rendition.name)).await?;
        }
        tokio::fs::write(job.master_playlist_path(), master_playlist_body(&self.ladder)).await?;
        Ok(())
    }

    async fn probe_duration(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, TranscodeError> {
        let stdout = self.run(FFPROBE, &probe_duration_args(path), cancel).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

async fn ensure_exists(path: &Path) -> Result<(), TranscodeError> {
    if tokio::fs::try_exists(path).await? {
        Ok(())
    } else {
        Err(TranscodeError::MissingOutput(path.to_path_buf()))
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

fn base_args() -> Vec<String> {
    vec!["-y".into(), "-v".into(), "error".into()]
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub(crate) fn convert_args(source_url: &str, output: &Path) -> Vec<String> {
    let mut args = base_args();
    args.extend(
        [
            "-i", source_url,
            "-c:v", "libx264",
            "-preset", "fast",
            "-pix_fmt", "yuv420p",
            "-c:a", "aac",
            "-movflags", "+faststart",
        ]
        .map(String::from),
    );
    args.push(path_arg(output));
    args
}

pub(crate) fn short_clip_args(canonical: &Path, output: &Path, seconds: u32) -> Vec<String> {
    let mut args = base_args();
    args.extend(["-i".to_string(), path_arg(canonical)]);
    args.extend(["-t".to_string(), seconds.to_string()]);
    args.extend(
        [
            "-c:v", "libx264",
            "-preset", "fast",
            "-c:a", "aac",
            "-movflags", "+faststart",
        ]
        .map(String::from),
    );
    args.push(path_arg(output));
    args
}

pub(crate) fn rendition_args(canonical: &Path, dir: &Path, rendition: &Rendition) -> Vec<String> {
    let mut args = base_args();
    args.extend(["-i".to_string(), path_arg(canonical)]);
    args.extend([
        "-vf".to_string(),
        format!("scale=-2:{}", rendition.height),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "fast".to_string(),
        "-b:v".to_string(),
        format!("{}k", rendition.video_kbps),
        "-maxrate".to_string(),
        format!("{}k", rendition.video_kbps * 107 / 100),
        "-bufsize".to_string(),
        format!("{}k", rendition.video_kbps * 3 / 2),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        format!("{}k", rendition.audio_kbps),
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        HLS_SEGMENT_SECONDS.to_string(),
        "-hls_playlist_type".to_string(),
        "vod".to_string(),
        "-hls_segment_filename".to_string(),
        path_arg(&dir.join("segment_%03d.ts")),
    ]);
    args.push(path_arg(&dir.join(RENDITION_PLAYLIST_FILE)));
    args
}

pub(crate) fn probe_duration_args(path: &Path) -> Vec<String> {
    let mut args: Vec<String> = [
        "-v", "error",
        "-show_entries", "format=duration",
        "-of", "default=noprint_wrappers=1:nokey=1",
    ]
    .map(String::from)
    .to_vec();
    args.push(path_arg(path));
    args
}

pub(crate) fn master_playlist_body(ladder: &[Rendition]) -> String {
    let mut body = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for rendition in ladder {
        body.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n{}/{}\n",
            rendition.bandwidth(),
            rendition.width,
            rendition.height,
            rendition.name,
            RENDITION_PLAYLIST_FILE,
        ));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(args: &[String], flag: &str) -> usize {
        args.iter().position(|a| a == flag).unwrap()
    }

    #[test]
    fn test_convert_args() {
        let args = convert_args("https://uploads.example.com/raw.mov", Path::new("/w/c/c.mp4"));
        assert_eq!(args[0], "-y");
        assert_eq!(args[position(&args, "-i") + 1], "https://uploads.example.com/raw.mov");
        assert_eq!(args[position(&args, "-c:v") + 1], "libx264");
        assert_eq!(args.last().unwrap(), "/w/c/c.mp4");
    }

    #[test]
    fn test_short_clip_limits_duration() {
        let args = short_clip_args(Path::new("/w/c/c.mp4"), Path::new("/w/c/preview.mp4"), 10);
        assert_eq!(args[position(&args, "-t") + 1], "10");
        assert!(position(&args, "-i") < position(&args, "-t"));
        assert_eq!(args.last().unwrap(), "/w/c/preview.mp4");
    }

    #[test]
    fn test_rendition_args() {
        let rung = DEFAULT_LADDER[1];
        let args = rendition_args(Path::new("/w/c/c.mp4"), Path::new("/w/c/720p"), &rung);
        assert_eq!(args[position(&args, "-vf") + 1], "scale=-2:720");
        assert_eq!(args[position(&args, "-b:v") + 1], "2800k");
        assert_eq!(args[position(&args, "-maxrate") + 1], "2996k");
        assert_eq!(args[position(&args, "-bufsize") + 1], "4200k");
        assert_eq!(
            args[position(&args, "-hls_segment_filename") + 1],
            "/w/c/720p/segment_%03d.ts"
        );
        assert_eq!(args.last().unwrap(), "/w/c/720p/index.m3u8");
    }

    #[test]
    fn test_probe_args_end_with_path() {
        let args = probe_duration_args(Path::new("/w/c/c.mp4"));
        assert_eq!(args[position(&args, "-show_entries") + 1], "format=duration");
        assert_eq!(args.last().unwrap(), "/w/c/c.mp4");
    }

    #[test]
    fn test_master_playlist_lists_every_rung() {
        let body = master_playlist_body(&DEFAULT_LADDER);
        assert!(body.starts_with("#EXTM3U\n"));
        assert!(body.contains("#EXT-X-STREAM-INF:BANDWIDTH=896000,RESOLUTION=640x360\n360p/index.m3u8\n"));
        assert!(body.contains("BANDWIDTH=2928000,RESOLUTION=1280x720\n720p/index.m3u8"));
        assert!(body.contains("BANDWIDTH=5192000,RESOLUTION=1920x1080\n1080p/index.m3u8"));
        assert_eq!(body.matches("#EXT-X-STREAM-INF").count(), DEFAULT_LADDER.len());
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let noisy: String = (0..30).map(|i| format!("line {i}\n")).collect();
        let tail = stderr_tail(noisy.as_bytes());
        assert_eq!(tail.lines().count(), STDERR_TAIL_LINES);
        assert!(tail.ends_with("line 29"));
    }
}
