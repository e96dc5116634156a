use std::path::{Path, PathBuf};

use anyhow::{ensure, Result};
use url::Url;

pub const PREVIEW_FILE: &str = "preview.mp4";
pub const MASTER_PLAYLIST_FILE: &str = "master.m3u8";
pub const RENDITION_PLAYLIST_FILE: &str = "index.m3u8";
pub const CANONICAL_EXTENSION: &str = ".mp4";

/// Longest `file_name` whose canonical file still fits a 255-byte file name.
pub const MAX_FILE_NAME_BYTES: usize = 255 - CANONICAL_EXTENSION.len();

/// True when the canonical file of `file_name` would land on one of the
/// fixed derivative files of the same directory.
pub fn collides_with_derivative(file_name: &str) -> bool {
    let canonical = format!("{file_name}{CANONICAL_EXTENSION}");
    [PREVIEW_FILE, MASTER_PLAYLIST_FILE]
        .iter()
        .any(|fixed| canonical.eq_ignore_ascii_case(fixed))
}

/// Maps jobs onto local working directories and public URLs.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    work_dir: PathBuf,
    public_base: Url,
}

impl OutputLayout {
    pub fn new(work_dir: impl Into<PathBuf>, public_base: Url) -> Result<Self> {
        ensure!(
            !public_base.cannot_be_a_base(),
            "public base URL {} cannot carry path segments",
            public_base
        );
        Ok(Self {
            work_dir: work_dir.into(),
            public_base,
        })
    }

    pub fn for_job(&self, user_id: &str, file_name: &str) -> JobLayout {
        JobLayout {
            user_id: user_id.to_string(),
            file_name: file_name.to_string(),
            dir: self.work_dir.join(file_name),
            public_base: self.public_base.clone(),
        }
    }
}

/// Every path and URL of one job. All of them are pure functions of
/// `user_id` and `file_name`.
#[derive(Debug, Clone)]
pub struct JobLayout {
    user_id: String,
    file_name: String,
    dir: PathBuf,
    public_base: Url,
}

impl JobLayout {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Local directory exclusively owned by the job while it runs.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn canonical_path(&self) -> PathBuf {
        self.dir.join(self.canonical_file())
    }

    pub fn preview_path(&self) -> PathBuf {
        self.dir.join(PREVIEW_FILE)
    }

    pub fn rendition_dir(&self, rendition: &str) -> PathBuf {
        self.dir.join(rendition)
    }

    pub fn rendition_playlist(&self, rendition: &str) -> PathBuf {
        self.rendition_dir(rendition).join(RENDITION_PLAYLIST_FILE)
    }

    pub fn master_playlist_path(&self) -> PathBuf {
        self.dir.join(MASTER_PLAYLIST_FILE)
    }

    /// Object key prefix in remote storage.
    pub fn storage_prefix(&self) -> String {
        format!("{}/{}", self.user_id, self.file_name)
    }

    /// Object key for a file below the job directory.
    pub fn storage_key(&self, relative: &Path) -> String {
        let mut key = self.storage_prefix();
        for component in relative.components() {
            key.push('/');
            key.push_str(&component.as_os_str().to_string_lossy());
        }
        key
    }

    pub fn transcoded_url(&self) -> String {
        self.public_url(&self.canonical_file())
    }

    pub fn stream_url(&self) -> String {
        self.public_url(MASTER_PLAYLIST_FILE)
    }

    pub fn preview_url(&self) -> String {
        self.public_url(PREVIEW_FILE)
    }

    fn canonical_file(&self) -> String {
        format!("{}{}", self.file_name, CANONICAL_EXTENSION)
    }

    fn public_url(&self, leaf: &str) -> String {
        let mut url = self.public_base.clone();
        // OutputLayout::new rejected cannot-be-a-base URLs
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend([self.user_id.as_str(), self.file_name.as_str(), leaf]);
        }
        url.to_string()
    }
}
