use std::{
    io::Write,
    path::{Path, PathBuf},
    process::Stdio,
};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};
use url::Url;

use crate::config::{EffectiveConfig, SourceRules};

const FALLBACK_FORMAT: &str = "bestaudio/best";
const MEDIA_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "ogg", "oga", "opus", "flac", "wav", "webm", "mka"];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch timed out after {0} ms")]
    Timeout(u64),
    #[error("{tool} failed: {detail}")]
    Tool { tool: &'static str, detail: String },
    #[error("fetched file is empty")]
    Empty,
    #[error("source not found: {0}")]
    NotFound(String),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Missing sources will not appear on a second attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::NotFound(_))
    }
}

/// Materializes the media behind `code` as a playable file at `dest`.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch<'a>(&'a self, code: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<(), FetchError>>;
}

fn host(url: &str) -> Option<String> {
    Url::parse(url).ok().and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

pub fn is_uri_allowed(rules: &SourceRules, uri: &str) -> bool {
    let h = host(uri).unwrap_or_default();
    if rules.blocked.iter().any(|re| re.is_match(uri) || (!h.is_empty() && re.is_match(&h))) {
        return false;
    }
    if rules.allowed.is_empty() {
        true
    } else {
        rules.allowed.iter().any(|re| re.is_match(uri) || (!h.is_empty() && re.is_match(&h)))
    }
}

pub fn needs_resolve(input: &str) -> bool {
    if let Some(h) = host(input) {
        return h.contains("youtube.com")
            || h == "youtu.be"
            || h.contains("soundcloud.com")
            || h.contains("bandcamp.com");
    }
    false
}

#[derive(Debug, PartialEq, Eq)]
enum SourceKind {
    Local(PathBuf),
    Direct(Url),
    Page,
}

fn classify(code: &str) -> SourceKind {
    if let Ok(u) = Url::parse(code) {
        match u.scheme() {
            "file" => {
                if let Ok(p) = u.to_file_path() {
                    return SourceKind::Local(p);
                }
            }
            "http" | "https" if !needs_resolve(code) => {
                let ext = u.path().rsplit('.').next().unwrap_or_default().to_lowercase();
                if MEDIA_EXTENSIONS.contains(&ext.as_str()) {
                    return SourceKind::Direct(u);
                }
            }
            _ => {}
        }
        return SourceKind::Page;
    }
    let p = PathBuf::from(code);
    if p.is_absolute() && p.is_file() {
        return SourceKind::Local(p);
    }
    SourceKind::Page
}

/// Default fetcher: local copies, direct HTTP downloads, and yt-dlp for everything else.
pub struct SourceFetcher {
    ytdlp_path: String,
    preferred_format: String,
    http: reqwest::Client,
}

impl SourceFetcher {
    pub fn new(cfg: &EffectiveConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(format!("nearer/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { ytdlp_path: cfg.ytdlp_path.clone(), preferred_format: cfg.preferred_format.clone(), http }
    }

    async fn copy_local(&self, src: &Path, dest: &Path) -> Result<(), FetchError> {
        if !src.is_file() {
            return Err(FetchError::NotFound(src.display().to_string()));
        }
        tokio::fs::copy(src, dest).await?;
        Ok(())
    }

    async fn download_direct(&self, url: Url, dest: &Path) -> Result<(), FetchError> {
        let mut resp = self.http.get(url).send().await?.error_for_status()?;
        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::Builder::new().prefix(".partial_").tempfile_in(dir)?;
        while let Some(chunk) = resp.chunk().await? {
            tmp.as_file_mut().write_all(&chunk)?;
        }
        tmp.persist(dest).map_err(|e| FetchError::Io(e.error))?;
        Ok(())
    }

    async fn download_with_ytdlp(&self, code: &str, format: &str, dest: &Path) -> Result<(), FetchError> {
        let mut cmd = Command::new(&self.ytdlp_path);
        cmd.args(["--no-playlist", "--no-part", "--force-overwrites", "-f", format, "-o"])
            .arg(dest)
            .arg("--")
            .arg(code)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let out = cmd.output().await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let detail = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("").trim().to_string();
            return Err(FetchError::Tool { tool: "yt-dlp", detail: format!("{} ({detail})", out.status) });
        }
        Ok(())
    }

    async fn fetch_page(&self, code: &str, dest: &Path) -> Result<(), FetchError> {
        match self.download_with_ytdlp(code, &self.preferred_format, dest).await {
            Ok(()) => Ok(()),
            Err(e) if self.preferred_format != FALLBACK_FORMAT => {
                debug!(%code, ?e, "preferred format failed; retrying with {FALLBACK_FORMAT}");
                self.download_with_ytdlp(code, FALLBACK_FORMAT, dest).await
            }
            Err(e) => Err(e),
        }
    }
}

impl Fetcher for SourceFetcher {
    fn fetch<'a>(&'a self, code: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(async move {
            match classify(code) {
                SourceKind::Local(p) => self.copy_local(&p, dest).await?,
                SourceKind::Direct(u) => self.download_direct(u, dest).await?,
                SourceKind::Page => self.fetch_page(code, dest).await?,
            }
            let meta = tokio::fs::metadata(dest).await?;
            if meta.len() == 0 {
                return Err(FetchError::Empty);
            }
            info!(%code, dest = %dest.display(), size_bytes = meta.len(), "fetched");
            Ok(())
        })
    }
}
