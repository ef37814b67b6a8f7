use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Location of the yt-dlp release asset for the running platform.
pub fn ytdlp_release_url() -> &'static str {
    if cfg!(target_os = "windows") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp.exe"
    } else if cfg!(target_os = "macos") {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_macos"
    } else {
        "https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp"
    }
}

pub fn ytdlp_filename() -> &'static str {
    if cfg!(windows) {
        "yt-dlp.exe"
    } else {
        "yt-dlp"
    }
}

pub fn tools_home_dir() -> PathBuf {
    let home = std::env::var_os(if cfg!(windows) { "USERPROFILE" } else { "HOME" })
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    home.join(".nearer").join("bin")
}

/// Runs `<bin> <arg>` and reports whether it exited cleanly within `timeout`.
pub async fn probe(bin: &str, arg: &str, timeout: Duration) -> Result<()> {
    let mut cmd = Command::new(bin);
    cmd.arg(arg).stdout(std::process::Stdio::null()).stderr(std::process::Stdio::null()).kill_on_drop(true);
    let status = tokio::time::timeout(timeout, cmd.status())
        .await
        .with_context(|| format!("{bin} {arg} timed out"))?
        .with_context(|| format!("spawn {bin}"))?;
    if !status.success() {
        bail!("{bin} {arg} exited with {status}");
    }
    Ok(())
}

/// Makes sure a usable yt-dlp exists. Returns the path to use when the
/// configured one is missing and a managed copy was installed instead.
pub async fn ensure_ytdlp(configured: &str) -> Result<Option<PathBuf>> {
    if probe(configured, "--version", Duration::from_secs(15)).await.is_ok() {
        debug!(path = %configured, "yt-dlp available");
        return Ok(None);
    }
    warn!(path = %configured, "yt-dlp not usable; installing managed copy");
    let dest = tools_home_dir().join(ytdlp_filename());
    install(ytdlp_release_url(), &dest).await?;
    Ok(Some(dest))
}

async fn install(url: &str, dest: &Path) -> Result<()> {
    if dest.exists() {
        debug!(installed_path = %dest.display(), "yt-dlp already present; skipping download");
        return Ok(());
    }
    if let Some(dir) = dest.parent() {
        tokio::fs::create_dir_all(dir).await.with_context(|| format!("create {}", dir.display()))?;
    }
    info!(%url, dest = %dest.display(), "Downloading yt-dlp (first run)");
    let started = Instant::now();

    let resp = reqwest::get(url).await.context("download yt-dlp")?;
    let status = resp.status();
    if !status.is_success() {
        bail!("yt-dlp request failed {status}");
    }
    let partial = dest.with_extension("part");
    let mut out = tokio::fs::File::create(&partial).await.context("create yt-dlp")?;
    let mut stream = resp.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("read yt-dlp body")?;
        out.write_all(&chunk).await.context("write yt-dlp")?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    drop(out);
    tokio::fs::rename(&partial, dest).await.context("move yt-dlp into place")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o755))
            .await
            .context("mark yt-dlp executable")?;
    }

    info!(
        installed_path = %dest.display(),
        size_bytes = written,
        took_ms = started.elapsed().as_millis(),
        "yt-dlp installed successfully"
    );
    Ok(())
}
