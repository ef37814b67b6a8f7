use std::{
    io::{ErrorKind, Read},
    path::Path,
    process::{Child, ChildStdout, Command, Stdio},
};

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};

pub const SAMPLE_RATE: usize = 48_000;
pub const CHANNELS: usize = 2;
/// One 20 ms frame of interleaved s16le samples.
pub const FRAME_BYTES: usize = SAMPLE_RATE / 50 * CHANNELS * 2;

/// Decodes any file ffmpeg understands into fixed-size PCM frames.
pub struct FfmpegDecoder {
    child: Child,
    pcm: ChildStdout,
    done: bool,
}

impl FfmpegDecoder {
    pub fn open(path: &Path, ffmpeg_bin: &str) -> Result<Self> {
        let (channels, rate) = (CHANNELS.to_string(), SAMPLE_RATE.to_string());
        let mut child = Command::new(ffmpeg_bin)
            .args(["-nostdin", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(path)
            .args(["-vn", "-f", "s16le", "-ac", &channels, "-ar", &rate, "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn {ffmpeg_bin} for {}", path.display()))?;
        let pcm = child.stdout.take().context("ffmpeg stdout not captured")?;
        Ok(Self { child, pcm, done: false })
    }

    /// Next frame, or `None` once ffmpeg closes its output. A short final
    /// frame is padded with silence.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        let mut frame = BytesMut::zeroed(FRAME_BYTES);
        let mut filled = 0;
        while filled < FRAME_BYTES {
            match self.pcm.read(&mut frame[filled..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e).context("read decoded pcm"),
            }
        }
        Ok((filled > 0).then(|| frame.freeze()))
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
