use std::{
    path::Path,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::audio::adapter::{AudioEngine, EngineFactory, EngineState, FinishedSignal};
use crate::audio::decoder::FfmpegDecoder;

const FRAME: Duration = Duration::from_millis(20);
const MAX_DRIFT: Duration = Duration::from_millis(200);

/// Builds [`StreamEngine`]s that all publish into the same PCM channel, so
/// listeners survive engine reinitialization.
pub struct StreamEngineFactory {
    ffmpeg_bin: String,
    out_tx: broadcast::Sender<Bytes>,
}

impl StreamEngineFactory {
    pub fn new(ffmpeg_bin: &str) -> Self {
        let (out_tx, _rx) = broadcast::channel::<Bytes>(1024);
        Self { ffmpeg_bin: ffmpeg_bin.to_string(), out_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.out_tx.subscribe()
    }
}

impl EngineFactory for StreamEngineFactory {
    fn create(&self) -> Result<Box<dyn AudioEngine>> {
        Ok(Box::new(StreamEngine {
            ffmpeg_bin: self.ffmpeg_bin.clone(),
            out_tx: self.out_tx.clone(),
            staged: None,
            session: None,
        }))
    }
}

struct Session {
    state_tx: watch::Sender<EngineState>,
}

/// Paces decoded PCM to subscribers in real time, one thread per track.
pub struct StreamEngine {
    ffmpeg_bin: String,
    out_tx: broadcast::Sender<Bytes>,
    staged: Option<(std::path::PathBuf, FinishedSignal)>,
    session: Option<Session>,
}

impl StreamEngine {
    fn halt(&mut self) {
        self.staged = None;
        if let Some(session) = self.session.take() {
            let _ = session.state_tx.send(EngineState::Stopped);
        }
    }

    fn start(&mut self) -> Result<()> {
        let Some((path, finished)) = self.staged.take() else {
            return Ok(());
        };
        let decoder = FfmpegDecoder::open(&path, &self.ffmpeg_bin)?;
        let (state_tx, state_rx) = watch::channel(EngineState::Playing);
        let out_tx = self.out_tx.clone();
        let token = finished.token();
        thread::Builder::new()
            .name(format!("stream-{token}"))
            .spawn(move || run_session(decoder, out_tx, state_rx, finished))
            .context("spawn stream thread")?;
        info!(token, path = %path.display(), "stream started");
        self.session = Some(Session { state_tx });
        Ok(())
    }
}

impl AudioEngine for StreamEngine {
    fn configure_source(&mut self, path: &Path, finished: FinishedSignal) -> Result<()> {
        if !path.is_file() {
            anyhow::bail!("source not found: {}", path.display());
        }
        if self.session.is_some() {
            debug!(path = %path.display(), "source set while a stream is active; replacing it");
        }
        self.halt();
        self.staged = Some((path.to_path_buf(), finished));
        Ok(())
    }

    fn set_state(&mut self, state: EngineState) -> Result<()> {
        match state {
            EngineState::Stopped => self.halt(),
            EngineState::Playing if self.staged.is_some() => self.start()?,
            EngineState::Playing | EngineState::Paused => {
                if let Some(session) = &self.session {
                    let _ = session.state_tx.send(state);
                }
            }
        }
        Ok(())
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        self.halt();
    }
}

fn run_session(
    mut decoder: FfmpegDecoder,
    out_tx: broadcast::Sender<Bytes>,
    state_rx: watch::Receiver<EngineState>,
    finished: FinishedSignal,
) {
    let token = finished.token();
    let mut sent_frames: u64 = 0;
    let mut next_tick = Instant::now();

    loop {
        let state = *state_rx.borrow();
        match state {
            EngineState::Stopped => {
                debug!(token, sent_frames, "stream stopped");
                return;
            }
            EngineState::Paused => {
                thread::sleep(FRAME);
                next_tick = Instant::now();
                continue;
            }
            EngineState::Playing => {}
        }

        match decoder.next_frame() {
            Ok(Some(frame)) => {
                let _ = out_tx.send(frame);
                sent_frames += 1;
                if sent_frames % 2000 == 0 {
                    info!(token, sent_frames, "PCM sent (summary)");
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(?e, token, "decode failed; ending track");
                break;
            }
        }

        next_tick += FRAME;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        } else if now - next_tick > MAX_DRIFT {
            next_tick = now;
        }
    }

    info!(token, sent_frames, "end of stream");
    finished.notify();
}
