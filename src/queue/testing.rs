//! Fakes for the fetch and playback collaborators.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::audio::adapter::{AudioEngine, EngineFactory, EngineState, FinishedSignal};
use crate::resolver::{FetchError, Fetcher};

pub async fn recv_timeout<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

/// A fetch the test decides the fate of.
pub struct PendingFetch {
    pub code: String,
    pub dest: PathBuf,
    reply: oneshot::Sender<Result<(), FetchError>>,
}

impl PendingFetch {
    pub fn succeed(self) {
        let _ = self.reply.send(Ok(()));
    }

    pub fn fail(self, detail: &str) {
        let _ = self.reply.send(Err(FetchError::Tool { tool: "fake", detail: detail.to_string() }));
    }
}

pub struct GatedFetcher {
    started: mpsc::UnboundedSender<PendingFetch>,
}

impl GatedFetcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingFetch>) {
        let (started, rx) = mpsc::unbounded_channel();
        (Self { started }, rx)
    }
}

impl Fetcher for GatedFetcher {
    fn fetch<'a>(&'a self, code: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(async move {
            let (reply, rx) = oneshot::channel();
            let _ = self.started.send(PendingFetch { code: code.to_string(), dest: dest.to_path_buf(), reply });
            match rx.await {
                Ok(Ok(())) => {
                    tokio::fs::write(dest, code.as_bytes()).await?;
                    Ok(())
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(FetchError::Tool { tool: "fake", detail: "test dropped the fetch".into() }),
            }
        })
    }
}

pub struct StallingFetcher;

impl Fetcher for StallingFetcher {
    fn fetch<'a>(&'a self, _code: &'a str, _dest: &'a Path) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(futures::future::pending())
    }
}

/// Fails the first `failures` attempts, then writes the file.
pub struct FlakyFetcher {
    failures: u32,
    attempts: AtomicU32,
}

impl FlakyFetcher {
    pub fn new(failures: u32) -> Self {
        Self { failures, attempts: AtomicU32::new(0) }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Fetcher for FlakyFetcher {
    fn fetch<'a>(&'a self, code: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<(), FetchError>> {
        Box::pin(async move {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(FetchError::Tool { tool: "fake", detail: format!("attempt {n} failed") });
            }
            tokio::fs::write(dest, code.as_bytes()).await?;
            Ok(())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Created,
    Source(PathBuf),
    State(EngineState),
}

/// Records every engine call and lets the test end the current track.
pub struct RecordingEngines {
    calls: mpsc::UnboundedSender<EngineCall>,
    current: Arc<Mutex<Option<FinishedSignal>>>,
}

impl RecordingEngines {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<EngineCall>) {
        let (calls, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { calls, current: Arc::new(Mutex::new(None)) }), rx)
    }

    /// Plays the current track out. Returns false if nothing was playing.
    pub fn finish_current(&self) -> bool {
        match self.take_signal() {
            Some(signal) => {
                signal.notify();
                true
            }
            None => false,
        }
    }

    pub fn take_signal(&self) -> Option<FinishedSignal> {
        self.current.lock().take()
    }
}

impl EngineFactory for RecordingEngines {
    fn create(&self) -> Result<Box<dyn AudioEngine>> {
        let _ = self.calls.send(EngineCall::Created);
        Ok(Box::new(RecordingEngine { calls: self.calls.clone(), current: self.current.clone() }))
    }
}

struct RecordingEngine {
    calls: mpsc::UnboundedSender<EngineCall>,
    current: Arc<Mutex<Option<FinishedSignal>>>,
}

impl AudioEngine for RecordingEngine {
    fn configure_source(&mut self, path: &Path, finished: FinishedSignal) -> Result<()> {
        let _ = self.calls.send(EngineCall::Source(path.to_path_buf()));
        *self.current.lock() = Some(finished);
        Ok(())
    }

    fn set_state(&mut self, state: EngineState) -> Result<()> {
        let _ = self.calls.send(EngineCall::State(state));
        if state == EngineState::Stopped {
            self.current.lock().take();
        }
        Ok(())
    }
}
