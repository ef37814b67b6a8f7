use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Playing,
    Paused,
    Stopped,
}

/// Handed to the engine with each source; fired once when that source plays out.
#[derive(Debug)]
pub struct FinishedSignal {
    token: u64,
    tx: mpsc::UnboundedSender<u64>,
}

impl FinishedSignal {
    #[cfg(test)]
    pub(crate) fn new(token: u64, tx: mpsc::UnboundedSender<u64>) -> Self {
        Self { token, tx }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn notify(self) {
        let _ = self.tx.send(self.token);
    }
}

/// An audio output that plays one local file at a time.
///
/// Implementations call [`FinishedSignal::notify`] from whatever thread they
/// run on when the configured source ends naturally. Stopping must not notify.
pub trait AudioEngine: Send {
    fn configure_source(&mut self, path: &Path, finished: FinishedSignal) -> Result<()>;
    fn set_state(&mut self, state: EngineState) -> Result<()>;
}

pub trait EngineFactory: Send + Sync + 'static {
    fn create(&self) -> Result<Box<dyn AudioEngine>>;
}

#[derive(Debug)]
enum EngineCommand {
    Play { path: PathBuf, token: u64 },
    Pause,
    Resume,
    Stop,
    Reinitialize,
}

/// Posts commands to a driver task that owns the engine.
///
/// Every method returns immediately and commands are applied in the order
/// they were posted.
#[derive(Clone)]
pub struct PlaybackAdapter {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl PlaybackAdapter {
    pub fn spawn(factory: Arc<dyn EngineFactory>, finished_tx: mpsc::UnboundedSender<u64>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let driver = Driver { factory, engine: None, finished_tx };
        tokio::spawn(driver.run(cmd_rx));
        Self { cmd_tx }
    }

    /// Engines may ignore a new source while already playing, so callers
    /// moving to another track should [`stop`](Self::stop) first.
    pub fn set_source_and_play(&self, path: PathBuf, token: u64) {
        self.post(EngineCommand::Play { path, token });
    }

    pub fn pause(&self) {
        self.post(EngineCommand::Pause);
    }

    pub fn resume(&self) {
        self.post(EngineCommand::Resume);
    }

    pub fn stop(&self) {
        self.post(EngineCommand::Stop);
    }

    /// Throws the engine away; the next source gets a freshly created one.
    pub fn reinitialize(&self) {
        self.post(EngineCommand::Reinitialize);
    }

    fn post(&self, cmd: EngineCommand) {
        if let Err(e) = self.cmd_tx.send(cmd) {
            warn!(cmd = ?e.0, "playback driver gone; command dropped");
        }
    }
}

struct Driver {
    factory: Arc<dyn EngineFactory>,
    engine: Option<Box<dyn AudioEngine>>,
    finished_tx: mpsc::UnboundedSender<u64>,
}

impl Driver {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineCommand>) {
        while let Some(cmd) = rx.recv().await {
            self.apply(cmd);
        }
        self.teardown();
        debug!("playback driver stopped");
    }

    fn engine(&mut self) -> Result<&mut Box<dyn AudioEngine>> {
        if self.engine.is_none() {
            self.engine = Some(self.factory.create()?);
            info!("playback engine created");
        }
        match self.engine.as_mut() {
            Some(engine) => Ok(engine),
            None => anyhow::bail!("playback engine unavailable"),
        }
    }

    fn apply(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Play { path, token } => {
                let signal = FinishedSignal { token, tx: self.finished_tx.clone() };
                let res = self.engine().and_then(|engine| {
                    engine.configure_source(&path, signal)?;
                    engine.set_state(EngineState::Playing)
                });
                if let Err(e) = res {
                    // report it as finished so the queue moves past it
                    error!(?e, path = %path.display(), token, "failed to start playback");
                    let _ = self.finished_tx.send(token);
                }
            }
            EngineCommand::Pause => self.set_state(EngineState::Paused),
            EngineCommand::Resume => self.set_state(EngineState::Playing),
            EngineCommand::Stop => self.set_state(EngineState::Stopped),
            EngineCommand::Reinitialize => {
                self.teardown();
                info!("playback engine reinitialized");
            }
        }
    }

    fn set_state(&mut self, state: EngineState) {
        if let Some(engine) = self.engine.as_mut() {
            if let Err(e) = engine.set_state(state) {
                warn!(?e, ?state, "engine state change failed");
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            let _ = engine.set_state(EngineState::Stopped);
        }
    }
}
