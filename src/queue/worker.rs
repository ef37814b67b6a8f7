use std::{collections::VecDeque, path::PathBuf, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::queue::song::{SlotId, SongId};
use crate::resolver::{FetchError, Fetcher};

/// Which pending request the worker picks up next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainOrder {
    #[default]
    Fifo,
    /// Most recent submission first. Older requests can starve under load.
    Lifo,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub song: SongId,
    pub code: String,
    pub slot: SlotId,
    pub dest: PathBuf,
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub song: SongId,
    pub slot: SlotId,
    pub result: Result<(), FetchError>,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    pub order: DrainOrder,
    pub timeout: Duration,
    pub retries: u32,
}

#[derive(Default)]
struct Pending {
    requests: VecDeque<FetchRequest>,
    draining: bool,
}

struct Shared {
    pending: Mutex<Pending>,
    fetcher: Arc<dyn Fetcher>,
    opts: WorkerOptions,
    done_tx: mpsc::UnboundedSender<FetchOutcome>,
}

/// Background fetcher. At most one drain task runs at a time; it is spawned on
/// the first submission and exits when nothing is left to fetch.
#[derive(Clone)]
pub struct FetchWorker {
    shared: Arc<Shared>,
}

impl FetchWorker {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        opts: WorkerOptions,
        done_tx: mpsc::UnboundedSender<FetchOutcome>,
    ) -> Self {
        Self { shared: Arc::new(Shared { pending: Mutex::new(Pending::default()), fetcher, opts, done_tx }) }
    }

    /// Queues `req`. Never blocks; safe to call while holding other locks.
    pub fn submit(&self, req: FetchRequest) {
        let start = {
            let mut p = self.shared.pending.lock();
            debug!(song = %req.song, slot = %req.slot, queued = p.requests.len() + 1, "fetch submitted");
            p.requests.push_back(req);
            !std::mem::replace(&mut p.draining, true)
        };
        if start {
            let shared = self.shared.clone();
            tokio::spawn(async move { shared.drain().await });
        }
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().requests.len()
    }

    #[cfg(test)]
    pub fn is_draining(&self) -> bool {
        self.shared.pending.lock().draining
    }
}

impl Shared {
    fn next_request(&self) -> Option<FetchRequest> {
        let mut p = self.pending.lock();
        let next = match self.opts.order {
            DrainOrder::Fifo => p.requests.pop_front(),
            DrainOrder::Lifo => p.requests.pop_back(),
        };
        if next.is_none() {
            p.draining = false;
        }
        next
    }

    async fn drain(self: Arc<Self>) {
        debug!(order = ?self.opts.order, "fetch worker started");
        while let Some(req) = self.next_request() {
            let job = tokio::spawn({
                let shared = self.clone();
                let req = req.clone();
                async move { shared.fetch_with_retry(&req).await }
            });
            let result = job
                .await
                .unwrap_or_else(|e| Err(FetchError::Tool { tool: "fetcher", detail: format!("task aborted: {e}") }));
            match &result {
                Ok(()) => info!(song = %req.song, slot = %req.slot, "fetch completed"),
                Err(e) => warn!(song = %req.song, code = %req.code, error = %e, "fetch failed"),
            }
            if self.done_tx.send(FetchOutcome { song: req.song, slot: req.slot, result }).is_err() {
                debug!("fetch completions receiver gone");
            }
        }
        debug!("fetch worker idle");
    }

    async fn fetch_once(&self, req: &FetchRequest) -> Result<(), FetchError> {
        match tokio::time::timeout(self.opts.timeout, self.fetcher.fetch(&req.code, &req.dest)).await {
            Ok(res) => res,
            Err(_) => Err(FetchError::Timeout(self.opts.timeout.as_millis() as u64)),
        }
    }

    async fn fetch_with_retry(&self, req: &FetchRequest) -> Result<(), FetchError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(req).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let _ = tokio::fs::remove_file(&req.dest).await;
                    if !e.is_retryable() || attempt > self.opts.retries {
                        return Err(e);
                    }
                    warn!(song = %req.song, attempt, error = %e, "fetch attempt failed; retrying");
                    tokio::time::sleep(Duration::from_millis(250 * attempt as u64)).await;
                }
            }
        }
    }
}
