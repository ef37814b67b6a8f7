use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{Arc, Weak},
};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::audio::adapter::{EngineFactory, PlaybackAdapter};
use crate::queue::events::{EventBus, QueueEvent};
use crate::queue::slots::{SlotAllocator, SlotFiles};
use crate::queue::song::{QueueSnapshot, SlotId, Song, SongId, SongStatus};
use crate::queue::worker::{FetchOutcome, FetchRequest, FetchWorker, WorkerOptions};
use crate::resolver::Fetcher;

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub lookahead: usize,
    pub cache_dir: PathBuf,
    pub file_extension: String,
    pub worker: WorkerOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayOutcome {
    Started,
    Resumed,
    /// The head is already playing.
    Playing,
    /// The head is still being fetched.
    Waiting,
    /// The head's fetch failed; skip it to continue.
    HeadUnavailable,
    Empty,
}

struct NowPlaying {
    song: SongId,
    token: u64,
}

struct QueueState {
    songs: VecDeque<Song>,
    paused: bool,
    slots: SlotAllocator,
    now_playing: Option<NowPlaying>,
    last_token: u64,
}

/// Owns the play queue and keeps the first `lookahead` entries fetched.
///
/// Requests from the API, fetch completions and end-of-track signals all go
/// through the same lock. Nothing awaits I/O while holding it: fetches and
/// engine commands are posted to their workers, and slot files are deleted
/// after the lock is released while the slot is marked as reclaiming.
pub struct QueueCoordinator {
    state: Mutex<QueueState>,
    lookahead: usize,
    files: SlotFiles,
    worker: FetchWorker,
    player: PlaybackAdapter,
    events: EventBus,
}

impl QueueCoordinator {
    pub fn start(opts: CoordinatorOptions, fetcher: Arc<dyn Fetcher>, engines: Arc<dyn EngineFactory>) -> Arc<Self> {
        let lookahead = opts.lookahead.max(1);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();

        let this = Arc::new(Self {
            state: Mutex::new(QueueState {
                songs: VecDeque::new(),
                paused: false,
                slots: SlotAllocator::new(lookahead),
                now_playing: None,
                last_token: 0,
            }),
            lookahead,
            files: SlotFiles::new(opts.cache_dir, &opts.file_extension),
            worker: FetchWorker::new(fetcher, opts.worker, done_tx),
            player: PlaybackAdapter::spawn(engines, finished_tx),
            events: EventBus::new(256),
        });

        tokio::spawn(listen_fetches(Arc::downgrade(&this), done_rx));
        tokio::spawn(listen_finished(Arc::downgrade(&this), finished_rx));
        info!(lookahead, cache_dir = %this.files.dir().display(), "queue coordinator started");
        this
    }

    pub fn files(&self) -> &SlotFiles {
        &self.files
    }

    pub fn lookahead(&self) -> usize {
        self.lookahead
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let st = self.state.lock().await;
        QueueSnapshot {
            paused: st.paused,
            now_playing: st.now_playing.as_ref().map(|np| np.song.clone()),
            lookahead: self.lookahead,
            pending_fetches: self.worker.pending_len(),
            songs: st.songs.iter().cloned().collect(),
        }
    }

    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.paused
    }

    /// Appends a song. It is fetched right away if it lands inside the window;
    /// playback is left to the fetch completion.
    pub async fn add_song(&self, code: &str) -> Song {
        let mut st = self.state.lock().await;
        let slot = st.slots.allocate();
        let song = Song::new(code, slot);
        let id = song.id.clone();
        st.songs.push_back(song);
        let position = st.songs.len() - 1;
        info!(song = %id, %code, %slot, position, "song added");
        self.events.publish(QueueEvent::SongAdded { id: id.clone(), code: code.to_string(), position });

        self.fill_window(&mut st);
        st.songs[position].clone()
    }

    pub async fn play(&self) -> PlayOutcome {
        let mut st = self.state.lock().await;
        let was_paused = std::mem::replace(&mut st.paused, false);
        if was_paused {
            self.events.publish(QueueEvent::Resumed);
        }

        if st.now_playing.is_some() {
            if was_paused {
                self.player.resume();
                return PlayOutcome::Resumed;
            }
            return PlayOutcome::Playing;
        }

        let outcome = match st.songs.front().map(|s| &s.status) {
            None => PlayOutcome::Empty,
            Some(SongStatus::Ready) => PlayOutcome::Started,
            Some(SongStatus::Failed { .. }) => PlayOutcome::HeadUnavailable,
            Some(SongStatus::Queued | SongStatus::Fetching) => PlayOutcome::Waiting,
        };
        if outcome == PlayOutcome::Started {
            self.start_head(&mut st);
        } else {
            debug!(?outcome, "play requested but nothing to start");
        }
        outcome
    }

    pub async fn pause(&self) {
        let mut st = self.state.lock().await;
        if st.paused {
            return;
        }
        st.paused = true;
        if st.now_playing.is_some() {
            self.player.pause();
        }
        info!("playback paused");
        self.events.publish(QueueEvent::Paused);
    }

    /// Drops the head and moves on. Returns false (and does nothing) on an empty queue.
    pub async fn skip(&self) -> bool {
        let reclaim = {
            let mut st = self.state.lock().await;
            let Some(head) = st.songs.front() else {
                debug!("skip on empty queue ignored");
                return false;
            };
            let id = head.id.clone();
            // the engine only honours a new source after a full stop
            self.player.stop();
            info!(song = %id, "skipping");
            self.events.publish(QueueEvent::Skipped { id });
            self.advance(&mut st)
        };
        if let Some(slot) = reclaim {
            self.reclaim(slot).await;
        }
        true
    }

    pub async fn on_playback_finished(&self, token: u64) {
        let reclaim = {
            let mut st = self.state.lock().await;
            match &st.now_playing {
                Some(np) if np.token == token => {}
                _ => {
                    debug!(token, "ignoring finished signal for a track that is no longer current");
                    return;
                }
            }
            self.advance(&mut st)
        };
        if let Some(slot) = reclaim {
            self.reclaim(slot).await;
        }
    }

    pub async fn on_fetch_completed(&self, outcome: FetchOutcome) {
        let FetchOutcome { song: id, slot, result } = outcome;
        let orphan = {
            let mut st = self.state.lock().await;
            let QueueState { songs, slots, .. } = &mut *st;
            let orphan = match songs.iter_mut().find(|s| s.id == id) {
                Some(song) => {
                    slots.release(slot);
                    match result {
                        Ok(()) => {
                            song.status = SongStatus::Ready;
                            self.events.publish(QueueEvent::FetchCompleted { id: id.clone() });
                        }
                        Err(e) => {
                            warn!(song = %id, code = %song.code, error = %e, "song unavailable");
                            let reason = e.to_string();
                            song.status = SongStatus::Failed { reason: reason.clone() };
                            self.events.publish(QueueEvent::FetchFailed { id: id.clone(), reason });
                        }
                    }
                    false
                }
                None => {
                    debug!(song = %id, %slot, "fetch finished for a song already consumed");
                    slots.begin_reclaim(slot);
                    true
                }
            };

            if !st.paused && st.now_playing.is_none() {
                self.start_head(&mut st);
            }
            self.fill_window(&mut st);
            orphan
        };
        if orphan {
            self.reclaim(slot).await;
        }
    }

    /// Stops output and removes every slot file. Used on shutdown.
    pub async fn shutdown(&self) {
        let st = self.state.lock().await;
        self.player.stop();
        self.files.clear(st.slots.capacity());
        info!(remaining = st.songs.len(), "queue coordinator shut down");
    }

    /// Submits every window entry that is waiting and whose slot is free.
    fn fill_window(&self, st: &mut QueueState) {
        let QueueState { songs, slots, .. } = st;
        for song in songs.iter_mut().take(self.lookahead) {
            if song.status != SongStatus::Queued {
                continue;
            }
            if !slots.acquire(song.slot) {
                debug!(song = %song.id, slot = %song.slot, state = ?slots.state(song.slot), "slot still busy; fetch deferred");
                continue;
            }
            song.status = SongStatus::Fetching;
            self.events.publish(QueueEvent::FetchRequested { id: song.id.clone(), slot: song.slot });
            self.worker.submit(FetchRequest {
                song: song.id.clone(),
                code: song.code.clone(),
                slot: song.slot,
                dest: self.files.path(song.slot),
            });
        }
    }

    fn start_head(&self, st: &mut QueueState) -> bool {
        let Some(head) = st.songs.front() else {
            return false;
        };
        if !head.is_ready() {
            return false;
        }
        let (id, slot) = (head.id.clone(), head.slot);
        st.last_token += 1;
        let token = st.last_token;
        st.now_playing = Some(NowPlaying { song: id.clone(), token });
        self.player.set_source_and_play(self.files.path(slot), token);
        info!(song = %id, %slot, token, "track started");
        self.events.publish(QueueEvent::TrackStarted { id });
        true
    }

    /// Pops the head and starts the next one. Returns the slot whose file
    /// must be deleted once the lock is released.
    fn advance(&self, st: &mut QueueState) -> Option<SlotId> {
        st.now_playing = None;
        let Some(head) = st.songs.pop_front() else {
            self.player.reinitialize();
            self.events.publish(QueueEvent::EngineReset);
            return None;
        };
        self.events.publish(QueueEvent::TrackFinished { id: head.id.clone() });

        let reclaim = match head.status {
            SongStatus::Ready | SongStatus::Failed { .. } => {
                st.slots.begin_reclaim(head.slot);
                Some(head.slot)
            }
            // still being fetched: reclaimed when the fetch reports back
            SongStatus::Fetching => None,
            SongStatus::Queued => None,
        };

        if st.songs.is_empty() {
            info!("queue drained; resetting playback engine");
            self.player.reinitialize();
            self.events.publish(QueueEvent::EngineReset);
        } else if !st.paused {
            self.start_head(st);
        }
        self.fill_window(st);
        reclaim
    }

    async fn reclaim(&self, slot: SlotId) {
        self.files.remove(slot).await;
        let mut st = self.state.lock().await;
        st.slots.release(slot);
        self.fill_window(&mut st);
    }
}

async fn listen_fetches(coordinator: Weak<QueueCoordinator>, mut rx: mpsc::UnboundedReceiver<FetchOutcome>) {
    while let Some(outcome) = rx.recv().await {
        let Some(this) = coordinator.upgrade() else { break };
        this.on_fetch_completed(outcome).await;
    }
}

async fn listen_finished(coordinator: Weak<QueueCoordinator>, mut rx: mpsc::UnboundedReceiver<u64>) {
    while let Some(token) = rx.recv().await {
        let Some(this) = coordinator.upgrade() else { break };
        this.on_playback_finished(token).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::audio::adapter::EngineState;
    use crate::queue::testing::{recv_timeout, EngineCall, GatedFetcher, PendingFetch, RecordingEngines};
    use crate::queue::worker::DrainOrder;

    struct Harness {
        coord: Arc<QueueCoordinator>,
        fetches: mpsc::UnboundedReceiver<PendingFetch>,
        calls: mpsc::UnboundedReceiver<EngineCall>,
        engines: Arc<RecordingEngines>,
        _dir: tempfile::TempDir,
    }

    fn harness(lookahead: usize) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let (fetcher, fetches) = GatedFetcher::new();
        let (engines, calls) = RecordingEngines::new();
        let opts = CoordinatorOptions {
            lookahead,
            cache_dir: dir.path().to_path_buf(),
            file_extension: "audio".into(),
            worker: WorkerOptions { order: DrainOrder::Fifo, timeout: Duration::from_secs(5), retries: 0 },
        };
        let coord = QueueCoordinator::start(opts, Arc::new(fetcher), engines.clone());
        Harness { coord, fetches, calls, engines, _dir: dir }
    }

    impl Harness {
        fn path(&self, slot: usize) -> PathBuf {
            self.coord.files().path(SlotId(slot))
        }

        async fn next_fetch(&mut self) -> PendingFetch {
            recv_timeout(&mut self.fetches).await
        }

        /// Skips engine calls until a source is configured.
        async fn next_source(&mut self) -> PathBuf {
            loop {
                if let EngineCall::Source(p) = recv_timeout(&mut self.calls).await {
                    return p;
                }
            }
        }

        async fn idle_calls(&mut self) -> Vec<EngineCall> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let mut seen = Vec::new();
            while let Ok(call) = self.calls.try_recv() {
                seen.push(call);
            }
            seen
        }

        async fn wait_for(&self, what: &str, pred: impl Fn(&QueueSnapshot) -> bool) -> QueueSnapshot {
            for _ in 0..200 {
                let snap = self.coord.snapshot().await;
                if pred(&snap) {
                    return snap;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("timed out waiting for {what}");
        }

        async fn codes(&self) -> Vec<String> {
            self.coord.snapshot().await.songs.into_iter().map(|s| s.code).collect()
        }
    }

    async fn wait_until(what: &str, pred: impl Fn() -> bool) {
        for _ in 0..200 {
            if pred() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    fn no_sources(calls: &[EngineCall]) -> bool {
        !calls.iter().any(|c| matches!(c, EngineCall::Source(_)))
    }

    #[tokio::test]
    async fn songs_play_in_order_and_files_are_reclaimed() {
        let mut h = harness(5);
        h.coord.add_song("c1").await;
        h.coord.add_song("c2").await;

        let snap = h.coord.snapshot().await;
        assert!(snap.songs.iter().all(|s| s.status == SongStatus::Fetching));

        h.next_fetch().await.succeed();
        assert_eq!(h.next_source().await, h.path(0));

        h.next_fetch().await.succeed();
        h.wait_for("c2 ready", |s| s.songs.get(1).is_some_and(Song::is_ready)).await;
        assert!(h.path(0).exists());

        assert!(h.engines.finish_current());
        assert_eq!(h.next_source().await, h.path(1));
        assert_eq!(h.codes().await, vec!["c2"]);
        let gone = h.path(0);
        wait_until("c1 file deleted", || !gone.exists()).await;
    }

    #[tokio::test]
    async fn playback_follows_queue_order_not_fetch_order() {
        let dir = tempfile::tempdir().unwrap();
        let (fetcher, mut fetches) = GatedFetcher::new();
        let (engines, mut calls) = RecordingEngines::new();
        let opts = CoordinatorOptions {
            lookahead: 5,
            cache_dir: dir.path().to_path_buf(),
            file_extension: "audio".into(),
            worker: WorkerOptions { order: DrainOrder::Lifo, timeout: Duration::from_secs(5), retries: 0 },
        };
        let coord = QueueCoordinator::start(opts, Arc::new(fetcher), engines.clone());

        coord.add_song("a").await;
        let a = recv_timeout(&mut fetches).await;
        coord.add_song("b").await;
        coord.add_song("c").await;
        a.fail("hold on");
        // lifo: c is fetched before b
        let c = recv_timeout(&mut fetches).await;
        assert_eq!(c.code, "c");
        c.succeed();
        let b = recv_timeout(&mut fetches).await;
        assert_eq!(b.code, "b");

        tokio::time::sleep(Duration::from_millis(50)).await;
        // head failed, so nothing plays even though c is ready
        assert!(coord.snapshot().await.songs[2].is_ready());
        assert!(calls.try_recv().is_err());

        b.succeed();
        assert!(coord.skip().await);
        loop {
            if let EngineCall::Source(p) = recv_timeout(&mut calls).await {
                assert_eq!(p, coord.files().path(SlotId(1)));
                break;
            }
        }
    }

    #[tokio::test]
    async fn paused_queue_does_not_start_on_fetch_completion() {
        let mut h = harness(5);
        h.coord.pause().await;
        h.coord.add_song("c3").await;
        h.next_fetch().await.succeed();

        h.wait_for("c3 ready", |s| s.songs.first().is_some_and(Song::is_ready)).await;
        assert!(no_sources(&h.idle_calls().await));
        assert!(h.coord.snapshot().await.now_playing.is_none());

        assert_eq!(h.coord.play().await, PlayOutcome::Started);
        assert_eq!(h.next_source().await, h.path(0));
    }

    #[tokio::test]
    async fn sixth_song_waits_for_the_window_to_slide() {
        let mut h = harness(5);
        for i in 0..6 {
            h.coord.add_song(&format!("s{i}")).await;
        }
        let snap = h.coord.snapshot().await;
        let fetching = snap.songs.iter().filter(|s| s.status == SongStatus::Fetching).count();
        assert_eq!(fetching, 5);
        assert_eq!(snap.songs[5].status, SongStatus::Queued);

        for i in 0..5 {
            let f = h.next_fetch().await;
            assert_eq!(f.code, format!("s{i}"));
            f.succeed();
        }
        assert_eq!(h.next_source().await, h.path(0));
        h.wait_for("window ready", |s| s.songs.iter().take(5).all(Song::is_ready)).await;
        assert!(h.fetches.try_recv().is_err());

        assert!(h.engines.finish_current());
        let f = h.next_fetch().await;
        assert_eq!(f.code, "s5");
        assert_eq!(f.dest, h.path(0));
        assert!(!h.path(0).exists());
        assert_eq!(h.next_source().await, h.path(1));
    }

    #[tokio::test]
    async fn never_more_than_lookahead_entries_requested() {
        let mut h = harness(3);
        for i in 0..10 {
            h.coord.add_song(&format!("s{i}")).await;
            let snap = h.coord.snapshot().await;
            let active = snap.songs.iter().filter(|s| s.status != SongStatus::Queued).count();
            assert!(active <= 3);
            assert!(snap.songs.iter().skip(3).all(|s| s.status == SongStatus::Queued));
        }
        for _ in 0..3 {
            h.next_fetch().await.succeed();
        }
        h.wait_for("window ready", |s| s.songs.iter().take(3).all(Song::is_ready)).await;
        assert!(h.fetches.try_recv().is_err());
    }

    #[tokio::test]
    async fn skip_advances_exactly_one() {
        let mut h = harness(5);
        for code in ["A", "B", "C"] {
            h.coord.add_song(code).await;
        }
        h.next_fetch().await.succeed();
        assert_eq!(h.next_source().await, h.path(0));
        h.next_fetch().await.succeed();
        h.wait_for("B ready", |s| s.songs.get(1).is_some_and(Song::is_ready)).await;

        assert!(h.coord.skip().await);

        let calls = {
            let mut seen = Vec::new();
            loop {
                let call = recv_timeout(&mut h.calls).await;
                let done = matches!(call, EngineCall::Source(_));
                seen.push(call);
                if done {
                    break seen;
                }
            }
        };
        assert!(calls.contains(&EngineCall::State(EngineState::Stopped)));
        assert_eq!(calls.last(), Some(&EngineCall::Source(h.path(1))));
        assert_eq!(h.codes().await, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn skip_on_empty_queue_is_a_no_op() {
        let mut h = harness(5);
        assert!(!h.coord.skip().await);
        let snap = h.coord.snapshot().await;
        assert!(snap.songs.is_empty());
        assert!(h.idle_calls().await.is_empty());
    }

    #[tokio::test]
    async fn pausing_twice_equals_pausing_once() {
        let mut h = harness(5);
        h.coord.add_song("A").await;
        h.next_fetch().await.succeed();
        h.next_source().await;

        h.coord.pause().await;
        let once = h.coord.snapshot().await;
        h.coord.pause().await;
        let twice = h.coord.snapshot().await;

        assert!(twice.paused);
        assert_eq!(once.paused, twice.paused);
        assert_eq!(once.now_playing, twice.now_playing);
        let pauses = h.idle_calls().await.into_iter().filter(|c| *c == EngineCall::State(EngineState::Paused)).count();
        assert_eq!(pauses, 1);

        assert_eq!(h.coord.play().await, PlayOutcome::Resumed);
        assert_eq!(recv_timeout(&mut h.calls).await, EngineCall::State(EngineState::Playing));
        assert_eq!(h.coord.play().await, PlayOutcome::Playing);
    }

    #[tokio::test]
    async fn slot_ids_cycle_with_lookahead() {
        let h = harness(5);
        let mut slots = Vec::new();
        for i in 0..10 {
            slots.push(h.coord.add_song(&format!("s{i}")).await.slot.0);
        }
        assert_eq!(slots, vec![0, 1, 2, 3, 4, 0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failed_head_is_reported_and_can_be_skipped() {
        let mut h = harness(5);
        let mut events = h.coord.subscribe();
        h.coord.add_song("gone").await;
        h.next_fetch().await.fail("video unavailable");

        h.wait_for("failure", |s| matches!(s.songs[0].status, SongStatus::Failed { .. })).await;
        assert_eq!(h.coord.play().await, PlayOutcome::HeadUnavailable);

        let mut saw_failure = false;
        while let Ok(ev) = events.try_recv() {
            if let QueueEvent::FetchFailed { reason, .. } = ev {
                assert!(reason.contains("video unavailable"));
                saw_failure = true;
            }
        }
        assert!(saw_failure);

        assert!(h.coord.skip().await);
        assert!(h.coord.snapshot().await.songs.is_empty());
        assert_eq!(h.coord.play().await, PlayOutcome::Empty);
    }

    #[tokio::test]
    async fn play_waits_for_an_unfetched_head() {
        let mut h = harness(5);
        h.coord.add_song("slow").await;
        assert_eq!(h.coord.play().await, PlayOutcome::Waiting);
        h.next_fetch().await.succeed();
        assert_eq!(h.next_source().await, h.path(0));
    }

    #[tokio::test]
    async fn stale_finished_signal_is_ignored() {
        let mut h = harness(5);
        h.coord.add_song("A").await;
        h.coord.add_song("B").await;
        h.next_fetch().await.succeed();
        h.next_source().await;
        h.next_fetch().await.succeed();
        h.wait_for("B ready", |s| s.songs.get(1).is_some_and(Song::is_ready)).await;

        let stale = h.engines.take_signal().expect("A is playing");
        h.coord.skip().await;
        assert_eq!(h.next_source().await, h.path(1));

        stale.notify();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.codes().await, vec!["B"]);
        assert!(h.coord.snapshot().await.now_playing.is_some());
    }

    #[tokio::test]
    async fn slot_of_a_consumed_song_is_reclaimed_before_reuse() {
        let mut h = harness(2);
        h.coord.add_song("A").await;
        h.coord.add_song("B").await;
        h.coord.add_song("C").await;

        let a = h.next_fetch().await;
        assert!(h.coord.skip().await);
        let snap = h.coord.snapshot().await;
        assert_eq!(snap.songs[1].code, "C");
        assert_eq!(snap.songs[1].status, SongStatus::Queued);

        // A's download lands after A was skipped
        a.succeed();
        let b = h.next_fetch().await;
        assert_eq!(b.code, "B");
        let c_pending = h.wait_for("C submitted", |s| s.songs[1].status == SongStatus::Fetching).await;
        assert_eq!(c_pending.songs[1].slot, SlotId(0));
        assert!(!h.path(0).exists());

        b.succeed();
        assert_eq!(h.next_source().await, h.path(1));
        let c = h.next_fetch().await;
        assert_eq!(c.code, "C");
        assert_eq!(c.dest, h.path(0));
    }

    #[tokio::test]
    async fn draining_the_queue_resets_the_engine() {
        let mut h = harness(5);
        let mut events = h.coord.subscribe();
        h.coord.add_song("A").await;
        h.next_fetch().await.succeed();
        h.next_source().await;

        assert!(h.engines.finish_current());
        h.wait_for("queue empty", |s| s.songs.is_empty()).await;

        h.coord.add_song("B").await;
        h.next_fetch().await.succeed();

        let mut created = 0;
        loop {
            match recv_timeout(&mut h.calls).await {
                EngineCall::Created => created += 1,
                EngineCall::Source(_) => break,
                _ => {}
            }
        }
        assert_eq!(created, 1, "a fresh engine is built for B");

        let mut resets = 0;
        while let Ok(ev) = events.try_recv() {
            if ev == QueueEvent::EngineReset {
                resets += 1;
            }
        }
        assert_eq!(resets, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_keep_the_queue_consistent() {
        let h = harness(5);
        let mut tasks = Vec::new();
        for i in 0..40 {
            let coord = h.coord.clone();
            tasks.push(tokio::spawn(async move { coord.add_song(&format!("s{i}")).await }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let snap = h.coord.snapshot().await;
        assert_eq!(snap.songs.len(), 40);
        for (pos, song) in snap.songs.iter().enumerate() {
            assert_eq!(song.slot, SlotId(pos % 5));
        }
        let requested = snap.songs.iter().filter(|s| s.status == SongStatus::Fetching).count();
        assert_eq!(requested, 5);
    }
}
