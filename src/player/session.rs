use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use crate::audio::{self, StreamHandle};
use crate::error::Error;
use crate::events::EventHooks;
use crate::extractor::{Config as ExtractorConfig, Registry, Track};
use crate::player::{Command, Queue};

/// A stream error older than this may be retried; a younger one skips the
/// track instead.
const RETRY_WINDOW: Duration = Duration::from_secs(5);

pub(crate) struct StreamRequest {
    pub input: String,
    pub stdin: Option<Vec<u8>>,
    pub seek: f64,
    pub speed: f64,
    pub inet_only: bool,
}

/// Seam between the session loop and the transcoder process, so tests can
/// drive the loop without ffmpeg.
pub(crate) trait StreamSource: Send {
    fn open(&mut self, req: StreamRequest) -> StreamHandle;
}

pub(crate) struct FfmpegSource {
    pub path: String,
}

impl StreamSource for FfmpegSource {
    fn open(&mut self, req: StreamRequest) -> StreamHandle {
        audio::stream(
            &self.path,
            &req.input,
            req.stdin,
            req.seek,
            req.speed,
            req.inet_only,
        )
    }
}

enum Tick {
    Cmd(Option<Command>),
    StreamErr(Option<Error>),
    Frame(Option<Vec<u8>>),
}

enum Reextract {
    Replaced(Track),
    BadData,
    Skip,
}

/// One voice session's player state, owned by a single task.
///
/// The producer lives in the three slots `frames`/`errors`/`kill`; they
/// are always reset together, because a slot left behind after its
/// producer died would park the loop on a channel nobody serves. A stream
/// ends in exactly one of three ways, each with its own path through the
/// loop: the user kills it, it fails with an error, or it closes its frame
/// channel cleanly.
pub(crate) struct Session {
    queue: Queue,
    frames: Option<mpsc::Receiver<Vec<u8>>>,
    errors: Option<mpsc::Receiver<Error>>,
    kill: Option<oneshot::Sender<()>>,
    frames_delivered: u64,
    t_start: f64,
    speed: f64,
    last_stream_err: Option<Instant>,
    file_done: Option<oneshot::Sender<()>>,
    out: mpsc::Sender<Vec<u8>>,
    err_tx: mpsc::UnboundedSender<Error>,
    cfg: ExtractorConfig,
    registry: Arc<Registry>,
    source: Box<dyn StreamSource>,
    hooks: EventHooks,
}

impl Session {
    pub(crate) fn new(
        cfg: ExtractorConfig,
        registry: Arc<Registry>,
        source: Box<dyn StreamSource>,
        out: mpsc::Sender<Vec<u8>>,
        err_tx: mpsc::UnboundedSender<Error>,
        hooks: EventHooks,
    ) -> Self {
        Self {
            queue: Queue::default(),
            frames: None,
            errors: None,
            kill: None,
            frames_delivered: 0,
            t_start: 0.0,
            speed: 1.0,
            last_stream_err: None,
            file_done: None,
            out,
            err_tx,
            cfg,
            registry,
            source,
            hooks,
        }
    }

    /// The session loop. Suspends only on the three-way wait below; the
    /// output sink's consumption rate provides all real-time pacing.
    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let frames_live = self.frames.is_some() && !self.queue.paused;
            let errors_live = self.errors.is_some();
            let tick = tokio::select! {
                biased;
                cmd = commands.recv() => Tick::Cmd(cmd),
                err = recv_opt(&mut self.errors), if errors_live => Tick::StreamErr(err),
                frame = recv_opt(&mut self.frames), if frames_live => Tick::Frame(frame),
            };
            match tick {
                Tick::Frame(Some(frame)) => {
                    let _ = self.out.send(frame).await;
                    self.frames_delivered += 1;
                }
                Tick::Frame(None) => self.on_stream_finished().await,
                Tick::StreamErr(Some(err)) => self.on_stream_error(err).await,
                Tick::StreamErr(None) => {
                    // Producer exited cleanly; let buffered frames drain.
                    self.errors = None;
                    self.kill = None;
                }
                Tick::Cmd(Some(cmd)) => self.handle_command(cmd).await,
                Tick::Cmd(None) => {
                    log::debug!("command channel closed, shutting down session");
                    self.kill_stream();
                    self.hooks.killed();
                    return;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Play => {
                self.queue.paused = false;
                if self.frames.is_none() {
                    self.jump(1).await;
                }
            }
            Command::Pause => self.queue.paused = true,
            Command::Loop(on) => self.queue.looping = on,
            Command::Jump(n) => self.jump(n).await,
            Command::SkipAll => {
                self.kill_stream();
                self.queue.skip_all();
            }
            Command::Shuffle => self.queue.shuffle(),
            Command::Unshuffle => self.queue.unshuffle(),
            Command::Swap(a, b) => {
                if self.queue.in_bounds(a) && self.queue.in_bounds(b) {
                    self.queue.ahead_unshuffled = None;
                    let replaces_playing = a == 0 || b == 0;
                    if replaces_playing {
                        self.kill_stream();
                    }
                    self.queue.swap_signed(a, b);
                    if replaces_playing {
                        self.refresh_stream(0.0, self.speed).await;
                    }
                }
            }
            Command::Delete(mut indices) => {
                self.queue.ahead_unshuffled = None;
                // Largest distance from the playhead first, so removals
                // don't invalidate the indices still to come.
                indices.sort_by(|a, b| b.abs().cmp(&a.abs()));
                for i in indices {
                    if i == 0 {
                        self.kill_stream();
                        self.queue.playing = None;
                        self.refresh_stream(0.0, self.speed).await;
                    } else {
                        self.queue.remove_signed(i);
                    }
                }
            }
            Command::AddFront(tracks) => {
                self.queue.ahead.splice(0..0, tracks);
                self.queue.shuffle_offset += 1;
            }
            Command::AddBack(mut tracks) => self.queue.ahead.append(&mut tracks),
            Command::Seek(target) => {
                if target > self.playback_time() && target < self.buffered_time() {
                    log::debug!("seeking to {target}s within the buffer");
                    while self.playback_time() < target {
                        let Some(frames) = self.frames.as_mut() else {
                            break;
                        };
                        match frames.recv().await {
                            Some(_) => self.frames_delivered += 1,
                            None => break,
                        }
                    }
                } else {
                    log::debug!("seeking to {target}s by restarting the stream");
                    self.refresh_stream(target, self.speed).await;
                }
            }
            Command::Speed(speed) => {
                let at = self.playback_time();
                self.refresh_stream(at, speed).await;
            }
            Command::PlayFileAndStop { done, data } => {
                self.kill_stream();
                let handle = self.source.open(StreamRequest {
                    input: "pipe:".to_string(),
                    stdin: Some(data),
                    seek: 0.0,
                    speed: 1.0,
                    inet_only: false,
                });
                self.install(handle);
                self.frames_delivered = 0;
                self.t_start = 0.0;
                self.speed = 1.0;
                self.queue.paused = false;
                self.queue.looping = false;
                self.file_done = Some(done);
            }
            Command::GetTime(reply) => {
                let _ = reply.send(self.playback_time());
            }
            Command::GetQueue(reply) => {
                let _ = reply.send(self.queue.clone());
            }
            Command::GetSpeed(reply) => {
                let _ = reply.send(self.speed);
            }
        }
    }

    async fn on_stream_finished(&mut self) {
        self.reset_slots();
        if let Some(done) = self.file_done.take() {
            let _ = done.send(());
        }
        log::debug!("frame channel closed, advancing");
        if self.queue.looping {
            self.refresh_stream(0.0, self.speed).await;
        } else {
            self.jump(1).await;
        }
    }

    async fn on_stream_error(&mut self, err: Error) {
        let _ = self.err_tx.send(err);
        self.reset_slots();
        // One automatic resurrection per window; a second failure inside
        // it skips the track.
        let now = Instant::now();
        if self.retry_allowed(now) {
            let at = self.playback_time();
            self.refresh_stream(at, self.speed).await;
        } else {
            self.jump(1).await;
            let _ = self.err_tx.send(Error::StreamSkipped);
        }
        self.last_stream_err = Some(now);
    }

    async fn jump(&mut self, n: i64) {
        self.kill_stream();
        self.queue.shift(n);
        self.refresh_stream(0.0, self.speed).await;
    }

    /// Tears down the producer and starts a new one for the playing track,
    /// re-extracting the stream URL first when it is missing or expired.
    /// With nothing playing this resets to the idle state. Either way the
    /// stream-updated hook fires once.
    async fn refresh_stream(&mut self, seek: f64, speed: f64) {
        let mut seek = seek;
        loop {
            let Some(playing) = self.queue.playing.clone() else {
                self.frames_delivered = 0;
                self.t_start = 0.0;
                self.speed = 1.0;
                self.hooks.stream_updated();
                return;
            };
            self.kill_stream();

            if playing.stream_url.is_empty() || Utc::now() >= playing.expires {
                match self.reextract(&playing.source_url).await {
                    Reextract::Replaced(track) => self.queue.playing = Some(track),
                    Reextract::BadData => {
                        let _ = self.err_tx.send(Error::InvalidRefreshData);
                    }
                    Reextract::Skip => {
                        let _ = self.err_tx.send(Error::StreamSkipped);
                        self.queue.shift(1);
                        seek = 0.0;
                        continue;
                    }
                }
            }

            let input = self
                .queue
                .playing
                .as_ref()
                .map(|t| t.stream_url.clone())
                .unwrap_or_default();
            let handle = self.source.open(StreamRequest {
                input,
                stdin: None,
                seek,
                speed,
                inet_only: true,
            });
            self.install(handle);
            self.frames_delivered = 0;
            self.t_start = seek;
            self.speed = speed;
            self.hooks.stream_updated();
            return;
        }
    }

    /// Re-runs extraction for the playing track's source URL. Retries
    /// immediately on the first failure in a while; a second failure
    /// within the window gives up.
    async fn reextract(&mut self, source_url: &str) -> Reextract {
        loop {
            match self.registry.extract(&self.cfg, source_url).await {
                Ok(mut tracks) => {
                    if tracks.len() == 1 {
                        return Reextract::Replaced(tracks.remove(0));
                    }
                    return Reextract::BadData;
                }
                Err(err) => {
                    log::warn!("stream refresh failed: {err}");
                    let now = Instant::now();
                    let retry = self.retry_allowed(now);
                    self.last_stream_err = Some(now);
                    if !retry {
                        return Reextract::Skip;
                    }
                }
            }
        }
    }

    fn retry_allowed(&self, now: Instant) -> bool {
        match self.last_stream_err {
            Some(prev) => now.duration_since(prev) > RETRY_WINDOW,
            None => true,
        }
    }

    /// Kills any live producer and clears all three slots. Sending on the
    /// one-shot kill consumes it, so a second kill cannot happen.
    fn kill_stream(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
        self.frames = None;
        self.errors = None;
    }

    fn reset_slots(&mut self) {
        self.frames = None;
        self.errors = None;
        self.kill = None;
    }

    fn install(&mut self, handle: StreamHandle) {
        self.frames = Some(handle.frames);
        self.errors = Some(handle.errors);
        self.kill = Some(handle.kill);
    }

    fn playback_time(&self) -> f64 {
        self.t_start + self.frames_delivered as f64 * audio::FRAME_DURATION * self.speed
    }

    /// Playback time of the last frame sitting in the look-ahead buffer.
    fn buffered_time(&self) -> f64 {
        let pending = self.frames.as_ref().map(|rx| rx.len()).unwrap_or(0) as u64;
        self.t_start
            + (self.frames_delivered + pending) as f64 * audio::FRAME_DURATION * self.speed
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{BUFFER_SECONDS, FRAMES_PER_SECOND};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Copy)]
    enum Script {
        /// Deliver `frames`, then keep the stream open until killed.
        Open { frames: usize },
        /// Deliver `frames`, then end the stream cleanly.
        Finish { frames: usize },
        /// Fail immediately with a transcoder error.
        Fail,
    }

    struct OpenLog {
        input: String,
        stdin: Option<Vec<u8>>,
        seek: f64,
        speed: f64,
        inet_only: bool,
        ended: Arc<AtomicBool>,
    }

    struct MockSource {
        script: VecDeque<Script>,
        log: Arc<StdMutex<Vec<OpenLog>>>,
    }

    impl StreamSource for MockSource {
        fn open(&mut self, req: StreamRequest) -> StreamHandle {
            let step = self.script.pop_front().unwrap_or(Script::Open { frames: 0 });
            let (frame_tx, frames) = mpsc::channel(BUFFER_SECONDS * FRAMES_PER_SECOND);
            let (err_tx, errors) = mpsc::channel(1);
            let (kill, kill_rx) = oneshot::channel();
            let ended = Arc::new(AtomicBool::new(false));
            self.log.lock().unwrap().push(OpenLog {
                input: req.input,
                stdin: req.stdin,
                seek: req.seek,
                speed: req.speed,
                inet_only: req.inet_only,
                ended: ended.clone(),
            });
            tokio::spawn(async move {
                let (count, finish, fail) = match step {
                    Script::Open { frames } => (frames, false, false),
                    Script::Finish { frames } => (frames, true, false),
                    Script::Fail => (0, false, true),
                };
                if fail {
                    let _ = err_tx
                        .send(Error::Transcoder {
                            status: 1,
                            detail: "boom".to_string(),
                        })
                        .await;
                    ended.store(true, Ordering::SeqCst);
                    return;
                }
                for _ in 0..count {
                    if frame_tx.send(vec![0u8; 4]).await.is_err() {
                        break;
                    }
                }
                if finish {
                    ended.store(true, Ordering::SeqCst);
                    return;
                }
                tokio::select! {
                    _ = kill_rx => {}
                    _ = frame_tx.closed() => {}
                }
                ended.store(true, Ordering::SeqCst);
            });
            StreamHandle { frames, errors, kill }
        }
    }

    struct Harness {
        cmd: mpsc::Sender<Command>,
        errors: mpsc::UnboundedReceiver<Error>,
        out: mpsc::Receiver<Vec<u8>>,
        log: Arc<StdMutex<Vec<OpenLog>>>,
        updated: Arc<AtomicUsize>,
        killed: Arc<AtomicBool>,
    }

    impl Harness {
        fn start(script: Vec<Script>, out_capacity: usize) -> Self {
            let log = Arc::new(StdMutex::new(Vec::new()));
            let source = MockSource {
                script: script.into(),
                log: log.clone(),
            };
            let (out_tx, out) = mpsc::channel(out_capacity);
            let (err_tx, errors) = mpsc::unbounded_channel();
            let (cmd_tx, cmd_rx) = mpsc::channel(16);
            let updated = Arc::new(AtomicUsize::new(0));
            let killed = Arc::new(AtomicBool::new(false));
            let updated_hook = updated.clone();
            let killed_hook = killed.clone();
            let hooks = EventHooks {
                on_stream_updated: Some(Box::new(move || {
                    updated_hook.fetch_add(1, Ordering::SeqCst);
                })),
                on_killed: Some(Box::new(move || {
                    killed_hook.store(true, Ordering::SeqCst);
                })),
            };
            let session = Session::new(
                ExtractorConfig::new(),
                Arc::new(Registry::default()),
                Box::new(source),
                out_tx,
                err_tx,
                hooks,
            );
            tokio::spawn(session.run(cmd_rx));
            Self {
                cmd: cmd_tx,
                errors,
                out,
                log,
                updated,
                killed,
            }
        }

        async fn send(&self, cmd: Command) {
            self.cmd.send(cmd).await.expect("session alive");
        }

        async fn queue(&self) -> Queue {
            let (tx, rx) = oneshot::channel();
            self.send(Command::GetQueue(tx)).await;
            rx.await.expect("session alive")
        }

        async fn time(&self) -> f64 {
            let (tx, rx) = oneshot::channel();
            self.send(Command::GetTime(tx)).await;
            rx.await.expect("session alive")
        }

        /// GetTime while draining the sink, for when the session may be
        /// blocked mid-frame on a full output channel.
        async fn time_draining(&mut self) -> f64 {
            let (tx, mut rx) = oneshot::channel();
            self.cmd
                .send(Command::GetTime(tx))
                .await
                .expect("session alive");
            loop {
                tokio::select! {
                    time = &mut rx => return time.expect("session alive"),
                    _ = self.out.recv() => {}
                }
            }
        }

        fn opens(&self) -> usize {
            self.log.lock().unwrap().len()
        }

        async fn wait_for(&self, what: &str, cond: impl Fn(&Harness) -> bool) {
            for _ in 0..500 {
                if cond(self) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            panic!("timed out waiting for {what}");
        }
    }

    fn track(n: u32) -> Track {
        Track {
            source_url: format!("https://example.com/{n}"),
            stream_url: format!("https://example.com/{n}/stream"),
            title: format!("track {n}"),
            duration: 120,
            expires: Utc::now() + chrono::Duration::hours(6),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn play_starts_the_first_queued_track() {
        let h = Harness::start(vec![Script::Open { frames: 0 }], 64);
        h.send(Command::AddBack(vec![track(1), track(2)])).await;
        h.send(Command::Play).await;

        let q = h.queue().await;
        assert_eq!(q.playing.as_ref().unwrap().title, "track 1");
        assert_eq!(q.ahead.len(), 1);
        assert_eq!(q.ahead[0].title, "track 2");
        assert!(q.done.is_empty());

        assert_eq!(h.updated.load(Ordering::SeqCst), 1);
        let log = h.log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].input, "https://example.com/1/stream");
        assert_eq!(log[0].seek, 0.0);
        assert_eq!(log[0].speed, 1.0);
        assert!(log[0].inet_only);
    }

    #[tokio::test]
    async fn looping_restarts_the_track_on_clean_end() {
        let mut h = Harness::start(
            vec![Script::Finish { frames: 2 }, Script::Open { frames: 0 }],
            64,
        );
        h.send(Command::AddBack(vec![track(1)])).await;
        h.send(Command::Loop(true)).await;
        h.send(Command::Play).await;

        assert!(h.out.recv().await.is_some());
        assert!(h.out.recv().await.is_some());
        h.wait_for("the looped restart", |h| h.opens() == 2).await;

        let q = h.queue().await;
        assert!(q.done.is_empty());
        assert_eq!(q.playing.as_ref().unwrap().title, "track 1");
        let log = h.log.lock().unwrap();
        assert_eq!(log[1].input, "https://example.com/1/stream");
        assert_eq!(log[1].seek, 0.0);
    }

    #[tokio::test]
    async fn jumping_past_the_end_parks_playback() {
        let h = Harness::start(
            vec![Script::Open { frames: 0 }, Script::Open { frames: 0 }],
            64,
        );
        h.send(Command::AddBack(vec![track(1), track(2)])).await;
        h.send(Command::Play).await;
        h.send(Command::Jump(1)).await;
        h.send(Command::Jump(5)).await;

        let q = h.queue().await;
        assert!(q.playing.is_none());
        assert!(q.ahead.is_empty());
        assert_eq!(q.done.len(), 2);
        assert_eq!(h.time().await, 0.0);

        h.wait_for("producer teardown", |h| {
            h.log.lock().unwrap().iter().all(|l| l.ended.load(Ordering::SeqCst))
        })
        .await;
        assert_eq!(h.opens(), 2);
    }

    #[tokio::test]
    async fn deleting_the_playing_track_tears_the_stream_down() {
        let h = Harness::start(
            vec![Script::Open { frames: 0 }, Script::Open { frames: 0 }],
            64,
        );
        h.send(Command::AddBack(vec![track(1), track(2), track(3)]))
            .await;
        h.send(Command::Play).await;
        h.send(Command::Delete(vec![0])).await;

        let q = h.queue().await;
        assert!(q.playing.is_none());
        assert_eq!(q.ahead.len(), 2);
        assert!(q.done.is_empty());
        h.wait_for("producer teardown", |h| {
            h.log.lock().unwrap()[0].ended.load(Ordering::SeqCst)
        })
        .await;

        h.send(Command::Play).await;
        let q = h.queue().await;
        assert_eq!(q.playing.as_ref().unwrap().title, "track 2");
        assert_eq!(h.opens(), 2);
    }

    #[tokio::test]
    async fn pause_gates_the_frame_channel() {
        let mut h = Harness::start(vec![Script::Open { frames: 5 }], 64);
        h.send(Command::AddBack(vec![track(1)])).await;
        h.send(Command::Play).await;
        h.send(Command::Pause).await;

        // Commands outrank frames in the loop, so nothing was forwarded.
        assert_eq!(h.time().await, 0.0);

        h.send(Command::Play).await;
        for _ in 0..5 {
            assert!(h.out.recv().await.is_some());
        }
        let time = h.time().await;
        assert!((time - 0.1).abs() < 1e-9, "got {time}");
        assert_eq!(h.opens(), 1);
    }

    #[tokio::test]
    async fn seek_within_the_buffer_drains_without_restarting() {
        let mut h = Harness::start(vec![Script::Open { frames: 1500 }], 1);
        h.send(Command::AddBack(vec![track(1)])).await;
        h.send(Command::Play).await;

        for _ in 0..100 {
            assert!(h.out.recv().await.is_some());
        }
        h.send(Command::Seek(5.0)).await;
        let time = h.time_draining().await;
        assert!((5.0..5.1).contains(&time), "got {time}");
        assert_eq!(h.opens(), 1);

        // Outside the buffer the stream restarts with a transcoder seek.
        h.send(Command::Seek(60.0)).await;
        let time = h.time_draining().await;
        assert_eq!(time, 60.0);
        assert_eq!(h.opens(), 2);
        assert_eq!(h.log.lock().unwrap()[1].seek, 60.0);
    }

    #[tokio::test]
    async fn speed_change_restarts_at_the_current_time() {
        let h = Harness::start(
            vec![Script::Open { frames: 0 }, Script::Open { frames: 0 }],
            64,
        );
        h.send(Command::AddBack(vec![track(1)])).await;
        h.send(Command::Play).await;
        h.send(Command::Speed(1.5)).await;

        let (tx, rx) = oneshot::channel();
        h.send(Command::GetSpeed(tx)).await;
        assert_eq!(rx.await.unwrap(), 1.5);
        let log = h.log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].speed, 1.5);
        assert_eq!(log[1].seek, 0.0);
    }

    #[tokio::test]
    async fn second_error_in_the_window_skips_the_track() {
        let mut h = Harness::start(
            vec![Script::Fail, Script::Fail, Script::Open { frames: 0 }],
            64,
        );
        h.send(Command::AddBack(vec![track(1), track(2)])).await;
        h.send(Command::Play).await;

        assert!(matches!(
            h.errors.recv().await,
            Some(Error::Transcoder { .. })
        ));
        assert!(matches!(
            h.errors.recv().await,
            Some(Error::Transcoder { .. })
        ));
        assert!(matches!(h.errors.recv().await, Some(Error::StreamSkipped)));

        let q = h.queue().await;
        assert_eq!(q.playing.as_ref().unwrap().title, "track 2");
        assert_eq!(q.done.len(), 1);
        let log = h.log.lock().unwrap();
        assert_eq!(log.len(), 3);
        // The one automatic retry replays the same track.
        assert_eq!(log[1].input, "https://example.com/1/stream");
        assert_eq!(log[2].input, "https://example.com/2/stream");
    }

    #[tokio::test]
    async fn swapping_with_the_playing_slot_restarts_the_stream() {
        let h = Harness::start(
            vec![Script::Open { frames: 0 }, Script::Open { frames: 0 }],
            64,
        );
        h.send(Command::AddBack(vec![track(1), track(2)])).await;
        h.send(Command::Play).await;
        h.send(Command::Swap(0, 1)).await;

        let q = h.queue().await;
        assert_eq!(q.playing.as_ref().unwrap().title, "track 2");
        assert_eq!(q.ahead[0].title, "track 1");
        assert!(q.ahead_unshuffled.is_none());
        let log = h.log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].input, "https://example.com/2/stream");
    }

    #[tokio::test]
    async fn file_playback_signals_completion_and_stops() {
        let mut h = Harness::start(
            vec![Script::Open { frames: 0 }, Script::Finish { frames: 1 }],
            64,
        );
        h.send(Command::AddBack(vec![track(1)])).await;
        h.send(Command::Loop(true)).await;
        h.send(Command::Play).await;

        let (done_tx, done_rx) = oneshot::channel();
        h.send(Command::PlayFileAndStop {
            done: done_tx,
            data: b"jingle-bytes".to_vec(),
        })
        .await;

        assert!(h.out.recv().await.is_some());
        done_rx.await.expect("file playback completion");

        let q = h.queue().await;
        assert!(!q.looping);
        assert!(!q.paused);
        // The clean end of the file stream advances past track 1.
        assert_eq!(q.done.len(), 1);
        assert!(q.playing.is_none());

        let log = h.log.lock().unwrap();
        assert_eq!(log[1].input, "pipe:");
        assert_eq!(log[1].stdin.as_deref(), Some(b"jingle-bytes".as_slice()));
        assert!(!log[1].inet_only);
        assert!(log[0].ended.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn closing_the_command_channel_kills_and_fires_the_hook() {
        let h = Harness::start(vec![Script::Open { frames: 0 }], 64);
        h.send(Command::AddBack(vec![track(1)])).await;
        h.send(Command::Play).await;

        let Harness { cmd, log, killed, .. } = h;
        drop(cmd);

        for _ in 0..500 {
            if killed.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(killed.load(Ordering::SeqCst));
        assert!(log.lock().unwrap()[0].ended.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn skip_all_drains_the_queue_and_kills_the_stream() {
        let h = Harness::start(vec![Script::Open { frames: 0 }], 64);
        h.send(Command::AddBack(vec![track(1), track(2), track(3)]))
            .await;
        h.send(Command::Play).await;
        h.send(Command::SkipAll).await;

        let q = h.queue().await;
        assert!(q.playing.is_none());
        assert!(q.ahead.is_empty());
        assert_eq!(q.done.len(), 3);
        h.wait_for("producer teardown", |h| {
            h.log.lock().unwrap()[0].ended.load(Ordering::SeqCst)
        })
        .await;
    }
}
