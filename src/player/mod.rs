mod queue;
mod session;

pub use queue::Queue;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::events::EventHooks;
use crate::extractor::{Config as ExtractorConfig, Registry, Track};
use session::{FfmpegSource, Session};

/// Commands accepted by a player session.
///
/// Indices in `Jump`, `Swap` and `Delete` use the queue's signed index
/// space. Note that the session applies them against its own current
/// queue, which may have advanced since the caller looked.
pub enum Command {
    /// Unpause; starts the next track if nothing is streaming.
    Play,
    Pause,
    Loop(bool),
    /// Relative move, e.g. -2, -1, 4. Clamped at both ends of the queue.
    Jump(i64),
    /// Drain the playing track and everything ahead into the history.
    SkipAll,
    Shuffle,
    Unshuffle,
    Swap(i64, i64),
    Delete(Vec<i64>),
    AddFront(Vec<Track>),
    AddBack(Vec<Track>),
    /// Absolute position in seconds. Stays inside the look-ahead buffer
    /// when possible, otherwise restarts the stream there.
    Seek(f64),
    /// Playback speed factor; restarts the stream at the current time.
    Speed(f64),
    /// Plays a one-off byte payload (speed 1, no queue involvement) and
    /// signals `done` when it ends cleanly.
    PlayFileAndStop {
        done: oneshot::Sender<()>,
        data: Vec<u8>,
    },
    GetTime(oneshot::Sender<f64>),
    GetQueue(oneshot::Sender<Queue>),
    GetSpeed(oneshot::Sender<f64>),
}

/// Handle to a running player session.
///
/// Dropping the client (and every sender obtained from [`Client::sender`])
/// closes the command channel, which makes the session kill its producer,
/// fire the killed hook and exit.
pub struct Client {
    commands: mpsc::Sender<Command>,
    /// Producer and user errors surface here; read it continuously.
    pub errors: mpsc::UnboundedReceiver<Error>,
}

impl Client {
    pub async fn send(&self, cmd: Command) -> Result<()> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// An extra command sender, e.g. for a controller task.
    pub fn sender(&self) -> mpsc::Sender<Command> {
        self.commands.clone()
    }

    /// Current playback time in seconds.
    pub async fn get_time(&self) -> Result<f64> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::GetTime(tx)).await?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// A deep copy of the session's queue.
    pub async fn get_queue(&self) -> Result<Queue> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::GetQueue(tx)).await?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    pub async fn get_speed(&self) -> Result<f64> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::GetSpeed(tx)).await?;
        rx.await.map_err(|_| Error::SessionClosed)
    }
}

/// Starts a player session task for one voice connection.
///
/// Encoded audio frames are delivered through `out` at whatever rate the
/// sink consumes them; the session itself keeps no clock. Must be called
/// from within a tokio runtime.
pub fn spawn(
    cfg: ExtractorConfig,
    registry: Arc<Registry>,
    ffmpeg_path: impl Into<String>,
    out: mpsc::Sender<Vec<u8>>,
    hooks: EventHooks,
) -> Client {
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (err_tx, errors) = mpsc::unbounded_channel();
    let source = FfmpegSource {
        path: ffmpeg_path.into(),
    };
    let session = Session::new(cfg, registry, Box::new(source), out, err_tx, hooks);
    tokio::spawn(session.run(cmd_rx));
    Client {
        commands: cmd_tx,
        errors,
    }
}
