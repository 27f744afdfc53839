pub(crate) mod ogg;
mod producer;

pub use producer::stream;

use tokio::sync::{mpsc, oneshot};

use crate::error::Error;

/// Seconds of audio the frame channel can hold ahead of playback.
pub const BUFFER_SECONDS: usize = 300;
/// Voice sinks take mono.
pub const CHANNELS: u32 = 1;
pub const BIT_RATE: u32 = 96_000;
pub const SAMPLE_RATE: u32 = 48_000;
/// Samples per frame (20 ms at 48 kHz).
pub const FRAME_SIZE: u32 = 960;
/// Seconds of audio covered by one frame.
pub const FRAME_DURATION: f64 = FRAME_SIZE as f64 / SAMPLE_RATE as f64;
pub const FRAMES_PER_SECOND: usize = (SAMPLE_RATE / FRAME_SIZE) as usize;

/// The three channels tied to one producer.
///
/// `frames` closes once the producer is done and the buffer has drained;
/// `errors` carries at most one failure and closes with it. `kill` accepts
/// exactly one signal (sending consumes it), which interrupts the
/// transcoder; dropping it unsent has the same effect once the producer
/// notices.
pub struct StreamHandle {
    pub frames: mpsc::Receiver<Vec<u8>>,
    pub errors: mpsc::Receiver<Error>,
    pub kill: oneshot::Sender<()>,
}
