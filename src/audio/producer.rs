use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use crate::audio::{
    ogg, StreamHandle, BIT_RATE, BUFFER_SECONDS, CHANNELS, FRAMES_PER_SECOND, FRAME_DURATION,
};
use crate::error::{Error, Result};

/// Spawns the transcoder for `input` and returns the producer handle.
///
/// `input` is a URL, a file path, or `pipe:` together with `stdin` bytes.
/// With `inet_only` set, anything that is not an http/https address fails
/// immediately with [`Error::NotHttp`]. A nonzero `seek` asks the
/// transcoder for an accurate seek; `speed` outside 1.0 applies a tempo
/// filter and must stay within 0.5-3.0.
pub fn stream(
    ffmpeg_path: &str,
    input: &str,
    stdin: Option<Vec<u8>>,
    seek_seconds: f64,
    speed: f64,
    inet_only: bool,
) -> StreamHandle {
    let (frame_tx, frames) = mpsc::channel(BUFFER_SECONDS * FRAMES_PER_SECOND);
    let (err_tx, errors) = mpsc::channel(1);
    let (kill, kill_rx) = oneshot::channel();

    let ffmpeg_path = ffmpeg_path.to_string();
    let input = input.to_string();
    tokio::spawn(async move {
        let result = run(
            &ffmpeg_path,
            &input,
            stdin,
            seek_seconds,
            speed,
            inet_only,
            frame_tx,
            kill_rx,
        )
        .await;
        if let Err(err) = result {
            let _ = err_tx.send(err).await;
        }
    });

    StreamHandle { frames, errors, kill }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    ffmpeg_path: &str,
    input: &str,
    stdin: Option<Vec<u8>>,
    seek_seconds: f64,
    speed: f64,
    inet_only: bool,
    frames: mpsc::Sender<Vec<u8>>,
    mut kill: oneshot::Receiver<()>,
) -> Result<()> {
    if inet_only && !(input.starts_with("http://") || input.starts_with("https://")) {
        return Err(Error::NotHttp);
    }
    if speed != 1.0 && !(0.5..=3.0).contains(&speed) {
        return Err(Error::InvalidSpeed(speed));
    }

    let mut cmd = Command::new(ffmpeg_path);
    cmd.args(["-vn", "-sn", "-dn"]);
    if seek_seconds != 0.0 {
        cmd.arg("-accurate_seek")
            .arg("-ss")
            .arg(format!("{seek_seconds:.5}"));
    }
    cmd.arg("-i").arg(input);
    if speed != 1.0 {
        cmd.arg("-filter:a").arg(format!("atempo={speed:.5}"));
    }
    cmd.arg("-ab")
        .arg(BIT_RATE.to_string())
        .arg("-ac")
        .arg(CHANNELS.to_string())
        .arg("-frame_size")
        .arg(((FRAME_DURATION * 1000.0) as u32).to_string())
        .args(["-f", "opus", "pipe:1"])
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;

    if let Some(bytes) = stdin {
        let mut child_stdin = child.stdin.take().expect("stdin is piped");
        tokio::spawn(async move {
            let _ = child_stdin.write_all(&bytes).await;
            let _ = child_stdin.shutdown().await;
        });
    }

    let stdout = child.stdout.take().expect("stdout is piped");
    let stderr = child.stderr.take().expect("stderr is piped");

    // Keep the transcoder's last complaint around for the exit error.
    let stderr_tail = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut last = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                last = line;
            }
        }
        last
    });

    let mut packets = ogg::PacketReader::new(BufReader::new(stdout));

    loop {
        // A dropped kill sender counts as a kill: the consumer is gone.
        let next = tokio::select! {
            _ = &mut kill => {
                interrupt(child);
                return Ok(());
            }
            packet = packets.next_packet() => packet,
        };
        match next {
            Ok(Some(frame)) => {
                tokio::select! {
                    _ = &mut kill => {
                        interrupt(child);
                        return Ok(());
                    }
                    sent = frames.send(frame) => {
                        if sent.is_err() {
                            interrupt(child);
                            return Ok(());
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                interrupt(child);
                return Err(err);
            }
        }
    }

    log::debug!("transcoder output finished, waiting for exit");
    let status = tokio::select! {
        _ = &mut kill => {
            interrupt(child);
            return Ok(());
        }
        status = child.wait() => status?,
    };
    if !status.success() {
        let detail = stderr_tail.await.unwrap_or_default();
        return Err(Error::Transcoder {
            status: status.code().unwrap_or(-1),
            detail,
        });
    }
    Ok(())
}

/// Interrupts the transcoder and reaps it in the background.
fn interrupt(mut child: Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGINT);
        }
    }
    #[cfg(not(unix))]
    let _ = child.start_kill();
    tokio::spawn(async move {
        let _ = child.wait().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_http_input_when_inet_only() {
        let mut handle = stream("ffmpeg", "/tmp/local.opus", None, 0.0, 1.0, true);
        assert!(matches!(handle.errors.recv().await, Some(Error::NotHttp)));
        assert!(handle.errors.recv().await.is_none());
        assert!(handle.frames.recv().await.is_none());
    }

    #[tokio::test]
    async fn rejects_out_of_range_speed() {
        let mut handle = stream("ffmpeg", "http://localhost/a.opus", None, 0.0, 5.0, true);
        assert!(matches!(
            handle.errors.recv().await,
            Some(Error::InvalidSpeed(_))
        ));
    }

    #[tokio::test]
    async fn surfaces_spawn_failure() {
        let mut handle = stream(
            "/nonexistent/transcoder-binary",
            "http://localhost/a.opus",
            None,
            0.0,
            1.0,
            true,
        );
        assert!(matches!(handle.errors.recv().await, Some(Error::Io(_))));
        assert!(handle.frames.recv().await.is_none());
    }
}
