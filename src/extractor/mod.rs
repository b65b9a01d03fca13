//! Runs the external extraction subprocess and turns its output into a
//! lazy event stream.
//!
//! Concurrently scans stdout/stderr for log lines, waits on a completion
//! barrier for the child to exit, then checks the scratch directory's
//! contents to decide between success and failure. Events are delivered to
//! the consumer through a bounded `mpsc` channel.

mod error;

pub use error::ExtractorError;

use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use async_trait::async_trait;
use futures_util::Stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// One event emitted while extracting a URL.
///
/// At most one of [`ExtractorEvent::Failure`]/[`ExtractorEvent::Success`]
/// terminates a given stream; any number of [`ExtractorEvent::Log`] events
/// may precede it.
#[derive(Debug, Clone)]
pub enum ExtractorEvent {
    /// One line of subprocess stdout or stderr output.
    Log(String),
    /// Terminal: the subprocess failed, or its output was unusable.
    Failure(ExtractorError),
    /// Terminal: the subprocess produced exactly one output file at `path`.
    Success(PathBuf),
}

/// Bounded channel capacity between the producer task and the consumer
/// stream. Capacity 1 means the producer can always finish writing its
/// terminal event once a slot frees, even if the consumer has stopped
/// reading log lines - it never blocks forever on a stalled consumer.
const CHANNEL_CAPACITY: usize = 1;

/// Boxed event stream returned by [`ExtractorRunner::run`].
pub type EventStream = Pin<Box<dyn Stream<Item = ExtractorEvent> + Send>>;

/// Spawns the external extraction tool and streams its events.
///
/// A trait so the [`crate::downloader::Downloader`] can be tested against a
/// scripted double instead of a real subprocess.
#[async_trait]
pub trait ExtractorRunner: Send + Sync {
    /// Starts extracting `url`, returning a stream of events. The returned
    /// stream closes after its terminal event; dropping it before that
    /// point kills the subprocess via `cancel`-independent cleanup once the
    /// background task next tries to send.
    async fn run(&self, cancel: CancellationToken, url: String) -> EventStream;
}

/// Runs a configured external binary (`yt-dlp` by default) with
/// `--newline --verbose <url>` in a fresh temporary directory.
#[derive(Debug, Clone)]
pub struct SubprocessExtractor {
    binary: String,
}

impl SubprocessExtractor {
    /// Uses `binary` as the extraction tool (e.g. `"yt-dlp"`).
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for SubprocessExtractor {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl ExtractorRunner for SubprocessExtractor {
    #[instrument(skip(self, cancel), fields(url = %url, binary = %self.binary))]
    async fn run(&self, cancel: CancellationToken, url: String) -> EventStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let binary = self.binary.clone();

        tokio::spawn(async move {
            run_and_emit(binary, url, cancel, tx).await;
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

async fn run_and_emit(
    binary: String,
    url: String,
    cancel: CancellationToken,
    tx: mpsc::Sender<ExtractorEvent>,
) {
    let temp_dir = match tempfile::Builder::new().prefix("urlpipe-").tempdir() {
        Ok(dir) => dir,
        Err(err) => {
            let _ = tx
                .send(ExtractorEvent::Failure(ExtractorError::ScratchDir(
                    err.to_string(),
                )))
                .await;
            return;
        }
    };

    let mut command = Command::new(&binary);
    command
        .current_dir(temp_dir.path())
        .arg("--newline")
        .arg("--verbose")
        .arg(&url)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            let _ = tx
                .send(ExtractorEvent::Failure(ExtractorError::Spawn(
                    err.to_string(),
                )))
                .await;
            return;
        }
    };

    let Some(stdout) = child.stdout.take() else {
        let _ = tx
            .send(ExtractorEvent::Failure(ExtractorError::Spawn(
                "missing stdout pipe".to_string(),
            )))
            .await;
        return;
    };
    let Some(stderr) = child.stderr.take() else {
        let _ = tx
            .send(ExtractorEvent::Failure(ExtractorError::Spawn(
                "missing stderr pipe".to_string(),
            )))
            .await;
        return;
    };

    let stdout_tx = tx.clone();
    let stdout_task = tokio::spawn(async move { slurp(stdout, stdout_tx).await });
    let stderr_tx = tx.clone();
    let stderr_task = tokio::spawn(async move { slurp(stderr, stderr_tx).await });

    let wait = async {
        tokio::select! {
            status = child.wait() => status.map_err(|err| ExtractorError::Io(err.to_string())),
            () = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(ExtractorError::Cancelled)
            }
        }
    };

    // Completion barrier: don't inspect exit status/output dir until both
    // scanners have drained their pipes.
    let (_, _, status) = tokio::join!(stdout_task, stderr_task, wait);

    let status = match status {
        Ok(status) if status.success() => status,
        Ok(status) => {
            let code = status.code().unwrap_or(-1);
            let _ = tx
                .send(ExtractorEvent::Failure(ExtractorError::ExitStatus {
                    status: code,
                }))
                .await;
            return;
        }
        Err(err) => {
            let _ = tx.send(ExtractorEvent::Failure(err)).await;
            return;
        }
    };
    drop(status);

    let entries = match std::fs::read_dir(temp_dir.path()) {
        Ok(entries) => entries.filter_map(Result::ok).collect::<Vec<_>>(),
        Err(err) => {
            let _ = tx
                .send(ExtractorEvent::Failure(ExtractorError::Io(
                    err.to_string(),
                )))
                .await;
            return;
        }
    };

    if entries.len() != 1 {
        let _ = tx
            .send(ExtractorEvent::Failure(
                ExtractorError::UnexpectedOutputCount {
                    found: entries.len(),
                },
            ))
            .await;
        return;
    }

    let path = entries[0].path();
    // `temp_dir` is about to drop and remove the directory; the Downloader
    // consumes the file and removes this now-persisted directory itself
    // (see `TempFileGuard`), so we release the guard here rather than let
    // it delete the directory out from under the Downloader.
    let _ = temp_dir.into_path();
    debug!(path = %path.display(), "extractor produced one output file");
    let _ = tx.send(ExtractorEvent::Success(path)).await;
}

async fn slurp(
    reader: impl tokio::io::AsyncRead + Unpin,
    tx: mpsc::Sender<ExtractorEvent>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(ExtractorEvent::Log(line)).await.is_err() {
                    // Consumer dropped the stream; stop reading, the
                    // terminal event send below will likewise no-op.
                    return;
                }
            }
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "error reading extractor output stream");
                return;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    /// A scripted `ExtractorRunner` double used by `Downloader` tests.
    pub struct ScriptedExtractor {
        events: Vec<ExtractorEvent>,
    }

    impl ScriptedExtractor {
        pub fn new(events: Vec<ExtractorEvent>) -> Self {
            Self { events }
        }
    }

    #[async_trait]
    impl ExtractorRunner for ScriptedExtractor {
        async fn run(&self, _cancel: CancellationToken, _url: String) -> EventStream {
            Box::pin(tokio_stream::iter(self.events.clone()))
        }
    }

    #[tokio::test]
    async fn scripted_extractor_replays_events_in_order() {
        let runner = ScriptedExtractor::new(vec![
            ExtractorEvent::Log("starting".to_string()),
            ExtractorEvent::Success(PathBuf::from("/tmp/out.mp4")),
        ]);

        let mut stream = runner.run(CancellationToken::new(), "https://x".to_string()).await;
        let first = stream.next().await.unwrap();
        assert!(matches!(first, ExtractorEvent::Log(line) if line == "starting"));
        let second = stream.next().await.unwrap();
        assert!(matches!(second, ExtractorEvent::Success(path) if path == PathBuf::from("/tmp/out.mp4")));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn missing_binary_yields_spawn_failure() {
        let runner = SubprocessExtractor::new("definitely-not-a-real-binary-xyz");
        let mut stream = runner
            .run(CancellationToken::new(), "https://example.com/v".to_string())
            .await;

        let event = stream.next().await.unwrap();
        assert!(matches!(event, ExtractorEvent::Failure(ExtractorError::Spawn(_))));
        assert!(stream.next().await.is_none());
    }
}
