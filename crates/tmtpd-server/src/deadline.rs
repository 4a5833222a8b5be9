//! Read deadlines for client connections.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{Instant, Sleep};

#[derive(Debug, Clone, Copy)]
enum Mode {
    /// Absolute cutoff; not reset by progress. Covers the login window.
    Until(Instant),
    /// Per-read cutoff; each successful read re-arms it. Covers the
    /// pulse interval after login.
    Rolling(Duration),
}

/// Wraps a connection's read half so every read observes the link's
/// current deadline, failing with `TimedOut` when it lapses.
#[derive(Debug)]
pub struct DeadlineReader<R> {
    inner: R,
    mode: Mode,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl<R: AsyncRead + Unpin> DeadlineReader<R> {
    /// Starts in the absolute mode: all reads must complete before
    /// `deadline`.
    pub fn until(inner: R, deadline: Instant) -> DeadlineReader<R> {
        DeadlineReader {
            inner,
            mode: Mode::Until(deadline),
            sleep: None,
        }
    }

    /// Switches to the rolling mode: each read gets a fresh `timeout`.
    pub fn roll(&mut self, timeout: Duration) {
        self.mode = Mode::Rolling(timeout);
        self.sleep = None;
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DeadlineReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                if matches!(this.mode, Mode::Rolling(_)) {
                    this.sleep = None;
                }
                Poll::Ready(result)
            }
            Poll::Pending => {
                let sleep = this.sleep.get_or_insert_with(|| {
                    let at = match this.mode {
                        Mode::Until(deadline) => deadline,
                        Mode::Rolling(timeout) => Instant::now() + timeout,
                    };
                    Box::pin(tokio::time::sleep_until(at))
                });
                match sleep.as_mut().poll(cx) {
                    Poll::Ready(()) => Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "read deadline lapsed",
                    ))),
                    Poll::Pending => Poll::Pending,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test(start_paused = true)]
    async fn absolute_deadline_fires_without_data() {
        let (_writer, reader) = tokio::io::duplex(16);
        let mut reader = DeadlineReader::until(reader, Instant::now() + Duration::from_secs(5));
        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn rolling_deadline_resets_on_progress() {
        let (mut writer, reader) = tokio::io::duplex(16);
        let mut reader = DeadlineReader::until(reader, Instant::now() + Duration::from_secs(60));
        reader.roll(Duration::from_secs(10));

        let feeder = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_secs(8)).await;
                writer.write_all(b"x").await.unwrap();
            }
            // Then go quiet past the rolling window.
            tokio::time::sleep(Duration::from_secs(11)).await;
        });

        let mut buf = [0u8; 1];
        for _ in 0..3 {
            reader.read_exact(&mut buf).await.unwrap();
        }
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        feeder.await.unwrap();
    }
}
