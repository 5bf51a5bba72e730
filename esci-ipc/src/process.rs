//! Helper-process lifecycle
//!
//! A helper is a subordinate executable that prints the ephemeral TCP
//! port it listens on as a single ASCII line on stdout, then enters its
//! service loop. The parent reads that one line, connects a dedicated
//! socket, and from then on talks only the message framing.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::{EXCHANGE_TIMEOUT_SECS, STARTUP_TIMEOUT_SECS};

/// A spawned helper and the socket connected to it
pub struct HelperProcess {
    child: Child,
    stream: TcpStream,
    exchange_timeout: Duration,
    program: String,
}

impl HelperProcess {
    /// Spawn `program`, discover its port, and connect.
    ///
    /// Fails if the child exits before announcing a port, announces
    /// something that is not a port number, or the connect times out.
    pub async fn spawn(program: &str, args: &[&str]) -> Result<Self> {
        info!(program, "Spawning helper process");

        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::BadPortAnnouncement("stdout not captured".into()))?;

        let mut lines = BufReader::new(stdout).lines();
        let announcement = timeout(
            Duration::from_secs(STARTUP_TIMEOUT_SECS),
            lines.next_line(),
        )
        .await
        .map_err(|_| Error::Timeout {
            seconds: STARTUP_TIMEOUT_SECS,
        })??
        .ok_or(Error::HelperExited)?;

        let port: u16 = announcement
            .trim()
            .parse()
            .map_err(|_| Error::BadPortAnnouncement(announcement.clone()))?;

        // The child may have printed a port and then died; check before
        // declaring the helper alive.
        if child.try_wait()?.is_some() {
            return Err(Error::HelperExited);
        }

        debug!(program, port, "Helper announced port, connecting");

        let stream = timeout(
            Duration::from_secs(STARTUP_TIMEOUT_SECS),
            TcpStream::connect(("127.0.0.1", port)),
        )
        .await
        .map_err(|_| Error::Timeout {
            seconds: STARTUP_TIMEOUT_SECS,
        })??;

        stream.set_nodelay(true)?;

        Ok(Self {
            child,
            stream,
            exchange_timeout: Duration::from_secs(EXCHANGE_TIMEOUT_SECS),
            program: program.to_string(),
        })
    }

    /// One blocking request/reply exchange with timeout on each half
    pub async fn exchange(&mut self, request: &Message) -> Result<Message> {
        let secs = self.exchange_timeout.as_secs();

        timeout(self.exchange_timeout, request.write_to(&mut self.stream))
            .await
            .map_err(|_| Error::Timeout { seconds: secs })??;

        let reply = timeout(self.exchange_timeout, Message::read_from(&mut self.stream))
            .await
            .map_err(|_| Error::Timeout { seconds: secs })??;

        if reply.id != request.id {
            return Err(Error::CorrelationMismatch {
                sent: request.id,
                received: reply.id,
            });
        }

        Ok(reply)
    }

    /// Terminate the helper and reap it.
    ///
    /// An abnormal exit status is logged but not an error: the helper
    /// was asked to die.
    pub async fn shutdown(mut self) -> Result<()> {
        debug!(program = %self.program, "Shutting down helper");

        drop(self.stream);
        self.child.start_kill()?;

        match self.child.wait().await {
            Ok(status) if status.success() => {
                debug!(program = %self.program, "Helper exited cleanly")
            }
            Ok(status) => {
                warn!(program = %self.program, %status, "Helper exited abnormally")
            }
            Err(e) => warn!(program = %self.program, error = %e, "Failed to reap helper"),
        }

        Ok(())
    }
}

/// One request/reply round with a helper peer.
///
/// [`HelperProcess`] is the production implementation; tests substitute
/// an in-memory stream.
#[async_trait::async_trait]
pub trait Exchanger: Send {
    async fn exchange(&mut self, request: &Message) -> Result<Message>;
}

#[async_trait::async_trait]
impl Exchanger for HelperProcess {
    async fn exchange(&mut self, request: &Message) -> Result<Message> {
        HelperProcess::exchange(self, request).await
    }
}

/// [`Exchanger`] over any bidirectional byte stream
pub struct StreamExchanger<S> {
    stream: S,
}

impl<S> StreamExchanger<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait::async_trait]
impl<S> Exchanger for StreamExchanger<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    async fn exchange(&mut self, request: &Message) -> Result<Message> {
        request.write_to(&mut self.stream).await?;
        let reply = Message::read_from(&mut self.stream).await?;
        if reply.id != request.id {
            return Err(Error::CorrelationMismatch {
                sent: request.id,
                received: reply.id,
            });
        }
        Ok(reply)
    }
}

impl std::fmt::Debug for HelperProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelperProcess")
            .field("program", &self.program)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_missing_program_fails() {
        let result = HelperProcess::spawn("/nonexistent/esci-helper", &[]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_spawn_bad_announcement() {
        // A helper that prints something that is not a port
        let result = HelperProcess::spawn("/bin/echo", &["not-a-port"]).await;
        assert!(matches!(result, Err(Error::BadPortAnnouncement(_))));
    }

    #[tokio::test]
    async fn test_spawn_silent_exit() {
        // `true` exits without printing anything
        let result = HelperProcess::spawn("/bin/true", &[]).await;
        assert!(matches!(result, Err(Error::HelperExited)));
    }

    #[tokio::test]
    async fn test_shutdown_reaps_child() {
        // Stand in for the helper's listener ourselves; the child only
        // announces our port and then idles until terminated.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let script = format!("echo {port}; exec sleep 30");
        let helper = HelperProcess::spawn("/bin/sh", &["-c", &script])
            .await
            .unwrap();
        let _peer = accept.await.unwrap();

        helper.shutdown().await.unwrap();
    }
}
