//! Outbound command delivery.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use fieldbot_nav::Command;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Outcome of one dispatch. Every variant means the command is done from
/// the control loop's point of view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Ok(String),
    Error(String),
    Timeout,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok(_))
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok(text) => write!(f, "ok: {text}"),
            Reply::Error(text) => write!(f, "error: {text}"),
            Reply::Timeout => f.write_str("timeout"),
        }
    }
}

/// Sends one command and waits a bounded time for its reply.
pub trait CommandTransport {
    fn send(&mut self, command: &Command) -> Reply;
}

impl<T: CommandTransport + ?Sized> CommandTransport for &mut T {
    fn send(&mut self, command: &Command) -> Reply {
        (**self).send(command)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    /// Connect and reply timeout, seconds.
    pub timeout_s: f64,
    /// Connection attempts before giving up.
    pub max_retries: u32,
    /// Pause between connection attempts, milliseconds.
    pub retry_backoff_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5532,
            timeout_s: 5.0,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_s.max(0.001))
    }
}

/// One TCP connection per command: the token and a newline go out, the
/// write side is closed and everything the robot sends back is the reply.
#[derive(Clone, Debug)]
pub struct TcpTransport {
    config: TransportConfig,
}

impl TcpTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn exchange(&self, token: &str) -> io::Result<Reply> {
        let timeout = self.config.timeout();
        let addr = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host did not resolve"))?;

        let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_read_timeout(Some(timeout))?;
        stream.write_all(format!("{token}\n").as_bytes())?;
        stream.shutdown(Shutdown::Write)?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut reply = String::new();
            let _ = tx.send(stream.read_to_string(&mut reply).map(|_| reply));
        });

        Ok(match rx.recv_timeout(timeout) {
            Ok(Ok(text)) => Reply::Ok(text.trim().to_string()),
            Ok(Err(err)) if is_timeout(&err) => Reply::Timeout,
            Ok(Err(err)) => Reply::Error(format!("receive failed: {err}")),
            Err(RecvTimeoutError::Timeout) => Reply::Timeout,
            Err(RecvTimeoutError::Disconnected) => {
                Reply::Error("receiver thread exited without a reply".to_string())
            }
        })
    }
}

impl CommandTransport for TcpTransport {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(command = %command))
    )]
    fn send(&mut self, command: &Command) -> Reply {
        let token = command.to_string();
        let attempts = self.config.max_retries.max(1);
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);

        for attempt in 1..=attempts {
            match self.exchange(&token) {
                Ok(reply) => return reply,
                Err(err) if is_retryable(&err) && attempt < attempts => {
                    log::warn!("{token}: attempt {attempt}/{attempts} failed: {err}");
                    thread::sleep(backoff);
                }
                Err(err) => {
                    return Reply::Error(format!("{err} after {attempt} attempt(s)"));
                }
            }
        }
        Reply::Error("no connection attempt made".to_string())
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

fn is_retryable(err: &io::Error) -> bool {
    is_timeout(err) || err.kind() == io::ErrorKind::ConnectionRefused
}
