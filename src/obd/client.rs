//! # OBD Client
//!
//! Request/response exchange with an ELM327-compatible adapter.
//!
//! Each request writes a command terminated by `\r` and collects the reply into
//! a fixed [`REPLY_BUFFER_SIZE`] buffer until the `>` prompt arrives, the link
//! reports EOF, the buffer fills up or the request timeout expires.
//!
//! An answer that arrives after its request timed out is not allowed to stand
//! in for the next one. Bytes already waiting are discarded before a PID
//! request is written, and a reply that carries another PID's header is
//! skipped while the request's own deadline has not passed.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::protocol::{self, Pid, RawReply, PROMPT, REPLY_BUFFER_SIZE};
use crate::error::{LoggerError, Result};

/// Timeout applied to adapter initialisation commands (ATZ resets the chip)
pub const INIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Adapter initialisation: reset, echo off, automatic protocol selection
const INIT_COMMANDS: &[&str] = &["ATZ", "ATE0", "ATSP0"];

/// Most stale bytes discarded ahead of one request
const MAX_DISCARD: usize = 4 * REPLY_BUFFER_SIZE;

/// Engine values gathered in one tick; every field is independently optional
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineReadings {
    pub rpm: Option<u32>,
    pub speed_kph: Option<u32>,
    pub maf: Option<f32>,
    pub throttle: Option<u8>,
}

impl EngineReadings {
    /// A journey is active while the engine turns
    pub fn journey_active(&self) -> bool {
        self.rpm.map_or(false, |rpm| rpm > 0)
    }
}

/// Source of engine data for the acquisition loop
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EngineSource: Send {
    /// Query every engine metric once
    async fn read_engine(&mut self) -> EngineReadings;
}

/// Byte stream the adapter is reachable through
pub trait ObdTransport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ObdTransport for T {}

/// OBD-II client over any byte transport
pub struct ObdClient<T> {
    port: T,
    timeout: Duration,
    link_lost: bool,
}

impl<T> std::fmt::Debug for ObdClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObdClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<T: ObdTransport> ObdClient<T> {
    /// Wrap a transport; `timeout` bounds every request
    pub fn new(port: T, timeout: Duration) -> Self {
        Self { port, timeout, link_lost: false }
    }

    /// True once a read or write on the transport has failed
    pub fn link_lost(&self) -> bool {
        self.link_lost
    }

    /// Run the adapter initialisation sequence
    ///
    /// # Errors
    ///
    /// Returns an error if a command cannot be written or is not acknowledged
    /// with a prompt within [`INIT_TIMEOUT`].
    pub async fn initialize(&mut self) -> Result<()> {
        for command in INIT_COMMANDS {
            let reply = self.exchange(command, INIT_TIMEOUT, None).await?;
            if !reply.as_bytes().contains(&PROMPT) {
                return Err(LoggerError::ObdTimeout(format!("{} not acknowledged", command)));
            }
            debug!("{} -> {:?}", command, reply);
        }
        info!("OBD adapter initialised");
        Ok(())
    }

    /// Send a PID request and wait for its reply
    ///
    /// Returns `None` if nothing arrived within the timeout or the link failed.
    pub async fn request(&mut self, pid: Pid) -> Option<RawReply> {
        self.discard_pending().await;
        match self.exchange(pid.code(), self.timeout, Some(pid)).await {
            Ok(reply) if !reply.is_empty() => Some(reply),
            Ok(_) => {
                debug!("No reply to {}", pid.code());
                None
            }
            Err(e @ LoggerError::Serial(_)) => {
                warn!("{}", e);
                self.link_lost = true;
                None
            }
            Err(e) => {
                debug!("Request {} failed: {}", pid.code(), e);
                None
            }
        }
    }

    pub async fn read_rpm(&mut self) -> Option<u32> {
        let reply = self.request(Pid::EngineRpm).await?;
        protocol::parse_rpm(&reply).or_else(|| parse_failed(Pid::EngineRpm, &reply))
    }

    pub async fn read_speed(&mut self) -> Option<u32> {
        let reply = self.request(Pid::VehicleSpeed).await?;
        protocol::parse_speed(&reply).or_else(|| parse_failed(Pid::VehicleSpeed, &reply))
    }

    pub async fn read_maf(&mut self) -> Option<f32> {
        let reply = self.request(Pid::MassAirFlow).await?;
        protocol::parse_maf(&reply).or_else(|| parse_failed(Pid::MassAirFlow, &reply))
    }

    pub async fn read_throttle(&mut self) -> Option<u8> {
        let reply = self.request(Pid::Throttle).await?;
        protocol::parse_throttle(&reply).or_else(|| parse_failed(Pid::Throttle, &reply))
    }

    /// Drop whatever the adapter sent since the last exchange
    ///
    /// Reads stop as soon as the link has nothing ready.
    async fn discard_pending(&mut self) {
        let mut scratch = [0u8; REPLY_BUFFER_SIZE];
        let mut discarded = 0;

        while discarded < MAX_DISCARD {
            match timeout(Duration::ZERO, self.port.read(&mut scratch)).await {
                Ok(Ok(n)) if n > 0 => discarded += n,
                _ => break,
            }
        }

        if discarded > 0 {
            debug!("Discarded {} stale bytes from the adapter", discarded);
        }
    }

    /// Write one command and collect its reply within `limit`
    ///
    /// A timeout with partial data returns what was received; a timeout with
    /// nothing received is an error. With `expected` set, complete replies
    /// that answer a different PID are skipped until the deadline.
    async fn exchange(&mut self, command: &str, limit: Duration, expected: Option<Pid>) -> Result<RawReply> {
        let deadline = Instant::now() + limit;

        let mut frame = String::with_capacity(command.len() + 1);
        frame.push_str(command);
        frame.push('\r');

        timeout(limit, async {
            self.port.write_all(frame.as_bytes()).await?;
            self.port.flush().await
        })
        .await
        .map_err(|_| LoggerError::ObdTimeout(command.to_string()))?
        .map_err(|e| LoggerError::Serial(format!("Failed to write {}: {}", command, e)))?;

        loop {
            let reply = self.read_reply(command, deadline).await?;
            match expected {
                Some(pid)
                    if reply.as_bytes().contains(&PROMPT)
                        && protocol::answers_other(&reply, pid)
                        && Instant::now() < deadline =>
                {
                    debug!("Skipping late reply {:?} while waiting for {}", reply, command);
                }
                _ => return Ok(reply),
            }
        }
    }

    /// Collect one prompt-terminated reply, giving up at `deadline`
    async fn read_reply(&mut self, command: &str, deadline: Instant) -> Result<RawReply> {
        let mut buf = [0u8; REPLY_BUFFER_SIZE];
        let mut len = 0;

        while len < REPLY_BUFFER_SIZE {
            let read = tokio::time::timeout_at(deadline, self.port.read(&mut buf[len..])).await;
            match read {
                Err(_) => {
                    if len == 0 {
                        return Err(LoggerError::ObdTimeout(command.to_string()));
                    }
                    break;
                }
                Ok(Err(e)) => {
                    return Err(LoggerError::Serial(format!("Failed to read reply to {}: {}", command, e)));
                }
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    let received = &buf[len..len + n];
                    len += n;
                    if received.contains(&PROMPT) {
                        break;
                    }
                }
            }
        }

        Ok(RawReply::from_buffer(buf, len))
    }
}

fn parse_failed<V>(pid: Pid, reply: &RawReply) -> Option<V> {
    warn!("Unparseable reply to {}: {:?}", pid.code(), reply);
    None
}

#[async_trait]
impl<T: ObdTransport> EngineSource for ObdClient<T> {
    async fn read_engine(&mut self) -> EngineReadings {
        EngineReadings {
            rpm: self.read_rpm().await,
            speed_kph: self.read_speed().await,
            maf: self.read_maf().await,
            throttle: self.read_throttle().await,
        }
    }
}
