//! Connection Manager: the single socket to the Agent.
//!
//! The write half sits behind a mutex so frames from concurrent senders
//! never interleave. The read half is handed out as a [`FrameReader`] and
//! owned by the Reader Task alone.

use std::io::ErrorKind;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use emp_frame::{Frame, FrameConfig, FrameError, FrameReader, FrameWriter};
use emp_transport::EmpStream;
use tracing::{debug, error, info, warn};

use crate::config::EmpConfig;
use crate::error::{EmpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted; only a new `init` revives the link.
    Dead,
    ShutDown,
}

#[derive(Debug)]
struct Link {
    state: LinkState,
    /// Handle kept only to shut the socket down from any thread.
    control: Option<EmpStream>,
    budget: u32,
    connected_since: Instant,
}

pub struct Connection {
    config: EmpConfig,
    writer: Mutex<Option<FrameWriter<EmpStream>>>,
    link: Mutex<Link>,
    wake: Condvar,
}

struct Halves {
    writer: FrameWriter<EmpStream>,
    control: EmpStream,
    reader: FrameReader<EmpStream>,
}

impl Connection {
    /// Connect to the Agent and split the socket.
    pub fn open(config: EmpConfig) -> Result<(Self, FrameReader<EmpStream>)> {
        let halves = connect_halves(&config)?;
        info!(addr = %config.address(), "connected to agent");

        let connection = Self {
            writer: Mutex::new(Some(halves.writer)),
            link: Mutex::new(Link {
                state: LinkState::Connected,
                control: Some(halves.control),
                budget: config.reconnect.attempts,
                connected_since: Instant::now(),
            }),
            wake: Condvar::new(),
            config,
        };
        Ok((connection, halves.reader))
    }

    pub fn config(&self) -> &EmpConfig {
        &self.config
    }

    pub fn state(&self) -> LinkState {
        self.link().state
    }

    pub fn is_shut_down(&self) -> bool {
        self.state() == LinkState::ShutDown
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn writer(&self) -> MutexGuard<'_, Option<FrameWriter<EmpStream>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write one whole frame.
    pub fn send(&self, frame: &Frame) -> Result<()> {
        self.send_if(frame, || true)
    }

    /// Write `frame` only if `still_wanted` holds once the writer lock is
    /// taken; otherwise fail with [`EmpError::Closed`] without writing.
    ///
    /// A broken link is detached before its waiters are failed, so a check
    /// made here cannot race with that broadcast.
    pub fn send_if(&self, frame: &Frame, still_wanted: impl FnOnce() -> bool) -> Result<()> {
        let sent = {
            let mut writer = self.writer();
            if writer.is_some() && !still_wanted() {
                return Err(EmpError::Closed);
            }
            match writer.as_mut().map(|active| active.write_frame(frame)) {
                Some(Err(err)) if leaves_partial_frame(&err) => {
                    // The peer may hold half a frame; nothing else may follow it.
                    if let Some(broken) = writer.take() {
                        warn!(error = %err, "write failed mid-frame, dropping agent socket");
                        if let Err(shutdown) = broken.into_inner().shutdown() {
                            debug!(error = %shutdown, "socket shutdown failed");
                        }
                    }
                    Some(Err(err))
                }
                other => other,
            }
        };
        match sent {
            Some(result) => result.map_err(classify_send_error),
            None => Err(self.unavailable()),
        }
    }

    fn unavailable(&self) -> EmpError {
        match self.state() {
            LinkState::Dead => EmpError::CommunicationError,
            LinkState::Connected | LinkState::Reconnecting | LinkState::ShutDown => {
                EmpError::Closed
            }
        }
    }

    /// Drop the broken socket and dial again until the retry budget runs out.
    ///
    /// Returns the reader half of the new socket. Fails with
    /// [`EmpError::CommunicationError`] once the link is declared dead, or
    /// [`EmpError::Closed`] when teardown interrupts the sequence.
    pub fn reconnect(&self) -> Result<FrameReader<EmpStream>> {
        if !self.detach() {
            return Err(EmpError::Closed);
        }
        let attempts = {
            let mut link = self.link();
            self.refill_budget(&mut link);
            link.budget
        };

        let policy = &self.config.reconnect;
        for attempt in 1..=attempts {
            warn!(attempt, max = attempts, addr = %self.config.address(), "connection lost, reconnecting to agent");

            match connect_halves(&self.config) {
                Ok(halves) => return self.install(halves),
                Err(err) => debug!(attempt, error = %err, "reconnect attempt failed"),
            }

            {
                let mut link = self.link();
                link.budget = link.budget.saturating_sub(1);
            }
            if self.sleep_unless_shut_down(policy.delay) {
                return Err(EmpError::Closed);
            }
        }

        let mut link = self.link();
        if link.state == LinkState::ShutDown {
            return Err(EmpError::Closed);
        }
        link.state = LinkState::Dead;
        error!(attempts, addr = %self.config.address(), "reconnecting to agent failed, giving up");
        Err(EmpError::CommunicationError)
    }

    /// Drop the current socket so no further frame goes out on it. Returns
    /// `false` if the link is already shut down.
    pub fn detach(&self) -> bool {
        {
            let mut link = self.link();
            if link.state == LinkState::ShutDown {
                return false;
            }
            if link.state == LinkState::Connected {
                link.state = LinkState::Reconnecting;
            }
            if let Some(stale) = link.control.take() {
                let _ = stale.shutdown();
            }
        }
        self.writer().take();
        true
    }

    fn refill_budget(&self, link: &mut Link) {
        let policy = &self.config.reconnect;
        match policy.budget_reset_after {
            None => link.budget = policy.attempts,
            Some(stable) if link.connected_since.elapsed() >= stable => {
                link.budget = policy.attempts;
            }
            Some(_) => debug!(remaining = link.budget, "reusing reconnect budget"),
        }
    }

    fn install(&self, halves: Halves) -> Result<FrameReader<EmpStream>> {
        let mut link = self.link();
        if link.state == LinkState::ShutDown {
            let _ = halves.control.shutdown();
            return Err(EmpError::Closed);
        }
        *self.writer() = Some(halves.writer);
        link.control = Some(halves.control);
        link.state = LinkState::Connected;
        link.connected_since = Instant::now();
        info!(addr = %self.config.address(), "reconnected to agent");
        Ok(halves.reader)
    }

    /// Returns `true` if teardown cut the pause short.
    fn sleep_unless_shut_down(&self, delay: Duration) -> bool {
        let link = self.link();
        let (link, _) = self
            .wake
            .wait_timeout_while(link, delay, |link| link.state != LinkState::ShutDown)
            .unwrap_or_else(PoisonError::into_inner);
        link.state == LinkState::ShutDown
    }

    /// Reopen a dead link with a full retry budget.
    pub fn revive(&self) -> Result<FrameReader<EmpStream>> {
        {
            let link = self.link();
            if link.state != LinkState::Dead {
                return Err(EmpError::Closed);
            }
        }
        let halves = connect_halves(&self.config)?;
        let reader = self.install(halves)?;
        self.link().budget = self.config.reconnect.attempts;
        Ok(reader)
    }

    /// Stop the link for good: wake a pending reconnect and unblock the
    /// reader by shutting the socket down in both directions.
    pub fn shutdown(&self) {
        let control = {
            let mut link = self.link();
            link.state = LinkState::ShutDown;
            link.control.take()
        };
        self.wake.notify_all();
        if let Some(control) = control {
            if let Err(err) = control.shutdown() {
                debug!(error = %err, "socket shutdown failed");
            }
        }
        self.writer().take();
        debug!("connection shut down");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.config.address())
            .field("state", &self.state())
            .finish()
    }
}

fn connect_halves(config: &EmpConfig) -> Result<Halves> {
    let stream = emp_transport::connect(&config.host, config.port)?;
    let control = stream.try_clone()?;
    let reader_stream = stream.try_clone()?;

    // The reader blocks until a frame or a socket failure; a read timeout
    // would look like a broken link.
    let reader_config = FrameConfig {
        read_timeout: None,
        ..config.frame.clone()
    };
    let reader = FrameReader::with_config_stream(reader_stream, reader_config)?;
    let writer = FrameWriter::with_config_stream(stream, config.frame.clone())?;

    Ok(Halves {
        writer,
        control,
        reader,
    })
}

fn is_closed_kind(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

/// Whether a failed write may have put part of the frame on the wire.
fn leaves_partial_frame(err: &FrameError) -> bool {
    match err {
        FrameError::PayloadTooLarge { .. } => false,
        FrameError::Io(_) | FrameError::ConnectionClosed => true,
    }
}

fn classify_send_error(err: FrameError) -> EmpError {
    match err {
        FrameError::ConnectionClosed => EmpError::Closed,
        FrameError::Io(io) if is_closed_kind(io.kind()) => EmpError::Closed,
        FrameError::Io(io) => EmpError::Io(io),
        other => EmpError::Frame(other),
    }
}

/// How the Reader Task reacts to a read failure.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReadFailure {
    /// Orderly EOF or reset by the peer.
    Closed,
    /// Anything else, including a frame too large to resynchronise on.
    Io(ErrorKind, String),
}

pub(crate) fn classify_read_error(err: &FrameError) -> ReadFailure {
    match err {
        FrameError::ConnectionClosed => ReadFailure::Closed,
        FrameError::Io(io) if is_closed_kind(io.kind()) => ReadFailure::Closed,
        FrameError::Io(io) => ReadFailure::Io(io.kind(), io.to_string()),
        other => ReadFailure::Io(ErrorKind::InvalidData, other.to_string()),
    }
}
