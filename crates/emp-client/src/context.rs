//! Shared connection state and the context that owns it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use emp_frame::{Frame, FrameReader};
use emp_transport::EmpStream;
use tracing::{debug, error, info};

use crate::client::EmpClient;
use crate::config::EmpConfig;
use crate::connection::{Connection, LinkState};
use crate::error::{EmpError, Result};
use crate::reader::{self, InFlight};
use crate::registry::{CommandRegistry, CommandTable, ConsumerId, RecoveryCallback};
use crate::table::{Failure, RequestId, RequestTable, Resolution, SlotState};

/// Everything one live connection needs, shared by the reader, handler
/// threads and every consumer handle.
pub(crate) struct Shared {
    pub(crate) connection: Connection,
    pub(crate) table: RequestTable,
    pub(crate) registry: CommandRegistry,
    pub(crate) handlers: InFlight,
    consumers: AtomicUsize,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn reader_handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a command and block for its response.
    pub(crate) fn send_and_wait(
        &self,
        command: u16,
        payload: Bytes,
        timeout: Option<Duration>,
    ) -> Result<Bytes> {
        let id = self.table.allocate()?;
        self.transmit(id, command, payload)?;

        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let outcome = match self.table.wait(id, deadline) {
            Some(Resolution::Response { status, body }) if status.is_ok() => Ok(body),
            Some(Resolution::Response { status, .. }) => Err(EmpError::Status(status)),
            Some(Resolution::Failed(failure)) => Err(failure.into_error()),
            Some(Resolution::TimedOut) => Err(EmpError::Timeout(timeout.unwrap_or_default())),
            None => Err(EmpError::CommunicationError),
        };
        // No-op for a timed-out slot; the late response or reconnect frees it.
        self.table.free(id);
        outcome
    }

    /// Put the request for `id` on the wire, unless a connection loss has
    /// already failed the slot. The slot is freed when the send fails.
    fn transmit(&self, id: RequestId, command: u16, payload: Bytes) -> Result<()> {
        let len = payload.len();
        let frame = Frame::command(command, id, payload);
        let sent = self.connection.send_if(&frame, || {
            self.table.state(id) == Some(SlotState::Allocated)
        });
        match sent {
            Ok(()) => {
                debug!(command, rid = id, len, "request sent");
                Ok(())
            }
            Err(err) => {
                self.table.free(id);
                debug!(command, rid = id, error = %err, "request not sent");
                Err(err)
            }
        }
    }

    fn start_reader(self: &Arc<Self>, stream: FrameReader<EmpStream>) -> Result<()> {
        let handle = reader::spawn(Arc::clone(self), stream)?;
        *self.reader_handle() = Some(handle);
        Ok(())
    }

    /// Join a reader that has already given up on the link.
    fn reap_reader(&self) {
        let handle = self.reader_handle().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("reader thread panicked");
            }
        }
    }

    /// Tear the connection down: stop the reader, fail whatever is still
    /// pending and release every slot.
    fn close(&self) {
        self.connection.shutdown();
        self.table.fail_all(Failure::Closed);

        let handle = self.reader_handle().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                debug!("teardown on reader thread, not joining");
            } else if handle.join().is_err() {
                error!("reader thread panicked");
            }
        }
        self.table.reclaim_timed_out();
        info!("emp connection closed");
    }

    pub(crate) fn acquire(&self) {
        self.consumers.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns `true` when the last consumer left.
    fn release(&self) -> bool {
        self.consumers.fetch_sub(1, Ordering::SeqCst) == 1
    }
}

struct ContextInner {
    config: EmpConfig,
    live: Mutex<Option<Arc<Shared>>>,
}

/// Owner of at most one Agent connection, shared by every consumer that
/// calls [`EmpContext::init`] on it (or on a clone of it).
///
/// The connection opens on the first `init` and closes when the last
/// [`EmpClient`] is torn down.
#[derive(Clone)]
pub struct EmpContext {
    inner: Arc<ContextInner>,
}

impl EmpContext {
    pub fn new(config: EmpConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                config,
                live: Mutex::new(None),
            }),
        }
    }

    /// A context configured from the `SWI_EMP_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(EmpConfig::from_env())
    }

    /// The process-wide context, configured from the environment on first use.
    pub fn global() -> &'static EmpContext {
        static GLOBAL: OnceLock<EmpContext> = OnceLock::new();
        GLOBAL.get_or_init(EmpContext::from_env)
    }

    pub fn config(&self) -> &EmpConfig {
        &self.inner.config
    }

    fn live(&self) -> MutexGuard<'_, Option<Arc<Shared>>> {
        self.inner.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the shared connection, opening it if needed, and register
    /// `commands` and `recovery` for the returned consumer.
    ///
    /// A connection declared dead after failed reconnects is reopened here.
    pub fn init(
        &self,
        commands: CommandTable,
        recovery: Option<RecoveryCallback>,
    ) -> Result<EmpClient> {
        let mut live = self.live();

        let (shared, fresh) = match live.as_ref() {
            Some(shared) => (Arc::clone(shared), None),
            None => {
                let (connection, stream) = Connection::open(self.inner.config.clone())?;
                let shared = Arc::new(Shared {
                    connection,
                    table: RequestTable::new(),
                    registry: CommandRegistry::new(),
                    handlers: InFlight::default(),
                    consumers: AtomicUsize::new(0),
                    reader: Mutex::new(None),
                });
                (shared, Some(stream))
            }
        };

        let consumer = ConsumerId::next();
        for (command, handler) in commands.into_entries() {
            shared.registry.register(command, handler, consumer);
        }
        if let Some(callback) = recovery {
            shared.registry.add_recovery_callback(callback, consumer);
        }

        let started = match fresh {
            Some(stream) => shared.start_reader(stream),
            None if shared.connection.state() == LinkState::Dead => {
                info!("reviving agent connection");
                shared.reap_reader();
                shared.table.reclaim_timed_out();
                shared
                    .connection
                    .revive()
                    .and_then(|stream| shared.start_reader(stream))
            }
            None => Ok(()),
        };
        if let Err(err) = started {
            shared.registry.remove_owner(consumer);
            if shared.consumers.load(Ordering::SeqCst) == 0 {
                shared.connection.shutdown();
            }
            return Err(err);
        }

        shared.acquire();
        if live.is_none() {
            *live = Some(Arc::clone(&shared));
        }
        drop(live);

        debug!(?consumer, "emp consumer initialized");
        Ok(EmpClient::new(self.clone(), shared, consumer))
    }

    /// Send through the context's live connection with the configured
    /// default timeout.
    pub fn send_and_wait(&self, command: u16, payload: impl Into<Bytes>) -> Result<Bytes> {
        self.send_and_wait_timeout(command, payload, self.inner.config.request_timeout)
    }

    /// Like [`EmpContext::send_and_wait`]; `None` waits indefinitely.
    pub fn send_and_wait_timeout(
        &self,
        command: u16,
        payload: impl Into<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<Bytes> {
        let shared = self.live().clone().ok_or(EmpError::NotInitialized)?;
        shared.send_and_wait(command, payload.into(), timeout)
    }

    /// True while at least one consumer holds the connection.
    pub fn is_initialized(&self) -> bool {
        self.live().is_some()
    }

    /// State of the live connection, if any.
    pub fn link_state(&self) -> Option<LinkState> {
        self.live().as_ref().map(|shared| shared.connection.state())
    }

    /// Drop one consumer; the last one closes the connection.
    pub(crate) fn release(&self, shared: &Arc<Shared>, consumer: ConsumerId) {
        shared.registry.remove_owner(consumer);

        let mut live = self.live();
        if !shared.release() {
            debug!(?consumer, "emp consumer released");
            return;
        }
        if live.as_ref().is_some_and(|current| Arc::ptr_eq(current, shared)) {
            *live = None;
        }
        drop(live);

        debug!(?consumer, "last emp consumer released");
        shared.close();
    }
}

impl std::fmt::Debug for EmpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmpContext")
            .field("addr", &self.inner.config.address())
            .field("link", &self.link_state())
            .finish()
    }
}
