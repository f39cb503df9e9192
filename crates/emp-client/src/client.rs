use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::connection::LinkState;
use crate::context::{EmpContext, Shared};
use crate::error::Result;
use crate::registry::{ConsumerId, InboundCommand, RecoveryCallback, RecoveryId};
use crate::status::Status;

/// One consumer's handle on the shared Agent connection.
///
/// Obtained from [`EmpContext::init`]. Dropping it (or calling
/// [`EmpClient::teardown`]) unregisters this consumer's handlers and
/// recovery callback; the last handle to go closes the connection.
pub struct EmpClient {
    context: EmpContext,
    shared: Arc<Shared>,
    consumer: ConsumerId,
    released: bool,
}

impl EmpClient {
    pub(crate) fn new(context: EmpContext, shared: Arc<Shared>, consumer: ConsumerId) -> Self {
        Self {
            context,
            shared,
            consumer,
            released: false,
        }
    }

    /// Send `command` and block until the Agent answers or the configured
    /// request timeout passes.
    ///
    /// Status `0` yields the response body; any other Agent status is
    /// returned as [`EmpError::Status`](crate::EmpError::Status).
    pub fn send_and_wait(&self, command: u16, payload: impl Into<Bytes>) -> Result<Bytes> {
        let timeout = self.shared.connection.config().request_timeout;
        self.shared.send_and_wait(command, payload.into(), timeout)
    }

    /// Like [`EmpClient::send_and_wait`] with an explicit timeout; `None`
    /// waits indefinitely.
    pub fn send_and_wait_timeout(
        &self,
        command: u16,
        payload: impl Into<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<Bytes> {
        self.shared.send_and_wait(command, payload.into(), timeout)
    }

    /// Register (or take over) the handler for `command`.
    pub fn register<F>(&self, command: u16, handler: F)
    where
        F: Fn(InboundCommand) -> Status + Send + Sync + 'static,
    {
        self.shared
            .registry
            .register(command, Arc::new(handler), self.consumer);
    }

    /// Remove the handler for `command` if this consumer still owns it.
    pub fn unregister(&self, command: u16) -> bool {
        self.shared.registry.unregister(command, self.consumer)
    }

    /// Add another callback to run after each successful reconnect.
    pub fn add_recovery_callback(&self, callback: RecoveryCallback) -> RecoveryId {
        self.shared
            .registry
            .add_recovery_callback(callback, self.consumer)
    }

    pub fn remove_recovery_callback(&self, id: RecoveryId) -> bool {
        self.shared.registry.remove_recovery_callback(id)
    }

    /// Block until every inbound command handler has sent its answer, or
    /// `timeout` passes (`None` waits indefinitely). Returns `false` on
    /// timeout.
    pub fn wait_for_handlers(&self, timeout: Option<Duration>) -> bool {
        self.shared.handlers.wait_idle(timeout)
    }

    pub fn context(&self) -> &EmpContext {
        &self.context
    }

    pub fn link_state(&self) -> LinkState {
        self.shared.connection.state()
    }

    /// Request ids currently reserved.
    pub fn in_flight(&self) -> usize {
        self.shared.table.in_use()
    }

    /// Release this consumer. The connection stays up while other
    /// consumers remain.
    pub fn teardown(mut self) -> Result<()> {
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        self.context.release(&self.shared, self.consumer);
    }
}

impl Drop for EmpClient {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for EmpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmpClient")
            .field("consumer", &self.consumer)
            .field("link", &self.link_state())
            .finish()
    }
}
