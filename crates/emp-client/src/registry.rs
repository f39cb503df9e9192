//! Command Registry: inbound command handlers and recovery callbacks.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use bytes::Bytes;
use tracing::debug;

use crate::status::Status;
use crate::table::RequestId;

/// An unsolicited command received from the Agent.
///
/// The handler owns it; dropping it releases the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCommand {
    pub command: u16,
    pub request_id: RequestId,
    pub payload: Bytes,
}

impl InboundCommand {
    /// Take the payload, keeping it alive past the handler.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Handles one inbound command code and answers with a status.
pub type CommandHandler = Arc<dyn Fn(InboundCommand) -> Status + Send + Sync>;

/// Run after every successful reconnect.
pub type RecoveryCallback = Arc<dyn Fn() + Send + Sync>;

/// Identifies the consumer that registered a handler or callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

impl ConsumerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConsumerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle returned by [`CommandRegistry::add_recovery_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecoveryId(u64);

/// Handlers a consumer brings to `init`.
///
/// ```
/// use emp_client::{CommandTable, Status};
///
/// let table = CommandTable::new()
///     .on(0x50, |cmd| {
///         println!("update request, {} bytes", cmd.payload.len());
///         Status::OK
///     })
///     .on(0x51, |_| Status::NOT_IMPLEMENTED);
/// assert_eq!(table.len(), 2);
/// ```
#[derive(Default, Clone)]
pub struct CommandTable {
    entries: Vec<(u16, CommandHandler)>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `command`. A later entry for the same code wins.
    pub fn on<F>(mut self, command: u16, handler: F) -> Self
    where
        F: Fn(InboundCommand) -> Status + Send + Sync + 'static,
    {
        self.entries.push((command, Arc::new(handler)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn commands(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.iter().map(|(command, _)| *command)
    }

    pub(crate) fn into_entries(self) -> Vec<(u16, CommandHandler)> {
        self.entries
    }
}

impl fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTable")
            .field("commands", &self.commands().collect::<Vec<_>>())
            .finish()
    }
}

struct Registered {
    owner: ConsumerId,
    handler: CommandHandler,
}

/// Shared handler map and ordered recovery callback list.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: RwLock<HashMap<u16, Registered>>,
    callbacks: Mutex<Vec<(RecoveryId, ConsumerId, RecoveryCallback)>>,
    next_recovery: AtomicU64,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for `command`, replacing any previous one.
    pub fn register(&self, command: u16, handler: CommandHandler, owner: ConsumerId) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = handlers.insert(command, Registered { owner, handler }) {
            if previous.owner != owner {
                debug!(command, "command handler replaced by another consumer");
            }
        }
    }

    /// Remove the handler for `command` if `owner` still owns it.
    /// Returns whether an entry was removed.
    pub fn unregister(&self, command: u16, owner: ConsumerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        match handlers.get(&command) {
            Some(entry) if entry.owner == owner => {
                handlers.remove(&command);
                true
            }
            _ => false,
        }
    }

    /// Remove every handler and callback still owned by `owner`.
    pub fn remove_owner(&self, owner: ConsumerId) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, entry| entry.owner != owner);
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(_, cb_owner, _)| *cb_owner != owner);
    }

    pub fn lookup(&self, command: u16) -> Option<CommandHandler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&command)
            .map(|entry| Arc::clone(&entry.handler))
    }

    pub fn is_registered(&self, command: u16) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&command)
    }

    pub fn add_recovery_callback(&self, callback: RecoveryCallback, owner: ConsumerId) -> RecoveryId {
        let id = RecoveryId(self.next_recovery.fetch_add(1, Ordering::Relaxed));
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, owner, callback));
        id
    }

    pub fn remove_recovery_callback(&self, id: RecoveryId) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = callbacks.len();
        callbacks.retain(|(cb_id, _, _)| *cb_id != id);
        callbacks.len() != before
    }

    /// Snapshot of the callbacks in registration order.
    pub fn recovery_callbacks(&self) -> Vec<RecoveryCallback> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, _, callback)| Arc::clone(callback))
            .collect()
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut commands: Vec<u16> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        commands.sort_unstable();
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("CommandRegistry")
            .field("commands", &commands)
            .field("recovery_callbacks", &callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn answer(status: Status) -> CommandHandler {
        Arc::new(move |_| status)
    }

    fn call(registry: &CommandRegistry, command: u16) -> Option<Status> {
        registry.lookup(command).map(|handler| {
            handler(InboundCommand {
                command,
                request_id: 0,
                payload: Bytes::new(),
            })
        })
    }

    #[test]
    fn last_registration_wins() {
        let registry = CommandRegistry::new();
        let (a, b) = (ConsumerId::next(), ConsumerId::next());

        registry.register(7, answer(Status::OK), a);
        registry.register(7, answer(Status::NOT_PERMITTED), b);

        assert_eq!(call(&registry, 7), Some(Status::NOT_PERMITTED));
    }

    #[test]
    fn unregister_only_removes_owned_entry() {
        let registry = CommandRegistry::new();
        let (a, b) = (ConsumerId::next(), ConsumerId::next());

        registry.register(7, answer(Status::OK), a);
        registry.register(7, answer(Status::BUSY), b);

        assert!(!registry.unregister(7, a));
        assert_eq!(call(&registry, 7), Some(Status::BUSY));
        assert!(registry.unregister(7, b));
        assert!(!registry.is_registered(7));
    }

    #[test]
    fn remove_owner_keeps_other_consumers() {
        let registry = CommandRegistry::new();
        let (a, b) = (ConsumerId::next(), ConsumerId::next());

        registry.register(1, answer(Status::OK), a);
        registry.register(2, answer(Status::OK), b);
        registry.add_recovery_callback(Arc::new(|| {}), a);
        registry.add_recovery_callback(Arc::new(|| {}), b);

        registry.remove_owner(a);

        assert!(!registry.is_registered(1));
        assert!(registry.is_registered(2));
        assert_eq!(registry.recovery_callbacks().len(), 1);
    }

    #[test]
    fn recovery_callbacks_keep_registration_order() {
        let registry = CommandRegistry::new();
        let owner = ConsumerId::next();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut ids = Vec::new();
        for n in 0..3 {
            let order = Arc::clone(&order);
            ids.push(registry.add_recovery_callback(
                Arc::new(move || order.lock().unwrap().push(n)),
                owner,
            ));
        }
        assert!(registry.remove_recovery_callback(ids[1]));
        assert!(!registry.remove_recovery_callback(ids[1]));

        for callback in registry.recovery_callbacks() {
            callback();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 2]);
    }

    #[test]
    fn command_table_builder() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let table = CommandTable::new()
            .on(3, move |cmd| {
                counter.fetch_add(cmd.into_payload().len(), Ordering::SeqCst);
                Status::OK
            })
            .on(4, |_| Status::NOT_FOUND);

        assert_eq!(table.commands().collect::<Vec<_>>(), vec![3, 4]);

        let registry = CommandRegistry::new();
        let owner = ConsumerId::next();
        for (command, handler) in table.into_entries() {
            registry.register(command, handler, owner);
        }
        let status = registry.lookup(3).map(|handler| {
            handler(InboundCommand {
                command: 3,
                request_id: 9,
                payload: Bytes::from_static(b"abcd"),
            })
        });
        assert_eq!(status, Some(Status::OK));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert_eq!(call(&registry, 4), Some(Status::NOT_FOUND));
    }
}
