use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Handle for sending pre-serialized JSON text to one live connection. Each
/// connection owns a writer task that drains the receiving half into its
/// socket, so a slow or dead peer never blocks the registry.
pub type MessageSender = UnboundedSender<String>;

/// Identity of one registered connection. Unregistering compares ids, so a
/// stale cleanup after a voice-slot reconnect never evicts the replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Single-slot spoken channel; registering again replaces the prior
    /// connection.
    Voice,
    /// Unbounded fan-out list per session key.
    Broadcast,
}

struct Handle {
    id: ConnectionId,
    sender: MessageSender,
}

#[derive(Default)]
struct RegistryInner {
    voice: HashMap<String, Handle>,
    broadcast: HashMap<String, Vec<Handle>>,
    pending_text: HashMap<String, String>,
}

/// Tracks live connections per session key, decoupled from the orchestrator
/// so a voice channel and an image-analysis channel can cooperate on one
/// session. One lock guards the whole registry; every operation is a short
/// critical section with no await inside.
///
/// The pending-text relay lets the analysis path leave one in-flight message
/// for the voice channel's polling loop, which drains it exactly once.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        canvas_id: &str,
        kind: ChannelKind,
        sender: MessageSender,
    ) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = Handle { id, sender };
        let mut inner = self.inner.lock();
        match kind {
            ChannelKind::Voice => {
                if inner.voice.insert(canvas_id.to_string(), handle).is_some() {
                    debug!(canvas_id, "voice slot replaced by reconnect");
                }
            }
            ChannelKind::Broadcast => {
                inner
                    .broadcast
                    .entry(canvas_id.to_string())
                    .or_default()
                    .push(handle);
            }
        }
        id
    }

    /// Idempotent removal. An emptied broadcast list is pruned from the
    /// registry; the session store is untouched.
    pub fn unregister(&self, canvas_id: &str, kind: ChannelKind, id: ConnectionId) {
        let mut inner = self.inner.lock();
        match kind {
            ChannelKind::Voice => {
                if inner.voice.get(canvas_id).is_some_and(|h| h.id == id) {
                    inner.voice.remove(canvas_id);
                }
            }
            ChannelKind::Broadcast => {
                if let Some(handles) = inner.broadcast.get_mut(canvas_id) {
                    handles.retain(|h| h.id != id);
                    if handles.is_empty() {
                        inner.broadcast.remove(canvas_id);
                    }
                }
            }
        }
    }

    /// Directed send to the session's voice connection. Returns whether the
    /// message was handed off; a missing slot is a no-op.
    pub fn send_voice(&self, canvas_id: &str, message: &str) -> bool {
        let inner = self.inner.lock();
        match inner.voice.get(canvas_id) {
            Some(handle) => handle.sender.send(message.to_string()).is_ok(),
            None => false,
        }
    }

    /// Best-effort fan-out to every broadcast connection for the key. One
    /// dead connection never blocks delivery to the rest. Returns the number
    /// of connections reached.
    pub fn broadcast(&self, canvas_id: &str, message: &str) -> usize {
        let inner = self.inner.lock();
        let Some(handles) = inner.broadcast.get(canvas_id) else {
            return 0;
        };
        handles
            .iter()
            .filter(|h| h.sender.send(message.to_string()).is_ok())
            .count()
    }

    /// Deposits one in-flight relay text for the session, replacing any
    /// undrained predecessor.
    pub fn deposit_text(&self, canvas_id: &str, text: impl Into<String>) {
        self.inner
            .lock()
            .pending_text
            .insert(canvas_id.to_string(), text.into());
    }

    /// Drains the pending relay text exactly once; a second drain is `None`.
    pub fn take_text(&self, canvas_id: &str) -> Option<String> {
        self.inner.lock().pending_text.remove(canvas_id)
    }
}
