//! Event frames and the correlation engine.
//!
//! The event stream multiplexes heterogeneous JSON frames over one
//! WebSocket. Each frame is discriminated by its `type` field and may
//! reference entities under conventional field names (`channel`, `bridge`,
//! `playback`, ...) whose value is that entity's current snapshot. The
//! [`Dispatcher`] decodes every frame, resolves each referenced entity to
//! its [`Proxy`] through the [`Registry`], applies the snapshots, and then
//! delivers the frame to subscribers.
//!
//! # Delivery order
//!
//! This order is a contract, not an accident:
//!
//! 1. global listeners registered for the frame's type,
//! 2. global wildcard listeners,
//! 3. for each resolved proxy, in the order its field appears in the frame,
//!    that proxy's listeners matching the type or wildcard.
//!
//! Within each tier, listeners run in registration order. Listener lists
//! are snapshotted before iteration, so a callback may register or
//! unregister listeners anywhere without corrupting the in-progress
//! delivery. A malformed or unrecognized frame reaches only wildcard
//! listeners and never aborts the engine.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

use crate::error::{AriError, AriResult};
use crate::registry::{Proxy, Registry, ResourceKind};

/// Event type matching every frame
pub const WILDCARD: &str = "*";

/// Callback invoked with the frame and the proxies it resolved, in frame
/// field order.
pub type EventCallback = Arc<dyn Fn(&EventFrame, &[Proxy]) + Send + Sync>;

/// Event types the server emits, plus the notifications this client
/// synthesizes locally (`WebSocketReconnecting`, `WebSocketMaxRetries`,
/// `Pong`). Frames with any other type are delivered to wildcard listeners
/// only.
const KNOWN_EVENT_TYPES: &[&str] = &[
    "ApplicationMoveFailed",
    "ApplicationReplaced",
    "BridgeAttendedTransfer",
    "BridgeBlindTransfer",
    "BridgeCreated",
    "BridgeDestroyed",
    "BridgeMerged",
    "BridgeVideoSourceChanged",
    "ChannelCallerId",
    "ChannelConnectedLine",
    "ChannelCreated",
    "ChannelDestroyed",
    "ChannelDialplan",
    "ChannelDtmfReceived",
    "ChannelEnteredBridge",
    "ChannelHangupRequest",
    "ChannelHold",
    "ChannelLeftBridge",
    "ChannelStateChange",
    "ChannelTalkingFinished",
    "ChannelTalkingStarted",
    "ChannelToneDetected",
    "ChannelUnhold",
    "ChannelUserevent",
    "ChannelVarset",
    "ContactStatusChange",
    "DeviceStateChanged",
    "Dial",
    "EndpointStateChange",
    "MissingParams",
    "PeerStatusChange",
    "PlaybackContinuing",
    "PlaybackFinished",
    "PlaybackStarted",
    "Pong",
    "RecordingFailed",
    "RecordingFinished",
    "RecordingStarted",
    "StasisEnd",
    "StasisStart",
    "TextMessageReceived",
    "WebSocketMaxRetries",
    "WebSocketReconnecting",
];

/// `true` if `event_type` is a known server event or local notification.
pub fn is_known_event_type(event_type: &str) -> bool {
    KNOWN_EVENT_TYPES.binary_search(&event_type).is_ok()
}

/// One decoded event frame
#[derive(Debug, Clone)]
pub struct EventFrame {
    /// Frame discriminator (`ChannelCreated`, `StasisStart`, ...)
    pub event_type: String,
    /// Stasis application the frame is scoped to, when the server sends one
    pub application: Option<String>,
    /// All remaining frame fields, in wire order
    pub fields: Map<String, Value>,
}

impl EventFrame {
    /// Decode one frame from WebSocket text.
    ///
    /// Fails if the text is not a JSON object or lacks a string `type`.
    pub fn decode(text: &str) -> AriResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| AriError::frame_decode(format!("invalid JSON: {}", e)))?;
        let Value::Object(mut fields) = value else {
            return Err(AriError::frame_decode("frame is not a JSON object"));
        };
        let event_type = match fields.shift_remove("type") {
            Some(Value::String(s)) => s,
            Some(_) => return Err(AriError::frame_decode("frame 'type' is not a string")),
            None => return Err(AriError::frame_decode("frame has no 'type' field")),
        };
        let application = fields
            .get("application")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self {
            event_type,
            application,
            fields,
        })
    }

    /// Build a locally synthesized notification frame.
    pub(crate) fn synthetic(event_type: &str, fields: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.to_string(),
            application: None,
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

struct GlobalListener {
    id: u64,
    once: bool,
    callback: EventCallback,
}

#[derive(Default)]
struct DispatchTable {
    /// Event type (or [`WILDCARD`]) → listeners in registration order
    by_type: HashMap<String, Vec<GlobalListener>>,
    next_id: u64,
}

/// Global subscription table plus the frame-routing engine. Clones share
/// the same table.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<Mutex<DispatchTable>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a global listener for `event_type`, or every frame when
    /// `event_type` is [`WILDCARD`].
    pub fn on(
        &self,
        event_type: impl Into<String>,
        callback: impl Fn(&EventFrame, &[Proxy]) + Send + Sync + 'static,
    ) -> Subscription {
        self.add(event_type.into(), false, Arc::new(callback))
    }

    /// Register a global listener that auto-unregisters after its first
    /// invocation.
    pub fn once(
        &self,
        event_type: impl Into<String>,
        callback: impl Fn(&EventFrame, &[Proxy]) + Send + Sync + 'static,
    ) -> Subscription {
        self.add(event_type.into(), true, Arc::new(callback))
    }

    fn add(&self, event_type: String, once: bool, callback: EventCallback) -> Subscription {
        let mut table = self.inner.lock().unwrap();
        let id = table.next_id;
        table.next_id += 1;
        table
            .by_type
            .entry(event_type.clone())
            .or_default()
            .push(GlobalListener { id, once, callback });
        Subscription {
            dispatcher: self.clone(),
            event_type,
            id,
        }
    }

    fn remove(&self, event_type: &str, id: u64) -> bool {
        let mut table = self.inner.lock().unwrap();
        let Some(listeners) = table.by_type.get_mut(event_type) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    fn tier_snapshot(&self, event_type: &str) -> Vec<(u64, bool, EventCallback)> {
        let table = self.inner.lock().unwrap();
        table
            .by_type
            .get(event_type)
            .map(|listeners| {
                listeners
                    .iter()
                    .map(|l| (l.id, l.once, Arc::clone(&l.callback)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Handle one raw WebSocket text frame: decode, correlate, deliver.
    ///
    /// Never returns an error; a malformed frame becomes a
    /// `FrameDecodeError` notification for wildcard listeners only.
    pub fn handle_text(&self, text: &str, registry: &Registry) {
        match EventFrame::decode(text) {
            Ok(frame) => self.dispatch(frame, registry),
            Err(e) => {
                warn!("Dropping malformed event frame: {}", e);
                let mut fields = Map::new();
                fields.insert("message".to_string(), Value::String(e.to_string()));
                fields.insert("raw".to_string(), Value::String(text.to_string()));
                let frame = EventFrame::synthetic("FrameDecodeError", fields);
                self.deliver_tier(&self.tier_snapshot(WILDCARD), None, &frame, &[]);
            }
        }
    }

    /// Correlate and deliver one decoded frame.
    pub fn dispatch(&self, frame: EventFrame, registry: &Registry) {
        if !is_known_event_type(&frame.event_type) {
            debug!(
                "Unrecognized event type '{}': wildcard delivery only",
                frame.event_type
            );
            self.deliver_tier(&self.tier_snapshot(WILDCARD), None, &frame, &[]);
            return;
        }

        let resources = resolve_resources(&frame, registry);
        trace!(
            "Dispatching '{}' with {} resolved resources",
            frame.event_type,
            resources.len()
        );

        // Tier 1: type-specific globals. Tier 2: global wildcards.
        self.deliver_tier(
            &self.tier_snapshot(&frame.event_type),
            Some(&frame.event_type),
            &frame,
            &resources,
        );
        self.deliver_tier(&self.tier_snapshot(WILDCARD), Some(WILDCARD), &frame, &resources);

        // Tier 3: per-instance listeners, in frame field order.
        for proxy in &resources {
            for (id, once, callback) in proxy.listeners_for(&frame.event_type) {
                if once {
                    // Unregister before invoking so no other listener on this
                    // proxy can observe a second delivery.
                    if proxy.claim_once(id) {
                        callback(&frame, &resources);
                    }
                } else {
                    callback(&frame, &resources);
                }
            }
        }
    }

    fn deliver_tier(
        &self,
        snapshot: &[(u64, bool, EventCallback)],
        registered_under: Option<&str>,
        frame: &EventFrame,
        resources: &[Proxy],
    ) {
        for (id, once, callback) in snapshot {
            if *once {
                let key = registered_under.unwrap_or(WILDCARD);
                if self.remove(key, *id) {
                    callback(frame, resources);
                }
            } else {
                callback(frame, resources);
            }
        }
    }
}

/// Resolve every entity reference in the frame to its proxy and apply the
/// embedded snapshot, in frame field order.
fn resolve_resources(frame: &EventFrame, registry: &Registry) -> Vec<Proxy> {
    let mut resources = Vec::new();
    for (field, value) in &frame.fields {
        let Some(kind) = ResourceKind::from_frame_field(field) else {
            continue;
        };
        let Value::Object(snapshot) = value else {
            continue;
        };
        let Some(id) = kind.id_from_snapshot(snapshot) else {
            warn!(
                "Event '{}' field '{}' has no usable {} id",
                frame.event_type, field, kind
            );
            continue;
        };
        let proxy = registry.get_or_create(kind, id);
        proxy.apply_snapshot(snapshot.clone());
        resources.push(proxy);
    }
    resources
}

/// Handle returned by [`Dispatcher::on`]/[`Dispatcher::once`].
pub struct Subscription {
    dispatcher: Dispatcher,
    event_type: String,
    id: u64,
}

impl Subscription {
    /// Remove the listener. Returns `false` if it was already removed
    /// (e.g. a once listener that has fired).
    pub fn unsubscribe(self) -> bool {
        self.dispatcher.remove(&self.event_type, self.id)
    }
}
