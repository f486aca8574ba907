//! Resource registry and entity proxies.
//!
//! Every server-side entity the client hears about (through an operation
//! result or an event frame) is represented by exactly one [`Proxy`] per
//! registry lifetime. Operations and events resolve to the identical object,
//! so a listener attached through one path observes updates arriving through
//! the other. Proxies are created lazily and creation never performs network
//! I/O; the server, not the client, owns entity lifetime.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::event::{EventCallback, WILDCARD};

/// Kinds of server entities tracked by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Channel,
    Bridge,
    Playback,
    LiveRecording,
    StoredRecording,
    Endpoint,
    DeviceState,
    Mailbox,
    Sound,
    Application,
}

impl ResourceKind {
    /// Map a conventional event-frame field name to the entity kind it
    /// references (`channel`, `peer`, `bridge_from`, ...).
    pub fn from_frame_field(field: &str) -> Option<Self> {
        match field {
            "channel" | "caller" | "peer" | "replace_channel" => Some(ResourceKind::Channel),
            "bridge" | "bridge_from" => Some(ResourceKind::Bridge),
            "playback" => Some(ResourceKind::Playback),
            "recording" => Some(ResourceKind::LiveRecording),
            "endpoint" => Some(ResourceKind::Endpoint),
            "device_state" => Some(ResourceKind::DeviceState),
            "mailbox" => Some(ResourceKind::Mailbox),
            _ => None,
        }
    }

    /// Map a declared response model name (`Channel`, `StoredRecording`, ...)
    /// to the entity kind, if it is one the registry tracks.
    pub fn from_model(model: &str) -> Option<Self> {
        match model {
            "Channel" => Some(ResourceKind::Channel),
            "Bridge" => Some(ResourceKind::Bridge),
            "Playback" => Some(ResourceKind::Playback),
            "LiveRecording" => Some(ResourceKind::LiveRecording),
            "StoredRecording" => Some(ResourceKind::StoredRecording),
            "Endpoint" => Some(ResourceKind::Endpoint),
            "DeviceState" => Some(ResourceKind::DeviceState),
            "Mailbox" => Some(ResourceKind::Mailbox),
            "Sound" => Some(ResourceKind::Sound),
            "Application" => Some(ResourceKind::Application),
            _ => None,
        }
    }

    /// Extract this kind's stable id from an entity snapshot.
    ///
    /// Most kinds carry `id` or `name`; endpoints are dual-keyed by
    /// technology and resource, joined with [`DUAL_KEY_SEPARATOR`].
    pub fn id_from_snapshot(&self, snapshot: &Map<String, Value>) -> Option<String> {
        let str_field = |name: &str| snapshot.get(name).and_then(Value::as_str);
        match self {
            ResourceKind::Channel
            | ResourceKind::Bridge
            | ResourceKind::Playback
            | ResourceKind::Sound => str_field("id").map(str::to_string),
            ResourceKind::LiveRecording
            | ResourceKind::StoredRecording
            | ResourceKind::DeviceState
            | ResourceKind::Mailbox
            | ResourceKind::Application => str_field("name").map(str::to_string),
            ResourceKind::Endpoint => {
                let tech = str_field("technology")?;
                let resource = str_field("resource")?;
                Some(dual_key(tech, resource))
            }
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Channel => "Channel",
            ResourceKind::Bridge => "Bridge",
            ResourceKind::Playback => "Playback",
            ResourceKind::LiveRecording => "LiveRecording",
            ResourceKind::StoredRecording => "StoredRecording",
            ResourceKind::Endpoint => "Endpoint",
            ResourceKind::DeviceState => "DeviceState",
            ResourceKind::Mailbox => "Mailbox",
            ResourceKind::Sound => "Sound",
            ResourceKind::Application => "Application",
        };
        write!(f, "{}", name)
    }
}

/// Separator joining the two ordered components of a dual-keyed entity id.
/// `/` cannot occur inside either component (endpoint technology/resource).
pub const DUAL_KEY_SEPARATOR: char = '/';

/// Join two ordered key components into one dual key.
pub fn dual_key(first: &str, second: &str) -> String {
    format!("{}{}{}", first, DUAL_KEY_SEPARATOR, second)
}

// ── Proxy ───────────────────────────────────────────────────────────

pub(crate) struct InstanceListener {
    pub(crate) id: u64,
    pub(crate) event_type: String,
    pub(crate) once: bool,
    pub(crate) callback: EventCallback,
}

#[derive(Default)]
struct ProxyState {
    fields: Map<String, Value>,
    listeners: Vec<InstanceListener>,
    next_listener_id: u64,
}

struct ProxyShared {
    kind: ResourceKind,
    id: String,
    state: Mutex<ProxyState>,
}

/// Client-side mirror of one server entity.
///
/// Cheap to clone; all clones refer to the same underlying object, and
/// [`Proxy::same_as`] tests that identity. Fields always reflect the latest
/// full snapshot seen; there is no field-by-field merging across time
/// points.
#[derive(Clone)]
pub struct Proxy {
    shared: Arc<ProxyShared>,
}

impl Proxy {
    fn new(kind: ResourceKind, id: String) -> Self {
        Self {
            shared: Arc::new(ProxyShared {
                kind,
                id,
                state: Mutex::new(ProxyState::default()),
            }),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.shared.kind
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// `true` if both handles refer to the same registry object.
    pub fn same_as(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Replace all tracked fields with a new full snapshot.
    pub fn apply_snapshot(&self, fields: Map<String, Value>) {
        let mut state = self.shared.state.lock().unwrap();
        state.fields = fields;
    }

    /// One tracked field from the latest snapshot.
    pub fn field(&self, name: &str) -> Option<Value> {
        let state = self.shared.state.lock().unwrap();
        state.fields.get(name).cloned()
    }

    /// The latest full snapshot as a JSON object.
    pub fn snapshot(&self) -> Map<String, Value> {
        let state = self.shared.state.lock().unwrap();
        state.fields.clone()
    }

    /// Register a listener for `event_type` (or [`WILDCARD`]) on this proxy.
    pub fn on(
        &self,
        event_type: impl Into<String>,
        callback: impl Fn(&crate::event::EventFrame, &[Proxy]) + Send + Sync + 'static,
    ) -> ProxySubscription {
        self.add_listener(event_type.into(), false, Arc::new(callback))
    }

    /// Register a listener that auto-unregisters after its first invocation.
    pub fn once(
        &self,
        event_type: impl Into<String>,
        callback: impl Fn(&crate::event::EventFrame, &[Proxy]) + Send + Sync + 'static,
    ) -> ProxySubscription {
        self.add_listener(event_type.into(), true, Arc::new(callback))
    }

    fn add_listener(&self, event_type: String, once: bool, callback: EventCallback) -> ProxySubscription {
        let mut state = self.shared.state.lock().unwrap();
        let id = state.next_listener_id;
        state.next_listener_id += 1;
        state.listeners.push(InstanceListener {
            id,
            event_type,
            once,
            callback,
        });
        ProxySubscription {
            proxy: self.clone(),
            id,
        }
    }

    pub(crate) fn remove_listener(&self, id: u64) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        let before = state.listeners.len();
        state.listeners.retain(|l| l.id != id);
        state.listeners.len() != before
    }

    /// Snapshot the listeners matching `event_type` (type match or wildcard
    /// registration), in registration order. Dispatch iterates the snapshot
    /// so callbacks may freely register or unregister listeners mid-pass.
    pub(crate) fn listeners_for(&self, event_type: &str) -> Vec<(u64, bool, EventCallback)> {
        let state = self.shared.state.lock().unwrap();
        state
            .listeners
            .iter()
            .filter(|l| l.event_type == event_type || l.event_type == WILDCARD)
            .map(|l| (l.id, l.once, Arc::clone(&l.callback)))
            .collect()
    }

    /// Claim a once listener: remove it from the live list and report
    /// whether it was still registered. At most one claim can ever succeed,
    /// which is what makes "fires at most once" hold even when the listener
    /// was snapshotted into several in-flight dispatch passes.
    pub(crate) fn claim_once(&self, id: u64) -> bool {
        self.remove_listener(id)
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("kind", &self.shared.kind)
            .field("id", &self.shared.id)
            .finish()
    }
}

/// Handle returned by [`Proxy::on`]/[`Proxy::once`]; unsubscribes the
/// listener it refers to.
pub struct ProxySubscription {
    proxy: Proxy,
    id: u64,
}

impl ProxySubscription {
    /// Remove the listener. Returns `false` if it was already removed
    /// (e.g. a once listener that has fired).
    pub fn unsubscribe(self) -> bool {
        self.proxy.remove_listener(self.id)
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// Shared map of (kind, id) → proxy. Clones share the same table.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<HashMap<(ResourceKind, String), Proxy>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or lazily create the single proxy for `(kind, id)`.
    pub fn get_or_create(&self, kind: ResourceKind, id: impl Into<String>) -> Proxy {
        let id = id.into();
        let mut map = self.inner.lock().unwrap();
        map.entry((kind, id.clone()))
            .or_insert_with(|| Proxy::new(kind, id))
            .clone()
    }

    /// Look up or create a dual-keyed proxy from its two ordered components.
    pub fn get_or_create_dual(&self, kind: ResourceKind, first: &str, second: &str) -> Proxy {
        self.get_or_create(kind, dual_key(first, second))
    }

    /// Proxy for `(kind, id)` if one exists already.
    pub fn get(&self, kind: ResourceKind, id: &str) -> Option<Proxy> {
        let map = self.inner.lock().unwrap();
        map.get(&(kind, id.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_get_or_create_returns_identical_proxy() {
        let registry = Registry::new();
        let a = registry.get_or_create(ResourceKind::Channel, "chan-1");
        let b = registry.get_or_create(ResourceKind::Channel, "chan-1");
        assert!(a.same_as(&b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_same_id_different_kind_is_distinct() {
        let registry = Registry::new();
        let channel = registry.get_or_create(ResourceKind::Channel, "x");
        let bridge = registry.get_or_create(ResourceKind::Bridge, "x");
        assert!(!channel.same_as(&bridge));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_snapshot_replaces_wholesale() {
        let registry = Registry::new();
        let proxy = registry.get_or_create(ResourceKind::Channel, "chan-1");

        proxy.apply_snapshot(obj(json!({"id": "chan-1", "state": "Ring", "name": "PJSIP/100"})));
        proxy.apply_snapshot(obj(json!({"id": "chan-1", "state": "Up"})));

        assert_eq!(proxy.field("state"), Some(json!("Up")));
        // The old `name` field must not linger after a full replacement
        assert_eq!(proxy.field("name"), None);
    }

    #[test]
    fn test_endpoint_dual_key() {
        let snapshot = obj(json!({"technology": "PJSIP", "resource": "100", "state": "online"}));
        let id = ResourceKind::Endpoint.id_from_snapshot(&snapshot).unwrap();
        assert_eq!(id, "PJSIP/100");

        let registry = Registry::new();
        let a = registry.get_or_create_dual(ResourceKind::Endpoint, "PJSIP", "100");
        let b = registry.get_or_create(ResourceKind::Endpoint, id);
        assert!(a.same_as(&b));
    }

    #[test]
    fn test_id_extraction_per_kind() {
        let by_id = obj(json!({"id": "abc"}));
        let by_name = obj(json!({"name": "rec-1"}));
        assert_eq!(
            ResourceKind::Channel.id_from_snapshot(&by_id).as_deref(),
            Some("abc")
        );
        assert_eq!(
            ResourceKind::LiveRecording.id_from_snapshot(&by_name).as_deref(),
            Some("rec-1")
        );
        assert_eq!(ResourceKind::Channel.id_from_snapshot(&by_name), None);
    }

    #[test]
    fn test_frame_field_mapping() {
        assert_eq!(
            ResourceKind::from_frame_field("channel"),
            Some(ResourceKind::Channel)
        );
        assert_eq!(
            ResourceKind::from_frame_field("peer"),
            Some(ResourceKind::Channel)
        );
        assert_eq!(
            ResourceKind::from_frame_field("bridge_from"),
            Some(ResourceKind::Bridge)
        );
        assert_eq!(ResourceKind::from_frame_field("application"), None);
    }

    #[test]
    fn test_unsubscribe_removes_listener() {
        let registry = Registry::new();
        let proxy = registry.get_or_create(ResourceKind::Bridge, "b-1");
        let sub = proxy.on("BridgeDestroyed", |_frame, _resources| {});
        assert_eq!(proxy.listeners_for("BridgeDestroyed").len(), 1);
        assert!(sub.unsubscribe());
        assert!(proxy.listeners_for("BridgeDestroyed").is_empty());
    }

    #[test]
    fn test_wildcard_listener_matches_any_type() {
        let registry = Registry::new();
        let proxy = registry.get_or_create(ResourceKind::Channel, "c-1");
        let _sub = proxy.on(WILDCARD, |_frame, _resources| {});
        assert_eq!(proxy.listeners_for("ChannelDtmfReceived").len(), 1);
        assert_eq!(proxy.listeners_for("StasisEnd").len(), 1);
    }

    #[test]
    fn test_claim_once_succeeds_exactly_once() {
        let registry = Registry::new();
        let proxy = registry.get_or_create(ResourceKind::Channel, "c-1");
        let listeners = {
            let _sub = proxy.once("StasisEnd", |_frame, _resources| {});
            proxy.listeners_for("StasisEnd")
        };
        let (id, once, _) = &listeners[0];
        assert!(*once);
        assert!(proxy.claim_once(*id));
        assert!(!proxy.claim_once(*id));
    }
}
