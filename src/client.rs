//! ARI client facade.
//!
//! [`AriClient::connect`] loads the API description and synthesizes the
//! operation surface; [`AriClient::start`] opens the event stream. Both
//! sides share one [`Registry`], so a snapshot arriving through an
//! operation result and one arriving through an event land on the same
//! proxy object.

use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use url::Url;

use crate::connection::{ConnectionConfig, ConnectionStatus, Supervisor};
use crate::error::{AriError, AriResult};
use crate::event::{Dispatcher, EventFrame, Subscription};
use crate::loader::load_description;
use crate::operation::{invoke, OperationArgs};
use crate::registry::{Proxy, Registry, ResourceKind};
use crate::schema::{ApiDescription, OperationSpec};
use crate::transport::{HttpTransport, ReqwestTransport};

/// Client for one ARI endpoint.
///
/// The operation surface is synthesized at connect time from the server's
/// own API description, so the set of available groups and operations
/// always matches the server version actually being talked to.
pub struct AriClient {
    transport: Arc<dyn HttpTransport>,
    description: ApiDescription,
    base_url: Url,
    credentials: (String, String),
    registry: Registry,
    dispatcher: Dispatcher,
    status: Arc<Mutex<ConnectionStatus>>,
    supervisor: tokio::sync::Mutex<Supervisor>,
}

impl AriClient {
    /// Connect to an ARI endpoint, e.g. `http://localhost:8088/ari`, with
    /// HTTP basic auth credentials.
    ///
    /// Resolves only once every resource group document has been fetched
    /// and validated; any failure aborts with [`AriError::SpecLoad`] and no
    /// operation surface is exposed.
    pub async fn connect(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> AriResult<Self> {
        let username = username.into();
        let password = password.into();
        let transport = Arc::new(ReqwestTransport::with_basic_auth(
            username.clone(),
            password.clone(),
        ));
        Self::connect_with_transport(
            transport,
            base_url,
            username,
            password,
            ConnectionConfig::default(),
        )
        .await
    }

    /// Connect with a caller-supplied transport and connection tuning.
    pub async fn connect_with_transport(
        transport: Arc<dyn HttpTransport>,
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        config: ConnectionConfig,
    ) -> AriResult<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))?;
        let index_url = Url::parse(&format!(
            "{}/api-docs/resources.json",
            base_url.as_str().trim_end_matches('/')
        ))?;

        let description = load_description(transport.as_ref(), &index_url).await?;

        let registry = Registry::new();
        let dispatcher = Dispatcher::new();
        let status = Arc::new(Mutex::new(ConnectionStatus::Disconnected));
        let supervisor = Supervisor::new(
            config,
            Arc::clone(&status),
            dispatcher.clone(),
            registry.clone(),
        );

        Ok(Self {
            transport,
            description,
            base_url,
            credentials: (username.into(), password.into()),
            registry,
            dispatcher,
            status,
            supervisor: tokio::sync::Mutex::new(supervisor),
        })
    }

    // ── Operation surface ───────────────────────────────────────────

    /// Names of all loaded resource groups, in root-index order.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.description.groups.keys().map(String::as_str)
    }

    /// Operation specs for one group, in document order.
    pub fn operations(&self, group: &str) -> Option<impl Iterator<Item = &OperationSpec>> {
        self.description
            .group(group)
            .map(|g| g.operations.values())
    }

    /// Spec of one operation, if it exists.
    pub fn operation(&self, group: &str, operation: &str) -> Option<&OperationSpec> {
        self.description
            .group(group)?
            .operations
            .get(operation)
    }

    /// The loaded API description.
    pub fn description(&self) -> &ApiDescription {
        &self.description
    }

    /// Invoke one synthesized operation, e.g.
    /// `request("channels", "originate", args)`.
    ///
    /// When the response carries a known entity snapshot (or a list of
    /// them), the registry is updated before the value is returned, so
    /// later events correlate against the same proxy.
    pub async fn request(
        &self,
        group: &str,
        operation: &str,
        args: OperationArgs,
    ) -> AriResult<Value> {
        let group_spec = self
            .description
            .group(group)
            .ok_or_else(|| AriError::UnknownOperation {
                group: group.to_string(),
                operation: operation.to_string(),
            })?;
        let spec = group_spec
            .operations
            .get(operation)
            .ok_or_else(|| AriError::UnknownOperation {
                group: group.to_string(),
                operation: operation.to_string(),
            })?;

        let value = invoke(self.transport.as_ref(), group_spec, spec, &args).await?;
        self.absorb_result(spec.response_class.as_deref(), &value);
        Ok(value)
    }

    /// Fold an operation result into the registry when its declared model
    /// names a tracked entity kind (`Channel`, `List[Bridge]`, ...).
    fn absorb_result(&self, response_class: Option<&str>, value: &Value) {
        let Some(response_class) = response_class else {
            return;
        };

        if let Some(element) = response_class
            .strip_prefix("List[")
            .and_then(|s| s.strip_suffix(']'))
        {
            if let (Some(kind), Value::Array(items)) =
                (ResourceKind::from_model(element), value)
            {
                for item in items {
                    self.absorb_snapshot(kind, item);
                }
            }
            return;
        }

        if let Some(kind) = ResourceKind::from_model(response_class) {
            self.absorb_snapshot(kind, value);
        }
    }

    fn absorb_snapshot(&self, kind: ResourceKind, value: &Value) {
        let Value::Object(snapshot) = value else {
            return;
        };
        if let Some(id) = kind.id_from_snapshot(snapshot) {
            self.registry
                .get_or_create(kind, id)
                .apply_snapshot(snapshot.clone());
        }
    }

    // ── Subscription surface ────────────────────────────────────────

    /// Register a global listener for an event type, or every frame with
    /// [`crate::event::WILDCARD`].
    pub fn on(
        &self,
        event_type: impl Into<String>,
        callback: impl Fn(&EventFrame, &[Proxy]) + Send + Sync + 'static,
    ) -> Subscription {
        self.dispatcher.on(event_type, callback)
    }

    /// Register a global listener that auto-unregisters after its first
    /// invocation.
    pub fn once(
        &self,
        event_type: impl Into<String>,
        callback: impl Fn(&EventFrame, &[Proxy]) + Send + Sync + 'static,
    ) -> Subscription {
        self.dispatcher.once(event_type, callback)
    }

    /// The single proxy for `(kind, id)`, created lazily.
    pub fn resource(&self, kind: ResourceKind, id: impl Into<String>) -> Proxy {
        self.registry.get_or_create(kind, id)
    }

    /// Shared resource registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ── Event stream lifecycle ──────────────────────────────────────

    /// Open the event stream scoped to the named Stasis applications.
    /// `subscribe_all` additionally requests events for resources not
    /// created inside those applications. Resolves once the WebSocket is
    /// open.
    pub async fn start(&self, applications: &[&str], subscribe_all: bool) -> AriResult<()> {
        let events_url = self.events_url(applications, subscribe_all)?;
        self.supervisor.lock().await.start(events_url).await
    }

    /// Close the event stream from any state, cancelling in-flight
    /// reconnect attempts. Always ends in [`ConnectionStatus::Closed`].
    pub async fn stop(&self) {
        self.supervisor.lock().await.stop().await;
    }

    /// Send a WebSocket liveness probe; the pong surfaces as a `Pong`
    /// notification.
    pub async fn ping(&self) -> AriResult<()> {
        self.supervisor.lock().await.ping()
    }

    /// Current event-stream state.
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap()
    }

    fn events_url(&self, applications: &[&str], subscribe_all: bool) -> AriResult<Url> {
        if applications.is_empty() {
            return Err(AriError::connection(
                "at least one application name is required",
            ));
        }

        let mut url = self.base_url.clone();
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| AriError::connection("cannot derive WebSocket scheme"))?;

        let path = format!("{}/events", url.path().trim_end_matches('/'));
        url.set_path(&path);

        let (ref username, ref password) = self.credentials;
        url.query_pairs_mut()
            .append_pair("app", &applications.join(","))
            .append_pair("api_key", &format!("{}:{}", username, password));
        if subscribe_all {
            url.query_pairs_mut().append_pair("subscribeAll", "true");
        }
        Ok(url)
    }
}

impl fmt::Debug for AriClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AriClient")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.credentials.0)
            .field("groups", &self.description.groups.len())
            .field("status", &self.connection_status())
            .finish_non_exhaustive()
    }
}
