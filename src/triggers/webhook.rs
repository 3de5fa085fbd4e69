//! Webhook triggers
//!
//! A single axum listener, bound on the first registration and kept until
//! shutdown, answers every request with a catch-all handler that looks the
//! `(method, path)` pair up in the route table.

use crate::config::TriggerConfig;
use crate::error::{FlowError, Result};
use crate::triggers::FlowLauncher;
use crate::workflow::types::TriggerKind;
use axum::{
    extract::State,
    http::{Method, StatusCode, Uri},
    response::Json,
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    sync::{Mutex, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// Route table key: upper-case method and a path with a leading slash
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WebhookRoute {
    pub method: String,
    pub path: String,
}

impl WebhookRoute {
    pub fn new(method: &str, path: &str) -> Result<Self> {
        let method = method.trim().to_ascii_uppercase();
        let method = if method.is_empty() { "POST".to_string() } else { method };
        if !method.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(FlowError::invalid_trigger(
                "webhook",
                format!("invalid HTTP method '{}'", method),
            ));
        }

        let path = path.trim();
        if path.is_empty() || path == "/" {
            return Err(FlowError::invalid_trigger("webhook", "webhook path must not be empty"));
        }
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        Ok(Self { method, path })
    }
}

/// Snapshot entry for one webhook registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRegistration {
    pub flow_id: String,
    pub method: String,
    pub path: String,
}

type RouteTable = Arc<RwLock<HashMap<WebhookRoute, String>>>;

/// State shared with the request handler
#[derive(Clone)]
struct WebhookState {
    routes: RouteTable,
    launcher: FlowLauncher,
}

enum Listener {
    Idle,
    Serving {
        addr: SocketAddr,
        task: JoinHandle<()>,
    },
    Closed,
}

pub struct WebhookTriggers {
    launcher: FlowLauncher,
    routes: RouteTable,
    listener: Mutex<Listener>,
    bind_addr: (String, u16),
    grace: Duration,
    shutdown: CancellationToken,
}

impl WebhookTriggers {
    pub fn new(launcher: FlowLauncher, config: &TriggerConfig, shutdown: CancellationToken) -> Self {
        Self {
            launcher,
            routes: Arc::new(RwLock::new(HashMap::new())),
            listener: Mutex::new(Listener::Idle),
            bind_addr: (config.webhook_host.clone(), config.webhook_port),
            grace: config.webhook_grace(),
            shutdown,
        }
    }

    /// Bind `(method, path)` to `flow_id`, starting the listener if needed
    ///
    /// A bind failure returns `ResourceAcquisition` and leaves no route behind.
    pub async fn register(&self, flow_id: &str, path: &str, method: &str) -> Result<()> {
        let route = WebhookRoute::new(method, path)?;
        let mut listener = self.listener.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(FlowError::resource("webhook listener", "trigger manager is shut down"));
        }

        if matches!(*listener, Listener::Idle) {
            *listener = self.start_listener().await?;
        }

        let previous = self
            .routes
            .write()
            .await
            .insert(route.clone(), flow_id.to_string());
        if let Some(previous) = previous.filter(|previous| previous != flow_id) {
            tracing::warn!("⚠️ Webhook {} {} moved from flow {} to {}", route.method, route.path, previous, flow_id);
        }

        tracing::info!("🔗 Registered webhook {} {} for flow {}", route.method, route.path, flow_id);
        Ok(())
    }

    /// Remove the flow's `(method, path)` route; `NotFound` unless it is bound to `flow_id`
    pub async fn unregister(&self, flow_id: &str, path: &str, method: &str) -> Result<()> {
        let route = WebhookRoute::new(method, path)?;
        let mut routes = self.routes.write().await;
        if !routes.get(&route).is_some_and(|bound| bound == flow_id) {
            return Err(FlowError::not_found(
                "webhook trigger",
                format!("{} {}", route.method, route.path),
            ));
        }
        routes.remove(&route);
        tracing::info!("🗑️ Unregistered webhook {} {} for flow {}", route.method, route.path, flow_id);
        Ok(())
    }

    /// Address the listener is bound to, once started
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match *self.listener.lock().await {
            Listener::Serving { addr, .. } => Some(addr),
            _ => None,
        }
    }

    pub async fn snapshot(&self) -> Vec<WebhookRegistration> {
        let routes = self.routes.read().await;
        let mut entries: Vec<(&WebhookRoute, &String)> = routes.iter().collect();
        entries.sort();
        entries
            .into_iter()
            .map(|(route, flow_id)| WebhookRegistration {
                flow_id: flow_id.clone(),
                method: route.method.clone(),
                path: route.path.clone(),
            })
            .collect()
    }

    /// Stop accepting, give in-flight requests the grace period, then close
    pub async fn shutdown(&self) {
        let mut listener = self.listener.lock().await;
        self.routes.write().await.clear();

        if let Listener::Serving { addr, mut task } = std::mem::replace(&mut *listener, Listener::Closed) {
            tracing::info!("⏹️ Stopping webhook listener on {}", addr);
            if tokio::time::timeout(self.grace, &mut task).await.is_err() {
                tracing::warn!("⚠️ Webhook listener still busy after {:?}, aborting", self.grace);
                task.abort();
            }
        }
    }

    async fn start_listener(&self) -> Result<Listener> {
        let (host, port) = &self.bind_addr;
        let tcp = TcpListener::bind((host.as_str(), *port))
            .await
            .map_err(|e| FlowError::resource("webhook listener", format!("{}:{}: {}", host, port, e)))?;
        let addr = tcp
            .local_addr()
            .map_err(|e| FlowError::resource("webhook listener", e))?;

        let app = Router::new().fallback(handle_webhook).with_state(WebhookState {
            routes: Arc::clone(&self.routes),
            launcher: self.launcher.clone(),
        });

        let stop = self.shutdown.child_token();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(tcp, app.into_make_service())
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
            {
                tracing::error!("❌ Webhook listener failed: {}", e);
            }
        });

        tracing::info!("📡 Webhook listener on http://{}", addr);
        Ok(Listener::Serving { addr, task })
    }
}

/// Catch-all request handler: route lookup, then a run of the bound flow
///
/// 200 with `{status, message, flowId}` on success, 404 for unknown routes,
/// 500 when the flow cannot be loaded or started.
async fn handle_webhook(
    State(state): State<WebhookState>,
    method: Method,
    uri: Uri,
) -> (StatusCode, Json<Value>) {
    tracing::info!("📥 Webhook request received: {} {}", method, uri.path());

    let route = WebhookRoute {
        method: method.as_str().to_ascii_uppercase(),
        path: uri.path().to_string(),
    };
    let Some(flow_id) = state.routes.read().await.get(&route).cloned() else {
        tracing::debug!("❌ No webhook bound to {} {}", route.method, route.path);
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "status": "error",
                "message": format!("No webhook registered for {} {}", route.method, route.path),
            })),
        );
    };

    match state.launcher.launch(&flow_id, TriggerKind::Webhook).await {
        Ok(execution_id) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "message": "Workflow triggered",
                "flowId": flow_id,
                "executionId": execution_id,
            })),
        ),
        Err(e) => {
            tracing::error!("❌ Webhook {} {} failed to start flow {}: {}", route.method, route.path, flow_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "message": e.to_string(),
                    "flowId": flow_id,
                })),
            )
        }
    }
}
