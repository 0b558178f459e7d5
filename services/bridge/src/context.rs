//! Application context.
//!
//! Replaces the global-singleton pattern: the broker and every module are
//! constructed exactly once here at startup, and anything that needs them
//! gets a handle from this context.

use std::sync::Arc;
use std::time::Instant;

use broker::{Broker, BrokerError, Module};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;

use crate::config::BridgeConfig;

pub struct AppContext {
    broker: Broker,
    modules: Vec<Module>,
    shutdown: Arc<Notify>,
}

impl AppContext {
    pub fn new(config: &BridgeConfig) -> Self {
        let broker = Broker::new();
        let shutdown = Arc::new(Notify::new());
        let core = build_core_module(&broker, config, Arc::clone(&shutdown));

        Self {
            broker,
            modules: vec![core],
            shutdown,
        }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Start every module, then bind the broker to the control stream.
    pub async fn start<S>(&self, stream: S) -> Result<(), BrokerError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        for module in &self.modules {
            module.start().await;
        }
        self.broker.start(stream)
    }

    /// Stop modules first so their `on_stop` teardown can still emit, then
    /// stop the broker loops.
    pub async fn stop(&self) {
        for module in &self.modules {
            module.stop().await;
        }
        self.broker.stop();
    }

    /// Resolves when a `shutdown` command arrives over the wire.
    pub async fn wait_for_shutdown(&self) {
        self.shutdown.notified().await;
    }
}

/// Built-in `core` module: liveness and introspection for the bridge
/// itself. Domain worker modules register alongside it at startup.
fn build_core_module(
    broker: &Broker,
    config: &BridgeConfig,
    shutdown: Arc<Notify>,
) -> Module {
    let started_at = Instant::now();
    let module =
        Module::new("core", broker.clone()).worker_limit(config.modules.worker_limit);

    module.register_handler("ping", |_msg| async { Ok(Some(json!({"pong": true}))) });

    let status_broker = broker.clone();
    module.register_handler("get_status", move |_msg| {
        let broker = status_broker.clone();
        async move {
            Ok(Some(json!({
                "uptime_secs": started_at.elapsed().as_secs(),
                "modules": broker.module_names(),
            })))
        }
    });

    module.register_handler("shutdown", move |_msg| {
        let shutdown = Arc::clone(&shutdown);
        async move {
            shutdown.notify_one();
            Ok(Some(json!({"status": "shutting_down"})))
        }
    });

    module
}
