//! The process-wide set of bound interfaces.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info};

use crate::backend::Backends;
use crate::config::{Config, InterfaceConfig, InterfaceOptions};
use crate::error::{Error, Result};
use crate::service::{Service, Shared};
use crate::stats::StatsSnapshot;
use crate::transport::DhcpTransport;

pub struct Registry {
    shared: Arc<Shared>,
    transport: Arc<dyn DhcpTransport>,
    services: Mutex<BTreeMap<String, Arc<Service>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new(config: &Config, backends: Backends, transport: Arc<dyn DhcpTransport>) -> Result<Self> {
        Ok(Self {
            shared: Arc::new(Shared::new(config, backends)?),
            transport,
            services: Mutex::new(BTreeMap::new()),
        })
    }

    /// Binds `name`, or updates the existing binding.
    pub async fn bind(&self, name: &str, index: u32, options: &str) -> Result<Arc<Service>> {
        let options = match InterfaceOptions::parse(options) {
            Ok(options) => options,
            Err(error) => {
                error!(ifname = name, "{}", error);
                return Err(error);
            }
        };

        let mut services = self.services.lock().await;
        let existing = services.get(name).cloned();
        if let Some(service) = existing {
            drop(services);
            service.update(index, options).await;
            return Ok(service);
        }

        let listener = self.transport.create_listener(name, index)?;
        let service = Service::start(name, index, options, listener, Arc::clone(&self.shared));
        services.insert(name.to_string(), Arc::clone(&service));
        Ok(service)
    }

    /// Unbinds `name`, waiting for its sessions to finish. Returns false if
    /// it was not bound.
    pub async fn unbind(&self, name: &str) -> bool {
        let service = self.services.lock().await.remove(name);
        match service {
            Some(service) => {
                service.close().await;
                true
            }
            None => false,
        }
    }

    /// Makes the bound set equal to `interfaces`.
    ///
    /// Interfaces that fail to bind are logged and skipped.
    pub async fn reconcile(&self, interfaces: &[InterfaceConfig]) {
        for service in self.services.lock().await.values() {
            service.set_active(false);
        }

        for interface in interfaces {
            if let Err(error) = self
                .bind(&interface.name, interface.index, &interface.options)
                .await
            {
                error!(ifname = %interface.name, "failed to bind: {}", error);
            }
        }

        let stale: Vec<String> = self
            .services
            .lock()
            .await
            .iter()
            .filter(|(_, service)| !service.is_active())
            .map(|(name, _)| name.clone())
            .collect();

        for name in stale {
            self.unbind(&name).await;
        }
    }

    pub async fn service(&self, name: &str) -> Result<Arc<Service>> {
        self.services
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownInterface(name.to_string()))
    }

    pub async fn interfaces(&self) -> Vec<String> {
        self.services.lock().await.keys().cloned().collect()
    }

    pub async fn shutdown(&self) {
        let services = std::mem::take(&mut *self.services.lock().await);
        for service in services.into_values() {
            service.close().await;
        }
        info!(stats = %self.stats(), "registry shut down");
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}
