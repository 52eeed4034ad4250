//! Per-application scaler registry.
//!
//! The service-discovery layer hands every request a `Meta`; the manager
//! maps `Meta.key` to the one `Scaler` owning that application's pool,
//! creating it on first sight.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use ember_core::{Meta, ScalerConfig};
use ember_platform::PlatformClient;

use crate::scaler::Scaler;

pub struct ScalerManager {
    config: Arc<ScalerConfig>,
    platform: Arc<dyn PlatformClient>,
    /// Active scalers: app key → scaler.
    scalers: RwLock<HashMap<String, Arc<Scaler>>>,
}

impl ScalerManager {
    pub fn new(config: Arc<ScalerConfig>, platform: Arc<dyn PlatformClient>) -> Self {
        Self {
            config,
            platform,
            scalers: RwLock::new(HashMap::new()),
        }
    }

    /// The scaler for `meta`, created on first use.
    pub async fn scaler_for(&self, meta: &Meta) -> Arc<Scaler> {
        {
            let scalers = self.scalers.read().await;
            if let Some(scaler) = scalers.get(&meta.key) {
                return Arc::clone(scaler);
            }
        }

        let mut scalers = self.scalers.write().await;
        // A racing caller may have created it between the locks.
        if let Some(scaler) = scalers.get(&meta.key) {
            return Arc::clone(scaler);
        }
        let scaler = Scaler::new(
            meta.clone(),
            Arc::clone(&self.config),
            Arc::clone(&self.platform),
        );
        scalers.insert(meta.key.clone(), Arc::clone(&scaler));
        info!(app = %meta.key, "scaler registered");
        scaler
    }

    /// Look up an existing scaler without creating one.
    pub async fn get(&self, key: &str) -> Option<Arc<Scaler>> {
        self.scalers.read().await.get(key).cloned()
    }

    /// App keys with an active scaler.
    pub async fn app_keys(&self) -> Vec<String> {
        self.scalers.read().await.keys().cloned().collect()
    }

    /// True iff every active scaler reports live.
    pub async fn check_live(&self) -> bool {
        let scalers = self.scalers.read().await;
        scalers.values().all(|scaler| scaler.check_live())
    }

    /// Stop all GC loops (for graceful shutdown).
    pub async fn shutdown_all(&self) {
        let scalers = self.scalers.read().await;
        for scaler in scalers.values() {
            scaler.shutdown();
        }
        info!(count = scalers.len(), "all scalers shut down");
    }
}
