use rand::seq::IndexedRandom;
use std::collections::HashMap;

use crate::error::RelayError;
use crate::models::Mode;

/// Mode-partitioned pool of pod endpoints, fixed at startup.
#[derive(Debug, Clone)]
pub struct PodDirectory {
    pools: HashMap<Mode, Vec<String>>,
}

impl PodDirectory {
    /// Build the directory, normalizing every endpoint.
    ///
    /// Each mode needs at least one valid endpoint. Duplicates are dropped,
    /// keeping the first occurrence.
    pub fn new(mut pools: HashMap<Mode, Vec<String>>) -> Result<Self, RelayError> {
        let mut normalized = HashMap::new();
        for mode in Mode::ALL {
            let raw = pools.remove(&mode).unwrap_or_default();
            let mut endpoints: Vec<String> = Vec::with_capacity(raw.len());
            for entry in raw.iter().filter(|e| !e.trim().is_empty()) {
                let endpoint = pod_client::normalize_endpoint(entry)
                    .map_err(|e| RelayError::Configuration(format!("{} pool: {}", mode, e)))?;
                if !endpoints.contains(&endpoint) {
                    endpoints.push(endpoint);
                }
            }
            if endpoints.is_empty() {
                return Err(RelayError::Configuration(format!(
                    "no pods configured for {} mode",
                    mode
                )));
            }
            normalized.insert(mode, endpoints);
        }
        Ok(Self { pools: normalized })
    }

    pub fn pods_for(&self, mode: Mode) -> &[String] {
        self.pools.get(&mode).map(Vec::as_slice).unwrap_or_default()
    }

    /// Uniformly random pod for `mode`.
    pub fn pick_pod(&self, mode: Mode) -> String {
        // Pools are never empty after construction
        self.pods_for(mode)
            .choose(&mut rand::rng())
            .cloned()
            .unwrap_or_default()
    }

    /// Membership check only, pods are not health-checked.
    pub fn is_live(&self, mode: Mode, endpoint: &str) -> bool {
        self.pods_for(mode).iter().any(|p| p == endpoint)
    }
}
