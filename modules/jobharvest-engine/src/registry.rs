//! Static adapter registry: built once at startup, read-only thereafter.
//! Shared by every worker without locking.

use std::collections::HashMap;
use std::sync::Arc;

use jobharvest_common::{HarvestError, OrgId, Organization};

use crate::adapter::Adapter;

#[derive(Default)]
pub struct RegistryBuilder {
    organizations: Vec<Organization>,
    adapters: HashMap<OrgId, Arc<dyn Adapter>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one organization with its adapter. Registering the same org
    /// id twice is a startup-time configuration error.
    pub fn register(
        mut self,
        org: Organization,
        adapter: Arc<dyn Adapter>,
    ) -> Result<Self, HarvestError> {
        if self.adapters.contains_key(&org.id) {
            return Err(HarvestError::Config(format!(
                "duplicate adapter registration for org {}",
                org.id
            )));
        }
        self.adapters.insert(org.id.clone(), adapter);
        self.organizations.push(org);
        Ok(self)
    }

    pub fn build(self) -> AdapterRegistry {
        AdapterRegistry {
            organizations: self.organizations,
            adapters: self.adapters,
        }
    }
}

pub struct AdapterRegistry {
    /// Registration order, preserved for `--all` runs.
    organizations: Vec<Organization>,
    adapters: HashMap<OrgId, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn resolve(&self, id: &OrgId) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(id).cloned()
    }

    pub fn organization(&self, id: &OrgId) -> Option<&Organization> {
        self.organizations.iter().find(|o| &o.id == id)
    }

    /// All registered organizations in registration order.
    pub fn organizations(&self) -> &[Organization] {
        &self.organizations
    }

    /// Ids of all enabled organizations, in registration order.
    pub fn enabled_ids(&self) -> Vec<OrgId> {
        self.organizations
            .iter()
            .filter(|o| o.enabled)
            .map(|o| o.id.clone())
            .collect()
    }
}
