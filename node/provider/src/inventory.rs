use std::collections::BTreeMap;
use market_common::{Cid, Machine, MarketError};

/// Machines advertised by a provider, keyed by CID hash
#[derive(Debug, Clone, Default)]
pub struct MachineInventory {
    machines: BTreeMap<String, Machine>,
}

impl MachineInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the machine stored under `id`
    pub fn add(&mut self, id: &Cid, machine: Machine) -> Option<Machine> {
        self.machines.insert(id.hash.clone(), machine)
    }

    pub fn remove(&mut self, id: &str) -> Result<Machine, MarketError> {
        self.machines
            .remove(id)
            .ok_or_else(|| MarketError::KeyNotFound(id.to_string()))
    }

    pub fn machines(&self) -> &BTreeMap<String, Machine> {
        &self.machines
    }
}
