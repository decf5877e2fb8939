//! Static inventory compute backend.
//!
//! Hands out pre-provisioned hosts from a fixed address list. Creating an
//! instance allocates a free address under a fresh id; destroying returns
//! the address to the free list.

use std::collections::{HashMap, VecDeque};

use tokio::sync::Mutex;
use tracing::debug;

use autopool_core::backend::BackendFuture;
use autopool_core::{
    BackendError, ComputeBackend, Instance, InstanceId, LaunchTemplate, LaunchedInstance,
};

struct InventoryState {
    free: VecDeque<String>,
    allocated: HashMap<InstanceId, String>,
    next_seq: u64,
}

pub struct StaticInventory {
    state: Mutex<InventoryState>,
}

impl StaticInventory {
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            state: Mutex::new(InventoryState {
                free: addresses.into(),
                allocated: HashMap::new(),
                next_seq: 1,
            }),
        }
    }

    /// Inventory with the hosts of already-running instances taken out, for
    /// pools restored from a snapshot. New ids continue after the highest
    /// restored one.
    pub fn with_allocated<'a>(
        addresses: Vec<String>,
        instances: impl IntoIterator<Item = &'a Instance>,
    ) -> Self {
        let mut allocated = HashMap::new();
        let mut next_seq = 1;
        for inst in instances {
            if let Some(seq) = inst
                .id
                .strip_prefix("i-")
                .and_then(|hex| u64::from_str_radix(hex, 16).ok())
            {
                next_seq = next_seq.max(seq + 1);
            }
            allocated.insert(inst.id.clone(), inst.address.clone());
        }
        let free = addresses
            .into_iter()
            .filter(|a| !allocated.values().any(|used| used == a))
            .collect();
        Self {
            state: Mutex::new(InventoryState {
                free,
                allocated,
                next_seq,
            }),
        }
    }

    /// Number of unallocated hosts.
    pub async fn available(&self) -> usize {
        self.state.lock().await.free.len()
    }
}

impl ComputeBackend for StaticInventory {
    fn create_instance<'a>(
        &'a self,
        template: &'a LaunchTemplate,
    ) -> BackendFuture<'a, Result<LaunchedInstance, BackendError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let address = state
                .free
                .pop_front()
                .ok_or_else(|| BackendError::fatal("static inventory exhausted"))?;
            let id = format!("i-{:08x}", state.next_seq);
            state.next_seq += 1;
            state.allocated.insert(id.clone(), address.clone());
            debug!(%id, %address, image = %template.image_id, "allocated host from inventory");
            Ok(LaunchedInstance { id, address })
        })
    }

    fn destroy_instance<'a>(
        &'a self,
        id: &'a InstanceId,
    ) -> BackendFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if let Some(address) = state.allocated.remove(id) {
                debug!(%id, %address, "returned host to inventory");
                state.free.push_back(address);
            }
            Ok(())
        })
    }
}
