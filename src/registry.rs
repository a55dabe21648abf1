//! Address registry: copy-on-write snapshot table routing inbound updates.
//!
//! Lookups from the network and render contexts are lock-free snapshot
//! loads; administrative add/remove rebuilds the table under an admin lock
//! and swaps the snapshot, so neither hot context ever waits on a mutation.

use crate::error::{Error, Result};
use crate::slot::SlotState;
use crate::stats::DropCounters;
use crate::value::Message;
use arc_swap::ArcSwap;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{trace, warn};

#[derive(Default)]
struct AddressTable {
    /// Slots in insertion order; the basis for flat ordinal indexing.
    order: Vec<Arc<SlotState>>,
    by_path: HashMap<String, usize>,
    total_width: usize,
}

pub(crate) struct AddressRegistry {
    table: ArcSwap<AddressTable>,
    admin: Mutex<()>,
    stats: Arc<DropCounters>,
}

impl AddressRegistry {
    pub(crate) fn new(stats: Arc<DropCounters>) -> Self {
        Self {
            table: ArcSwap::from_pointee(AddressTable::default()),
            admin: Mutex::new(()),
            stats,
        }
    }

    pub(crate) fn add(&self, path: &str, width: usize, mul: f64, add: f64) -> Result<Arc<SlotState>> {
        if width == 0 {
            return Err(Error::InvalidConfig(format!(
                "address {path} registered with width 0"
            )));
        }
        let _guard = self.admin.lock();
        let current = self.table.load();
        if current.by_path.contains_key(path) {
            return Err(Error::DuplicateAddress(path.to_string()));
        }
        let slot = Arc::new(SlotState::new(path, width, mul, add));

        let mut order = current.order.clone();
        let mut by_path = current.by_path.clone();
        by_path.insert(path.to_string(), order.len());
        order.push(Arc::clone(&slot));
        let total_width = current.total_width + width;
        self.table.store(Arc::new(AddressTable {
            order,
            by_path,
            total_width,
        }));
        trace!(address = path, width, "registered control address");
        Ok(slot)
    }

    pub(crate) fn remove(&self, path: &str) -> Result<()> {
        let _guard = self.admin.lock();
        let current = self.table.load();
        let index = *current
            .by_path
            .get(path)
            .ok_or_else(|| Error::UnknownAddress(path.to_string()))?;

        let mut order = current.order.clone();
        order.remove(index);
        let mut by_path = HashMap::with_capacity(order.len());
        let mut total_width = 0;
        for (i, slot) in order.iter().enumerate() {
            by_path.insert(slot.address().to_string(), i);
            total_width += slot.width();
        }
        self.table.store(Arc::new(AddressTable {
            order,
            by_path,
            total_width,
        }));
        trace!(address = path, "removed control address");
        Ok(())
    }

    pub(crate) fn slot(&self, path: &str) -> Option<Arc<SlotState>> {
        let table = self.table.load();
        table.by_path.get(path).map(|&i| Arc::clone(&table.order[i]))
    }

    pub(crate) fn require(&self, path: &str) -> Result<Arc<SlotState>> {
        self.slot(path)
            .ok_or_else(|| Error::UnknownAddress(path.to_string()))
    }

    /// Resolve a flat ordinal index to `(slot, channel offset)`. The flat
    /// space is insertion order: each address occupies `width` consecutive
    /// indices.
    pub(crate) fn slot_at(&self, index: usize) -> Result<(Arc<SlotState>, usize)> {
        let table = self.table.load();
        let mut base = 0;
        for slot in &table.order {
            if index < base + slot.width() {
                return Ok((Arc::clone(slot), index - base));
            }
            base += slot.width();
        }
        Err(Error::IndexOutOfRange {
            index,
            len: table.total_width,
        })
    }

    pub(crate) fn addresses(&self) -> Vec<String> {
        self.table
            .load()
            .order
            .iter()
            .map(|slot| slot.address().to_string())
            .collect()
    }

    pub(crate) fn slots(&self) -> Vec<Arc<SlotState>> {
        self.table.load().order.to_vec()
    }

    pub(crate) fn len(&self) -> usize {
        self.table.load().order.len()
    }

    pub(crate) fn total_width(&self) -> usize {
        self.table.load().total_width
    }

    /// Network context entry point. Unknown addresses are dropped silently
    /// (counted); malformed arguments drop the message and leave the slot
    /// unchanged.
    pub(crate) fn deliver(&self, msg: &Message) {
        let Some(slot) = self.slot(&msg.address) else {
            self.stats.record_unknown_address();
            trace!(address = %msg.address, "dropped message for unknown address");
            return;
        };
        match slot.offer(&msg.args) {
            Ok(()) => {}
            Err(Error::ArityMismatch { expected, got }) => {
                self.stats.record_arity_mismatch();
                warn!(
                    address = %msg.address,
                    expected, got,
                    "dropped message with wrong arity"
                );
            }
            Err(err) => {
                self.stats.record_non_numeric();
                warn!(address = %msg.address, %err, "dropped non-numeric control message");
            }
        }
    }

    /// Programmatic update with the same coalescing semantics as a network
    /// arrival. Errors are returned to the caller instead of counted.
    pub(crate) fn set_value(&self, path: &str, values: &[f64]) -> Result<()> {
        self.require(path)?.offer_f64(values)
    }
}
