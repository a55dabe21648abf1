//! Block-rate control receiver.
//!
//! A [`ControlReceiver`] owns exactly one listener port and an address
//! registry. The network context coalesces inbound values into per-address
//! slots; the render context samples each slot once per block, either as an
//! immediate step or as a one-block linear ramp. Administrative add/remove
//! swaps registry snapshots and never stalls either hot context.
//!
//! # Example
//! ```ignore
//! let rx = ControlReceiver::builder(9000)
//!     .address("/pitch")
//!     .address("/amp")
//!     .build()?;
//!
//! // render callback, once per block:
//! let pitch = rx.sample("/pitch")?;
//! ```

use crate::error::{Error, Result};
use crate::registry::AddressRegistry;
use crate::slot::SlotState;
use crate::stats::{DropCounters, DropSnapshot};
use crate::transport::{LoopbackHub, PortBinding};
use crate::value::Message;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default channel count for list-valued addresses.
pub const DEFAULT_VECTOR_WIDTH: usize = 8;

struct AddressEntry {
    path: String,
    width: usize,
    mul: f64,
    add: f64,
}

pub struct ControlReceiverBuilder {
    port: u16,
    addresses: Vec<AddressEntry>,
    interpolate: bool,
    hub: Arc<LoopbackHub>,
}

impl ControlReceiverBuilder {
    fn new(port: u16) -> Self {
        Self {
            port,
            addresses: Vec::new(),
            interpolate: true,
            hub: LoopbackHub::global(),
        }
    }

    /// Register a scalar address.
    pub fn address(self, path: impl Into<String>) -> Self {
        self.address_with(path, 1, 1.0, 0.0)
    }

    /// Register a list-valued address with a fixed channel count, typically
    /// [`DEFAULT_VECTOR_WIDTH`].
    pub fn vector_address(self, path: impl Into<String>, width: usize) -> Self {
        self.address_with(path, width, 1.0, 0.0)
    }

    /// Register an address with explicit width and output scaling
    /// (`value * mul + add`).
    pub fn address_with(mut self, path: impl Into<String>, width: usize, mul: f64, add: f64) -> Self {
        self.addresses.push(AddressEntry {
            path: path.into(),
            width,
            mul,
            add,
        });
        self
    }

    /// Enable or disable one-block ramping toward new targets. Enabled by
    /// default; disabled, every new value is an immediate step.
    pub fn interpolate(mut self, on: bool) -> Self {
        self.interpolate = on;
        self
    }

    /// Bind on a specific hub instead of the process-wide one.
    pub fn hub(mut self, hub: Arc<LoopbackHub>) -> Self {
        self.hub = hub;
        self
    }

    pub fn build(self) -> Result<ControlReceiver> {
        let stats = Arc::new(DropCounters::new());
        let registry = Arc::new(AddressRegistry::new(Arc::clone(&stats)));
        for entry in &self.addresses {
            registry
                .add(&entry.path, entry.width, entry.mul, entry.add)
                .map_err(|err| match err {
                    Error::DuplicateAddress(path) => {
                        Error::InvalidConfig(format!("address {path} listed twice"))
                    }
                    other => other,
                })?;
        }

        let dispatch_registry = Arc::clone(&registry);
        let binding = self.hub.bind(
            self.port,
            Arc::new(move |msg: Message| dispatch_registry.deliver(&msg)),
        )?;

        Ok(ControlReceiver {
            registry,
            interpolate: Arc::new(AtomicBool::new(self.interpolate)),
            stats,
            port: self.port,
            binding: Mutex::new(Some(binding)),
        })
    }
}

/// Receive-side control object: one listener port, many addresses.
pub struct ControlReceiver {
    registry: Arc<AddressRegistry>,
    interpolate: Arc<AtomicBool>,
    stats: Arc<DropCounters>,
    port: u16,
    binding: Mutex<Option<PortBinding>>,
}

impl ControlReceiver {
    pub fn builder(port: u16) -> ControlReceiverBuilder {
        ControlReceiverBuilder::new(port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Registered addresses in insertion order.
    pub fn addresses(&self) -> Vec<String> {
        self.registry.addresses()
    }

    /// Register a new scalar address; live immediately for future messages.
    pub fn add_address(&self, path: &str) -> Result<()> {
        self.add_address_with(path, 1, 1.0, 0.0)
    }

    pub fn add_vector_address(&self, path: &str, width: usize) -> Result<()> {
        self.add_address_with(path, width, 1.0, 0.0)
    }

    /// Width is fixed for the lifetime of the address; changing it means
    /// remove and re-add.
    pub fn add_address_with(&self, path: &str, width: usize, mul: f64, add: f64) -> Result<()> {
        self.registry.add(path, width, mul, add).map(|_| ())
    }

    /// Remove an address and its slot. Messages already in flight for it are
    /// dropped as unknown from now on.
    pub fn del_address(&self, path: &str) -> Result<()> {
        self.registry.remove(path)
    }

    pub fn set_interpolation(&self, on: bool) {
        self.interpolate.store(on, Ordering::Release);
    }

    pub fn interpolation(&self) -> bool {
        self.interpolate.load(Ordering::Acquire)
    }

    /// Programmatic update with the same semantics as a network arrival,
    /// including last-writer-wins coalescing within a block.
    pub fn set_value(&self, path: &str, value: f64) -> Result<()> {
        self.registry.set_value(path, &[value])
    }

    pub fn set_values(&self, path: &str, values: &[f64]) -> Result<()> {
        self.registry.set_value(path, values)
    }

    /// Sample a scalar address: advance one render block and return the
    /// block-end value. Call exactly once per block per address. For vector
    /// addresses this returns channel 0; use [`sample_vector_into`].
    ///
    /// [`sample_vector_into`]: ControlReceiver::sample_vector_into
    pub fn sample(&self, path: &str) -> Result<f64> {
        let slot = self.registry.require(path)?;
        slot.begin_block(self.interpolation());
        Ok(slot.end_value(0))
    }

    /// Sample a vector address into `out`, which must hold exactly `width`
    /// values.
    pub fn sample_vector_into(&self, path: &str, out: &mut [f64]) -> Result<()> {
        let slot = self.registry.require(path)?;
        if out.len() != slot.width() {
            return Err(Error::ArityMismatch {
                expected: slot.width(),
                got: out.len(),
            });
        }
        slot.begin_block(self.interpolation());
        slot.end_values_into(out);
        Ok(())
    }

    /// Sample by flat ordinal index (insertion order, `width` consecutive
    /// indices per address). Advances the owning slot's block.
    pub fn sample_index(&self, index: usize) -> Result<f64> {
        let (slot, offset) = self.registry.slot_at(index)?;
        slot.begin_block(self.interpolation());
        Ok(slot.end_value(offset))
    }

    /// Per-sample values of the current block for one channel of an address.
    /// Pure with respect to slot state; call after sampling the block. The
    /// ramp increment is derived from `out.len()`.
    pub fn ramp_into(&self, path: &str, offset: usize, out: &mut [f64]) -> Result<()> {
        let slot = self.registry.require(path)?;
        if offset >= slot.width() {
            return Err(Error::IndexOutOfRange {
                index: offset,
                len: slot.width(),
            });
        }
        slot.ramp_into(offset, out);
        Ok(())
    }

    /// Peek the last block-start value without touching ramp state. Safe
    /// from any context.
    pub fn get(&self, path: &str) -> Result<f64> {
        Ok(self.registry.require(path)?.peek(0))
    }

    pub fn get_vector_into(&self, path: &str, out: &mut [f64]) -> Result<()> {
        let slot = self.registry.require(path)?;
        if out.len() != slot.width() {
            return Err(Error::ArityMismatch {
                expected: slot.width(),
                got: out.len(),
            });
        }
        slot.peek_into(out);
        Ok(())
    }

    /// Peek by flat ordinal index.
    pub fn get_index(&self, index: usize) -> Result<f64> {
        let (slot, offset) = self.registry.slot_at(index)?;
        Ok(slot.peek(offset))
    }

    /// All block-start values, flattened in insertion order.
    pub fn get_all(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.registry.total_width());
        for slot in self.registry.slots() {
            let base = out.len();
            out.resize(base + slot.width(), 0.0);
            slot.peek_into(&mut out[base..]);
        }
        out
    }

    /// Resolve an address once, for sampling from the render context without
    /// a fallible lookup per block. The handle keeps the slot alive; after
    /// `del_address` it simply stops receiving new values.
    pub fn handle(&self, path: &str) -> Result<SlotHandle> {
        Ok(SlotHandle {
            slot: self.registry.require(path)?,
            interpolate: Arc::clone(&self.interpolate),
        })
    }

    pub fn stats(&self) -> DropSnapshot {
        self.stats.snapshot()
    }

    /// Close the listener. Blocks until the delivery thread has joined;
    /// afterwards no slot receives further network writes. Idempotent.
    pub fn close(&self) {
        if let Some(mut binding) = self.binding.lock().take() {
            binding.close();
        }
    }
}

impl Drop for ControlReceiver {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ControlReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlReceiver")
            .field("port", &self.port)
            .field("addresses", &self.registry.len())
            .finish()
    }
}

/// Pre-resolved sampling handle for one address. All methods are bounded and
/// infallible, built for the render context.
pub struct SlotHandle {
    slot: Arc<SlotState>,
    interpolate: Arc<AtomicBool>,
}

impl SlotHandle {
    pub fn address(&self) -> &str {
        self.slot.address()
    }

    pub fn width(&self) -> usize {
        self.slot.width()
    }

    /// Advance one block and return the block-end value of channel 0.
    pub fn sample(&self) -> f64 {
        self.slot
            .begin_block(self.interpolate.load(Ordering::Acquire));
        self.slot.end_value(0)
    }

    /// Advance one block and write all channels' block-end values.
    pub fn sample_into(&self, out: &mut [f64]) {
        self.slot
            .begin_block(self.interpolate.load(Ordering::Acquire));
        self.slot.end_values_into(out);
    }

    /// Per-sample ramp of the current block for one channel.
    pub fn ramp_into(&self, offset: usize, out: &mut [f64]) {
        self.slot.ramp_into(offset, out);
    }

    /// Block-start peek of channel 0.
    pub fn peek(&self) -> f64 {
        self.slot.peek(0)
    }
}
