//! Typed-data path: arbitrary-arity messages with direct callback delivery.
//!
//! Unlike the control path there is no slot state and no sampling; a
//! matching message invokes the receiver's handler synchronously on the
//! delivery thread, and sends go out immediately. Handler faults are caught
//! at the delivery boundary so the listener survives them.

use crate::error::{Error, Result};
use crate::stats::{DropCounters, DropSnapshot};
use crate::transport::{LoopbackHub, PortBinding, SendTarget, TransportSink};
use crate::value::{ControlValue, Message, TypeSignature};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{trace, warn};

/// Handler invoked for every message matching a registered address.
pub type DataHandler = dyn Fn(&str, &[ControlValue]) + Send + Sync;

struct ReceiverShared {
    /// Registered addresses, insertion order. Swapped copy-on-write so the
    /// delivery thread never waits on add/del.
    addresses: ArcSwap<Vec<String>>,
    admin: Mutex<()>,
    handler: Box<DataHandler>,
    stats: Arc<DropCounters>,
}

impl ReceiverShared {
    fn dispatch(&self, msg: Message) {
        if !self.addresses.load().iter().any(|a| *a == msg.address) {
            // Unregistered addresses drop without a report, counted only.
            self.stats.record_unknown_address();
            return;
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            (self.handler)(&msg.address, &msg.args);
        }));
        if outcome.is_err() {
            self.stats.record_handler_fault();
            warn!(address = %msg.address, "data handler panicked; listener continues");
        }
    }
}

pub struct DataReceiverBuilder {
    port: u16,
    addresses: Vec<String>,
    handler: Option<Box<DataHandler>>,
    hub: Arc<LoopbackHub>,
}

impl DataReceiverBuilder {
    fn new(port: u16) -> Self {
        Self {
            port,
            addresses: Vec::new(),
            handler: None,
            hub: LoopbackHub::global(),
        }
    }

    pub fn address(mut self, path: impl Into<String>) -> Self {
        self.addresses.push(path.into());
        self
    }

    /// The one handler for this receiver, fixed for its lifetime.
    pub fn handler(mut self, handler: impl Fn(&str, &[ControlValue]) + Send + Sync + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn hub(mut self, hub: Arc<LoopbackHub>) -> Self {
        self.hub = hub;
        self
    }

    pub fn build(self) -> Result<DataReceiver> {
        let handler = self
            .handler
            .ok_or_else(|| Error::InvalidConfig("data receiver needs a handler".into()))?;
        let mut addresses = Vec::with_capacity(self.addresses.len());
        for path in self.addresses {
            if addresses.contains(&path) {
                return Err(Error::InvalidConfig(format!("address {path} listed twice")));
            }
            addresses.push(path);
        }

        let shared = Arc::new(ReceiverShared {
            addresses: ArcSwap::from_pointee(addresses),
            admin: Mutex::new(()),
            handler,
            stats: Arc::new(DropCounters::new()),
        });

        let dispatch_shared = Arc::clone(&shared);
        let binding = self.hub.bind(
            self.port,
            Arc::new(move |msg: Message| dispatch_shared.dispatch(msg)),
        )?;

        Ok(DataReceiver {
            shared,
            port: self.port,
            binding: Mutex::new(Some(binding)),
        })
    }
}

/// Receive side of the data path: one port, one handler, a live address set.
pub struct DataReceiver {
    shared: Arc<ReceiverShared>,
    port: u16,
    binding: Mutex<Option<PortBinding>>,
}

impl DataReceiver {
    pub fn builder(port: u16) -> DataReceiverBuilder {
        DataReceiverBuilder::new(port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addresses(&self) -> Vec<String> {
        self.shared.addresses.load().to_vec()
    }

    /// Add an address without tearing down the listener.
    pub fn add_address(&self, path: &str) -> Result<()> {
        let _guard = self.shared.admin.lock();
        let current = self.shared.addresses.load();
        if current.iter().any(|a| a == path) {
            return Err(Error::DuplicateAddress(path.to_string()));
        }
        let mut next = current.to_vec();
        next.push(path.to_string());
        self.shared.addresses.store(Arc::new(next));
        Ok(())
    }

    pub fn del_address(&self, path: &str) -> Result<()> {
        let _guard = self.shared.admin.lock();
        let current = self.shared.addresses.load();
        let Some(index) = current.iter().position(|a| a == path) else {
            return Err(Error::UnknownAddress(path.to_string()));
        };
        let mut next = current.to_vec();
        next.remove(index);
        self.shared.addresses.store(Arc::new(next));
        Ok(())
    }

    pub fn stats(&self) -> DropSnapshot {
        self.shared.stats.snapshot()
    }

    /// Close the listener; once this returns the handler will not run again.
    pub fn close(&self) {
        if let Some(mut binding) = self.binding.lock().take() {
            binding.close();
        }
    }
}

impl Drop for DataReceiver {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DataReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataReceiver")
            .field("port", &self.port)
            .field("addresses", &self.shared.addresses.load().len())
            .finish()
    }
}

struct DataTarget {
    signature: TypeSignature,
    target: SendTarget,
}

/// Send side of the data path: signature-validated targets, immediate
/// best-effort transmission, independent fan-out.
pub struct DataSender {
    targets: Mutex<Vec<DataTarget>>,
    sink: Arc<dyn TransportSink>,
    stats: Arc<DropCounters>,
}

impl DataSender {
    /// Sender over the process-wide loopback hub.
    pub fn new() -> Self {
        Self::with_sink(LoopbackHub::global().sink())
    }

    pub fn with_sink(sink: Arc<dyn TransportSink>) -> Self {
        Self {
            targets: Mutex::new(Vec::new()),
            sink,
            stats: Arc::new(DropCounters::new()),
        }
    }

    /// Convenience: a sender over the process-wide hub with one target.
    pub fn with_target(signature: &str, target: SendTarget) -> Result<Self> {
        let sender = Self::new();
        sender.add_target(signature, target)?;
        Ok(sender)
    }

    /// Register a destination with its expected signature. The same address
    /// may repeat across distinct targets.
    pub fn add_target(&self, signature: &str, target: SendTarget) -> Result<()> {
        let signature = TypeSignature::parse(signature)?;
        self.targets.lock().push(DataTarget { signature, target });
        Ok(())
    }

    /// Remove every target registered under `address`.
    pub fn remove_target(&self, address: &str) -> Result<()> {
        let mut targets = self.targets.lock();
        let before = targets.len();
        targets.retain(|t| t.target.address != address);
        if targets.len() == before {
            return Err(Error::UnknownAddress(address.to_string()));
        }
        Ok(())
    }

    pub fn targets(&self) -> Vec<SendTarget> {
        self.targets.lock().iter().map(|t| t.target.clone()).collect()
    }

    /// Send to the targets registered under `address`. A signature mismatch
    /// aborts that send and is returned to the caller.
    pub fn send_to(&self, address: &str, values: &[ControlValue]) -> Result<()> {
        let targets = self.targets.lock();
        let matching: Vec<&DataTarget> = targets
            .iter()
            .filter(|t| t.target.address == address)
            .collect();
        if matching.is_empty() {
            return Err(Error::UnknownAddress(address.to_string()));
        }
        matching[0].signature.check(values).inspect_err(|_| {
            self.stats.record_signature_mismatch();
        })?;
        for entry in matching {
            if let Err(err) = entry.signature.check(values) {
                self.stats.record_signature_mismatch();
                warn!(target = %entry.target, %err, "send aborted by signature");
                continue;
            }
            self.transmit(entry, values);
        }
        Ok(())
    }

    /// Broadcast to every registered target. Each target's failure is
    /// reported independently; the fan-out continues. Returns how many
    /// targets were actually sent to.
    pub fn send_all(&self, values: &[ControlValue]) -> usize {
        let targets = self.targets.lock();
        let mut delivered = 0;
        for entry in targets.iter() {
            if let Err(err) = entry.signature.check(values) {
                self.stats.record_signature_mismatch();
                warn!(target = %entry.target, %err, "fan-out send skipped target");
                continue;
            }
            self.transmit(entry, values);
            delivered += 1;
        }
        delivered
    }

    fn transmit(&self, entry: &DataTarget, values: &[ControlValue]) {
        let msg = Message::new(entry.target.address.clone(), values.to_vec());
        if let Err(err) = self
            .sink
            .send(&entry.target.host, entry.target.port, msg)
        {
            // Best effort, fire-and-forget: log and move on.
            trace!(target = %entry.target, %err, "send failed");
        }
    }

    pub fn stats(&self) -> DropSnapshot {
        self.stats.snapshot()
    }
}

impl Default for DataSender {
    fn default() -> Self {
        Self::new()
    }
}
