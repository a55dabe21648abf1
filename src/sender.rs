//! Block-rate control sender.
//!
//! The render context hands over one value per target channel per block; a
//! dedicated thread owns the transport handle and performs the actual sends.
//! The handoff is a bounded channel with `try_send`, so the render side
//! never blocks; overflow drops the block's values and counts the drop.

use crate::error::{Error, Result};
use crate::stats::{DropCounters, DropSnapshot};
use crate::transport::{LoopbackHub, SendTarget, TransportSink};
use crate::value::{ControlValue, Message};
use crossbeam_channel::{bounded, Receiver, Sender};
use smallvec::SmallVec;
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace};

const SEND_FIFO_SIZE: usize = 1024;

type BlockValues = SmallVec<[f64; 8]>;

enum SendCommand {
    Block(BlockValues),
    Shutdown,
}

pub struct ControlSenderBuilder {
    targets: Vec<(SendTarget, usize)>,
    sink: Option<Arc<dyn TransportSink>>,
}

impl ControlSenderBuilder {
    fn new() -> Self {
        Self {
            targets: Vec::new(),
            sink: None,
        }
    }

    /// Scalar target on the local loopback host.
    pub fn target(self, port: u16, address: impl Into<String>) -> Self {
        self.target_to(SendTarget::new(port, address), 1)
    }

    /// Scalar target on an explicit host.
    pub fn target_at(self, host: impl Into<String>, port: u16, address: impl Into<String>) -> Self {
        self.target_to(SendTarget::with_host(host, port, address), 1)
    }

    /// Fixed-width vector target; consumes `width` consecutive values from
    /// each tick.
    pub fn vector_target(self, port: u16, address: impl Into<String>, width: usize) -> Self {
        self.target_to(SendTarget::new(port, address), width)
    }

    pub fn target_to(mut self, target: SendTarget, width: usize) -> Self {
        self.targets.push((target, width));
        self
    }

    pub fn sink(mut self, sink: Arc<dyn TransportSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<ControlSender> {
        if self.targets.is_empty() {
            return Err(Error::InvalidConfig("control sender needs a target".into()));
        }
        if let Some((target, _)) = self.targets.iter().find(|(_, width)| *width == 0) {
            return Err(Error::InvalidConfig(format!(
                "target {target} registered with width 0"
            )));
        }
        let sink = self.sink.unwrap_or_else(|| LoopbackHub::global().sink());
        let total_width = self.targets.iter().map(|(_, w)| w).sum();

        let (tx, rx) = bounded(SEND_FIFO_SIZE);
        let targets = self.targets;
        thread::Builder::new()
            .name("osc-send".to_string())
            .spawn(move || send_loop(rx, targets, sink))
            .map_err(|e| Error::InvalidConfig(format!("failed to spawn send thread: {e}")))?;

        Ok(ControlSender {
            tx,
            total_width,
            stats: Arc::new(DropCounters::new()),
        })
    }
}

fn send_loop(rx: Receiver<SendCommand>, targets: Vec<(SendTarget, usize)>, sink: Arc<dyn TransportSink>) {
    loop {
        match rx.recv() {
            Ok(SendCommand::Block(values)) => {
                let mut base = 0;
                for (target, width) in &targets {
                    let args = values[base..base + width]
                        .iter()
                        .map(|&v| ControlValue::Float32(v as f32))
                        .collect();
                    base += width;
                    let msg = Message::new(target.address.clone(), args);
                    if let Err(err) = sink.send(&target.host, target.port, msg) {
                        trace!(%target, %err, "control send failed");
                    }
                }
            }
            Ok(SendCommand::Shutdown) | Err(_) => break,
        }
    }
    debug!("control send thread stopped");
}

/// Send-side control object. Targets are fixed at construction; values flow
/// once per render block.
pub struct ControlSender {
    tx: Sender<SendCommand>,
    total_width: usize,
    stats: Arc<DropCounters>,
}

impl ControlSender {
    pub fn builder() -> ControlSenderBuilder {
        ControlSenderBuilder::new()
    }

    /// Total number of values one tick consumes (sum of target widths).
    pub fn width(&self) -> usize {
        self.total_width
    }

    /// Push this block's values, one per target channel in registration
    /// order. Never blocks; returns `false` if the values were dropped
    /// (wrong count, full queue, or sender closed).
    pub fn tick(&self, values: &[f64]) -> bool {
        if values.len() != self.total_width {
            self.stats.record_arity_mismatch();
            return false;
        }
        let block: BlockValues = SmallVec::from_slice(values);
        match self.tx.try_send(SendCommand::Block(block)) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => {
                self.stats.record_send_overflow();
                false
            }
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn stats(&self) -> DropSnapshot {
        self.stats.snapshot()
    }

    /// Stop the send thread. Values already queued are still transmitted.
    pub fn close(&self) {
        let _ = self.tx.send(SendCommand::Shutdown);
    }
}

impl Drop for ControlSender {
    fn drop(&mut self) {
        let _ = self.tx.send(SendCommand::Shutdown);
    }
}
