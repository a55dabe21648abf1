//! In-process loopback transport.
//!
//! A process-local port table stands in for the network: binding a port
//! spawns a dedicated delivery thread (the "network context"), and the hub's
//! sink routes outgoing messages to whichever listener holds the destination
//! port. Unbound destinations drop the message, matching the fire-and-forget
//! protocol.

use crate::error::{Error, Result};
use crate::transport::TransportSink;
use crate::value::Message;
use crossbeam_channel::{bounded, Receiver, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

const PORT_FIFO_SIZE: usize = 1024;

pub(crate) type Dispatcher = Arc<dyn Fn(Message) + Send + Sync>;

struct PortEntry {
    tx: Sender<Message>,
    open: Arc<AtomicBool>,
}

/// Process-local port table. Exactly one listener per port; sends to unbound
/// ports are dropped.
#[derive(Default)]
pub struct LoopbackHub {
    ports: DashMap<u16, PortEntry>,
}

impl LoopbackHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The shared process-wide hub, the loopback analogue of the OS port
    /// space. Receivers and senders use it unless built with an explicit hub.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<LoopbackHub>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(LoopbackHub::new))
    }

    /// Acquire the listener for `port`. The dispatcher runs on a dedicated
    /// delivery thread until the binding is closed.
    pub(crate) fn bind(self: &Arc<Self>, port: u16, dispatcher: Dispatcher) -> Result<PortBinding> {
        let (tx, rx) = bounded(PORT_FIFO_SIZE);
        let open = Arc::new(AtomicBool::new(true));

        match self.ports.entry(port) {
            Entry::Occupied(_) => return Err(Error::PortInUse(port)),
            Entry::Vacant(vacant) => {
                vacant.insert(PortEntry {
                    tx,
                    open: Arc::clone(&open),
                });
            }
        }

        let thread_open = Arc::clone(&open);
        let join = thread::Builder::new()
            .name(format!("osc-recv-{port}"))
            .spawn(move || delivery_loop(rx, thread_open, dispatcher))
            .map_err(|e| {
                self.ports.remove(&port);
                Error::InvalidConfig(format!("failed to spawn delivery thread: {e}"))
            })?;

        debug!(port, "bound loopback listener");
        Ok(PortBinding {
            port,
            hub: Arc::clone(self),
            open,
            join: Some(join),
        })
    }

    /// Sending side of this hub.
    pub fn sink(self: &Arc<Self>) -> Arc<dyn TransportSink> {
        Arc::new(LoopbackSink {
            hub: Arc::clone(self),
        })
    }

    fn route(&self, port: u16, msg: Message) {
        let Some(entry) = self.ports.get(&port) else {
            trace!(port, address = %msg.address, "dropped message for unbound port");
            return;
        };
        if !entry.open.load(Ordering::Acquire) {
            return;
        }
        if entry.tx.try_send(msg).is_err() {
            trace!(port, "listener queue full, message dropped");
        }
    }
}

fn delivery_loop(rx: Receiver<Message>, open: Arc<AtomicBool>, dispatcher: Dispatcher) {
    loop {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(msg) => {
                if !open.load(Ordering::Acquire) {
                    break;
                }
                dispatcher(msg);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if !open.load(Ordering::Acquire) {
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
    // Drain whatever is still queued without dispatching; the binding is
    // closed and removed slots must see no further delivery.
    while rx.try_recv().is_ok() {}
}

struct LoopbackSink {
    hub: Arc<LoopbackHub>,
}

impl TransportSink for LoopbackSink {
    fn send(&self, _host: &str, port: u16, msg: Message) -> Result<()> {
        self.hub.route(port, msg);
        Ok(())
    }
}

/// An exclusive claim on one port plus its delivery thread. Closing (or
/// dropping) releases the port and joins the thread; once `close` returns no
/// dispatcher invocation can follow.
pub(crate) struct PortBinding {
    port: u16,
    hub: Arc<LoopbackHub>,
    open: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl PortBinding {
    pub(crate) fn close(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        self.open.store(false, Ordering::Release);
        // Dropping the entry drops the map's sender, which wakes the
        // delivery thread if it is blocked on an empty queue.
        self.hub.ports.remove(&self.port);
        let _ = join.join();
        debug!(port = self.port, "closed loopback listener");
    }
}

impl Drop for PortBinding {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ControlValue;
    use parking_lot::Mutex;

    fn collector() -> (Dispatcher, Arc<Mutex<Vec<Message>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let dispatcher: Dispatcher = Arc::new(move |msg| sink.lock().push(msg));
        (dispatcher, seen)
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_bind_send_receive() {
        let hub = LoopbackHub::new();
        let (dispatcher, seen) = collector();
        let _binding = hub.bind(7001, dispatcher).unwrap();

        let sink = hub.sink();
        sink.send(
            "127.0.0.1",
            7001,
            Message::new("/pitch", vec![ControlValue::Float64(440.0)]),
        )
        .unwrap();

        wait_for(|| !seen.lock().is_empty());
        let messages = seen.lock();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].address, "/pitch");
    }

    #[test]
    fn test_second_bind_fails() {
        let hub = LoopbackHub::new();
        let (dispatcher, _) = collector();
        let _binding = hub.bind(7002, Arc::clone(&dispatcher)).unwrap();

        let err = hub.bind(7002, dispatcher).unwrap_err();
        assert!(matches!(err, Error::PortInUse(7002)));
    }

    #[test]
    fn test_port_released_after_close() {
        let hub = LoopbackHub::new();
        let (dispatcher, _) = collector();
        let mut binding = hub.bind(7003, Arc::clone(&dispatcher)).unwrap();
        binding.close();

        // Rebinding the freed port succeeds.
        let _rebound = hub.bind(7003, dispatcher).unwrap();
    }

    #[test]
    fn test_send_to_unbound_port_is_dropped() {
        let hub = LoopbackHub::new();
        let sink = hub.sink();
        // Fire-and-forget: no error, nothing delivered.
        sink.send("127.0.0.1", 7999, Message::new("/x", vec![])).unwrap();
    }

    #[test]
    fn test_no_dispatch_after_close() {
        let hub = LoopbackHub::new();
        let (dispatcher, seen) = collector();
        let mut binding = hub.bind(7004, dispatcher).unwrap();
        let sink = hub.sink();

        sink.send("127.0.0.1", 7004, Message::new("/a", vec![])).unwrap();
        wait_for(|| !seen.lock().is_empty());

        binding.close();
        let count_at_close = seen.lock().len();

        sink.send("127.0.0.1", 7004, Message::new("/b", vec![])).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(seen.lock().len(), count_at_close);
    }
}
