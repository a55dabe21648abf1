//! OSC-style control bridge.
//!
//! Routes addressable, typed parameter updates between a message transport
//! and a block-based render consumer. The control path coalesces inbound
//! values into per-address slots sampled once per render block (stepped or
//! ramped); the data path delivers arbitrary typed tuples straight to a
//! handler. Senders push outgoing messages best-effort, independent of
//! block timing.
//!
//! Wire framing/encoding and the render graph itself live outside this
//! crate; see [`transport`] for the seam.

pub mod error;
pub use error::{Error, Result};

mod value;
pub use value::{ControlValue, Message, TypeSignature, TypeTag};

mod slot;

mod registry;

mod receiver;
pub use receiver::{ControlReceiver, ControlReceiverBuilder, SlotHandle, DEFAULT_VECTOR_WIDTH};

mod data;
pub use data::{DataHandler, DataReceiver, DataReceiverBuilder, DataSender};

mod sender;
pub use sender::{ControlSender, ControlSenderBuilder};

pub mod transport;
pub use transport::{LoopbackHub, SendTarget, TransportSink, DEFAULT_HOST};

mod stats;
pub use stats::{DropCounters, DropSnapshot};
