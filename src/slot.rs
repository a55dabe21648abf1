//! Per-address control slot: pending-value handoff plus ramp state machine.
//!
//! The network context overwrites the pending target (last writer wins, no
//! queueing); the render context consumes it once per block. A slot is either
//! steady (previous == target) or ramping linearly from previous to target
//! across exactly one render block.

use crate::error::{Error, Result};
use crate::value::ControlValue;
use parking_lot::Mutex;
use smallvec::{smallvec, SmallVec};

pub(crate) type ValueVec = SmallVec<[f64; 4]>;

pub(crate) struct SlotState {
    address: String,
    width: usize,
    mul: f64,
    add: f64,
    /// Written by the network context, consumed at block start by the render
    /// context. The lock is held only for the single read or write.
    pending: Mutex<Option<ValueVec>>,
    ramp: Mutex<Ramp>,
}

struct Ramp {
    /// Block-start values (raw, unscaled).
    previous: ValueVec,
    /// Block-end values (raw, unscaled).
    target: ValueVec,
    ramping: bool,
}

impl SlotState {
    pub(crate) fn new(address: impl Into<String>, width: usize, mul: f64, add: f64) -> Self {
        Self {
            address: address.into(),
            width,
            mul,
            add,
            pending: Mutex::new(None),
            ramp: Mutex::new(Ramp {
                previous: smallvec![0.0; width],
                target: smallvec![0.0; width],
                ramping: false,
            }),
        }
    }

    pub(crate) fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn width(&self) -> usize {
        self.width
    }

    #[inline]
    fn scale(&self, v: f64) -> f64 {
        v * self.mul + self.add
    }

    /// Accept a typed message for this slot. Arity must equal the width and
    /// every argument must coerce to a number; otherwise the message is
    /// rejected and the slot is unchanged.
    pub(crate) fn offer(&self, args: &[ControlValue]) -> Result<()> {
        if args.len() != self.width {
            return Err(Error::ArityMismatch {
                expected: self.width,
                got: args.len(),
            });
        }
        let mut values: ValueVec = SmallVec::with_capacity(self.width);
        for (position, arg) in args.iter().enumerate() {
            match arg.as_f64() {
                Some(v) => values.push(v),
                None => {
                    return Err(Error::SignatureMismatch {
                        position,
                        expected: 'f',
                        got: arg.tag().as_char(),
                    })
                }
            }
        }
        *self.pending.lock() = Some(values);
        Ok(())
    }

    /// Programmatic update, identical semantics to a network arrival.
    pub(crate) fn offer_f64(&self, values: &[f64]) -> Result<()> {
        if values.len() != self.width {
            return Err(Error::ArityMismatch {
                expected: self.width,
                got: values.len(),
            });
        }
        *self.pending.lock() = Some(SmallVec::from_slice(values));
        Ok(())
    }

    /// Render context, once per block. Consumes the pending target and
    /// performs the block-boundary transition: with interpolation on, a new
    /// target starts a one-block linear ramp from the last sampled value;
    /// with it off, the slot jumps immediately. Without a new target any
    /// active ramp completes and the slot settles steady.
    pub(crate) fn begin_block(&self, interpolate: bool) {
        let incoming = self.pending.lock().take();
        let mut guard = self.ramp.lock();
        let ramp = &mut *guard;
        match incoming {
            Some(values) => {
                if interpolate {
                    // Last sampled value is the completed previous target.
                    std::mem::swap(&mut ramp.previous, &mut ramp.target);
                    ramp.target = values;
                    ramp.ramping = true;
                } else {
                    ramp.previous = values.clone();
                    ramp.target = values;
                    ramp.ramping = false;
                }
            }
            None => {
                if ramp.ramping {
                    let target = ramp.target.clone();
                    ramp.previous = target;
                    ramp.ramping = false;
                }
            }
        }
    }

    /// Value at block end for one channel.
    pub(crate) fn end_value(&self, offset: usize) -> f64 {
        debug_assert!(offset < self.width);
        let ramp = self.ramp.lock();
        self.scale(ramp.target[offset])
    }

    /// Block-end values for every channel.
    pub(crate) fn end_values_into(&self, out: &mut [f64]) {
        let ramp = self.ramp.lock();
        for (dst, src) in out.iter_mut().zip(ramp.target.iter()) {
            *dst = self.scale(*src);
        }
    }

    /// Per-sample linear ramp of the current block for one channel. The ramp
    /// increment is `1 / out.len()`, so a changed block size is picked up on
    /// the next call. Does not advance slot state; call after `begin_block`.
    pub(crate) fn ramp_into(&self, offset: usize, out: &mut [f64]) {
        debug_assert!(offset < self.width);
        let n = out.len();
        if n == 0 {
            return;
        }
        let ramp = self.ramp.lock();
        let start = ramp.previous[offset];
        let end = ramp.target[offset];
        drop(ramp);
        if start == end {
            out.fill(self.scale(end));
            return;
        }
        let inc = 1.0 / n as f64;
        for (i, dst) in out.iter_mut().enumerate() {
            let frac = (i + 1) as f64 * inc;
            *dst = self.scale(start + (end - start) * frac);
        }
    }

    /// Pure peek of the block-start value for one channel. Never mutates
    /// ramp state, usable from any context.
    pub(crate) fn peek(&self, offset: usize) -> f64 {
        debug_assert!(offset < self.width);
        let ramp = self.ramp.lock();
        self.scale(ramp.previous[offset])
    }

    /// Pure peek of all block-start values.
    pub(crate) fn peek_into(&self, out: &mut [f64]) {
        let ramp = self.ramp.lock();
        for (dst, src) in out.iter_mut().zip(ramp.previous.iter()) {
            *dst = self.scale(*src);
        }
    }
}

impl std::fmt::Debug for SlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotState")
            .field("address", &self.address)
            .field("width", &self.width)
            .finish()
    }
}
