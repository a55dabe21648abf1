//! Integration tests for oscio.
//!
//! These exercise multi-component flows over the in-process loopback
//! transport: control receive with stepped and ramped sampling, typed data
//! round trips, dynamic reconfiguration, and teardown.

use oscio::transport::LoopbackHub;
use oscio::{
    ControlReceiver, ControlSender, ControlValue, DataReceiver, DataSender, Error, Message,
    SendTarget,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {what}");
}

/// Deliveries on one port are FIFO, so once a trailing sentinel message is
/// observable every earlier message has been routed into its slot.
fn sync_port(hub: &Arc<LoopbackHub>, port: u16, rx: &ControlReceiver, marker: f64) {
    let sink = hub.sink();
    sink.send(
        "127.0.0.1",
        port,
        Message::new("/sync", vec![ControlValue::Float64(marker)]),
    )
    .unwrap();
    wait_for("sync marker", || rx.sample("/sync").unwrap() == marker);
}

// ---------------------------------------------------------------------------
// 1. Control receive: exact step when interpolation is off, one-block ramp
//    when it is on
// ---------------------------------------------------------------------------

/// A value delivered before the block boundary is sampled exactly at the
/// boundary when interpolation is off.
#[test]
fn test_step_value_exact_at_block_boundary() {
    let hub = LoopbackHub::new();
    let rx = ControlReceiver::builder(9200)
        .address("/pitch")
        .address("/sync")
        .interpolate(false)
        .hub(Arc::clone(&hub))
        .build()
        .unwrap();

    hub.sink()
        .send(
            "127.0.0.1",
            9200,
            Message::new("/pitch", vec![ControlValue::Float64(261.63)]),
        )
        .unwrap();
    sync_port(&hub, 9200, &rx, 1.0);

    // Exactly the delivered value at the next block boundary.
    assert_eq!(rx.sample("/pitch").unwrap(), 261.63);
    assert_eq!(rx.get("/pitch").unwrap(), 261.63);
}

/// With interpolation on, the block ramps linearly and reaches the target
/// by its last sample.
#[test]
fn test_ramp_converges_linearly_by_block_end() {
    use approx::assert_relative_eq;

    let hub = LoopbackHub::new();
    let rx = ControlReceiver::builder(9201)
        .address("/amp")
        .address("/sync")
        .hub(Arc::clone(&hub))
        .build()
        .unwrap();

    hub.sink()
        .send(
            "127.0.0.1",
            9201,
            Message::new("/amp", vec![ControlValue::Float64(1.0)]),
        )
        .unwrap();
    sync_port(&hub, 9201, &rx, 1.0);

    // The block starts at the old value and reaches the target by its end.
    assert_eq!(rx.sample("/amp").unwrap(), 1.0);
    assert_eq!(rx.get("/amp").unwrap(), 0.0);

    let mut block = [0.0; 64];
    rx.ramp_into("/amp", 0, &mut block).unwrap();
    for (i, v) in block.iter().enumerate() {
        assert_relative_eq!(*v, (i + 1) as f64 / 64.0, epsilon = 1e-12);
    }
    assert_eq!(block[63], 1.0);
}

// ---------------------------------------------------------------------------
// 2. Coalescing: only the last value delivered within a block is observable
// ---------------------------------------------------------------------------

/// Two deliveries in one block: only the later value is ever observable.
#[test]
fn test_same_block_messages_coalesce_to_last() {
    let hub = LoopbackHub::new();
    let rx = ControlReceiver::builder(9202)
        .address("/x")
        .address("/sync")
        .interpolate(false)
        .hub(Arc::clone(&hub))
        .build()
        .unwrap();

    let sink = hub.sink();
    sink.send(
        "127.0.0.1",
        9202,
        Message::new("/x", vec![ControlValue::Float64(5.0)]),
    )
    .unwrap();
    sink.send(
        "127.0.0.1",
        9202,
        Message::new("/x", vec![ControlValue::Float64(7.0)]),
    )
    .unwrap();
    sync_port(&hub, 9202, &rx, 1.0);

    // 5.0 was overwritten before sampling and is never observable.
    assert_eq!(rx.get("/x").unwrap(), 0.0);
    assert_eq!(rx.sample("/x").unwrap(), 7.0);
    assert_eq!(rx.sample("/x").unwrap(), 7.0);
}

// ---------------------------------------------------------------------------
// 3. Vector receive: arity enforcement drops mismatched messages
// ---------------------------------------------------------------------------

/// A width-8 address given a 4-element message drops it and keeps the
/// prior window.
#[test]
fn test_vector_arity_mismatch_keeps_prior_value() {
    let hub = LoopbackHub::new();
    let rx = ControlReceiver::builder(9203)
        .vector_address("/spectrum", 8)
        .address("/sync")
        .interpolate(false)
        .hub(Arc::clone(&hub))
        .build()
        .unwrap();

    let sink = hub.sink();
    let full: Vec<ControlValue> = (0..8).map(|i| ControlValue::Float64(i as f64)).collect();
    sink.send("127.0.0.1", 9203, Message::new("/spectrum", full))
        .unwrap();
    sync_port(&hub, 9203, &rx, 1.0);

    let mut values = [0.0; 8];
    rx.sample_vector_into("/spectrum", &mut values).unwrap();
    assert_eq!(values[7], 7.0);

    // A 4-element message for a width-8 address is dropped.
    let short: Vec<ControlValue> = (0..4).map(|_| ControlValue::Float64(99.0)).collect();
    sink.send("127.0.0.1", 9203, Message::new("/spectrum", short))
        .unwrap();
    sync_port(&hub, 9203, &rx, 2.0);

    rx.sample_vector_into("/spectrum", &mut values).unwrap();
    assert_eq!(values[0], 0.0, "prior value must be unchanged");
    assert_eq!(values[7], 7.0);
    assert_eq!(rx.stats().arity_mismatch, 1);
}

// ---------------------------------------------------------------------------
// 4. Round trip: typed data sender -> receiver on one port
// ---------------------------------------------------------------------------

/// Sender and receiver paired on one port: the handler runs exactly once
/// with the identical ordered values.
#[test]
fn test_data_round_trip_fissif() {
    let hub = LoopbackHub::new();
    let calls: Arc<Mutex<Vec<(String, Vec<ControlValue>)>>> = Arc::new(Mutex::new(Vec::new()));
    let calls_in_handler = Arc::clone(&calls);

    let _rx = DataReceiver::builder(9204)
        .address("/t")
        .handler(move |address, args| {
            calls_in_handler
                .lock()
                .push((address.to_string(), args.to_vec()));
        })
        .hub(Arc::clone(&hub))
        .build()
        .unwrap();

    let tx = DataSender::with_sink(hub.sink());
    tx.add_target("fissif", SendTarget::new(9204, "/t")).unwrap();

    let payload = vec![
        ControlValue::from(3.14f32),
        ControlValue::from(1i32),
        ControlValue::from("a"),
        ControlValue::from("b"),
        ControlValue::from(2i32),
        ControlValue::from(6.0f32),
    ];
    tx.send_to("/t", &payload).unwrap();

    wait_for("handler call", || !calls.lock().is_empty());
    thread::sleep(Duration::from_millis(20));

    let calls = calls.lock();
    assert_eq!(calls.len(), 1, "handler must run exactly once");
    assert_eq!(calls[0].0, "/t");
    assert_eq!(calls[0].1, payload);
}

/// Broadcast sends reach every registered target independently.
#[test]
fn test_data_fan_out_reaches_every_bound_target() {
    let hub = LoopbackHub::new();
    let count_a = Arc::new(Mutex::new(0usize));
    let count_b = Arc::new(Mutex::new(0usize));

    let in_a = Arc::clone(&count_a);
    let _rx_a = DataReceiver::builder(9205)
        .address("/broadcast")
        .handler(move |_, _| *in_a.lock() += 1)
        .hub(Arc::clone(&hub))
        .build()
        .unwrap();

    let in_b = Arc::clone(&count_b);
    let _rx_b = DataReceiver::builder(9206)
        .address("/broadcast")
        .handler(move |_, _| *in_b.lock() += 1)
        .hub(Arc::clone(&hub))
        .build()
        .unwrap();

    let tx = DataSender::with_sink(hub.sink());
    tx.add_target("i", SendTarget::new(9205, "/broadcast")).unwrap();
    tx.add_target("i", SendTarget::new(9206, "/broadcast")).unwrap();

    let delivered = tx.send_all(&[ControlValue::from(1i32)]);
    assert_eq!(delivered, 2);

    wait_for("both handlers", || {
        *count_a.lock() == 1 && *count_b.lock() == 1
    });
}

// ---------------------------------------------------------------------------
// 5. Control send -> control receive round trip
// ---------------------------------------------------------------------------

/// One tick per block on the send side lands as one slot update on the
/// receive side.
#[test]
fn test_block_rate_send_reaches_receiver() {
    let hub = LoopbackHub::new();
    let rx = ControlReceiver::builder(9207)
        .address("/pitch")
        .interpolate(false)
        .hub(Arc::clone(&hub))
        .build()
        .unwrap();

    let tx = ControlSender::builder()
        .target(9207, "/pitch")
        .sink(hub.sink())
        .build()
        .unwrap();

    assert!(tx.tick(&[440.0]));
    wait_for("value sampled", || rx.sample("/pitch").unwrap() == 440.0);
}

// ---------------------------------------------------------------------------
// 6. Dynamic reconfiguration: removal drops, re-add starts fresh
// ---------------------------------------------------------------------------

/// Removal drops in-flight messages without resurrecting the slot; a
/// re-added address is live for future messages only.
#[test]
fn test_del_address_drops_then_re_add_goes_live() {
    let hub = LoopbackHub::new();
    let rx = ControlReceiver::builder(9208)
        .address("/x")
        .address("/sync")
        .interpolate(false)
        .hub(Arc::clone(&hub))
        .build()
        .unwrap();
    let sink = hub.sink();

    sink.send(
        "127.0.0.1",
        9208,
        Message::new("/x", vec![ControlValue::Float64(3.0)]),
    )
    .unwrap();
    sync_port(&hub, 9208, &rx, 1.0);
    assert_eq!(rx.sample("/x").unwrap(), 3.0);

    rx.del_address("/x").unwrap();

    // A message right after removal is dropped, not resurrected.
    sink.send(
        "127.0.0.1",
        9208,
        Message::new("/x", vec![ControlValue::Float64(9.0)]),
    )
    .unwrap();
    sync_port(&hub, 9208, &rx, 2.0);
    assert!(matches!(rx.sample("/x"), Err(Error::UnknownAddress(_))));
    assert_eq!(rx.stats().unknown_address, 1);

    // Re-adding makes the address live for future messages only.
    rx.add_address("/x").unwrap();
    assert_eq!(rx.get("/x").unwrap(), 0.0);

    sink.send(
        "127.0.0.1",
        9208,
        Message::new("/x", vec![ControlValue::Float64(4.0)]),
    )
    .unwrap();
    sync_port(&hub, 9208, &rx, 3.0);
    assert_eq!(rx.sample("/x").unwrap(), 4.0);
}

// ---------------------------------------------------------------------------
// 7. Teardown: no delivery once close has returned
// ---------------------------------------------------------------------------

/// Close while messages are in flight: the drain is bounded and nothing is
/// dispatched after close returns.
#[test]
fn test_closed_receiver_sees_no_further_handler_calls() {
    let hub = LoopbackHub::new();
    let count = Arc::new(Mutex::new(0usize));
    let count_in_handler = Arc::clone(&count);

    let rx = DataReceiver::builder(9209)
        .address("/t")
        .handler(move |_, _| {
            thread::sleep(Duration::from_millis(2));
            *count_in_handler.lock() += 1;
        })
        .hub(Arc::clone(&hub))
        .build()
        .unwrap();

    let sink = hub.sink();
    for i in 0..50 {
        sink.send(
            "127.0.0.1",
            9209,
            Message::new("/t", vec![ControlValue::from(i as i32)]),
        )
        .unwrap();
    }

    // Close while messages are still in flight; the drain is bounded and
    // nothing is dispatched after close returns.
    rx.close();
    let at_close = *count.lock();

    sink.send("127.0.0.1", 9209, Message::new("/t", vec![]))
        .unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(*count.lock(), at_close);
    assert!(at_close < 50, "close should not wait for the whole backlog");
}

/// A closed control receiver keeps its last sampled state and frees the
/// port for a new listener.
#[test]
fn test_closed_control_receiver_keeps_last_values() {
    let hub = LoopbackHub::new();
    let rx = ControlReceiver::builder(9210)
        .address("/x")
        .address("/sync")
        .interpolate(false)
        .hub(Arc::clone(&hub))
        .build()
        .unwrap();

    hub.sink()
        .send(
            "127.0.0.1",
            9210,
            Message::new("/x", vec![ControlValue::Float64(2.5)]),
        )
        .unwrap();
    sync_port(&hub, 9210, &rx, 1.0);
    assert_eq!(rx.sample("/x").unwrap(), 2.5);

    rx.close();

    // Post-close messages go nowhere; sampling still reads the last state.
    hub.sink()
        .send(
            "127.0.0.1",
            9210,
            Message::new("/x", vec![ControlValue::Float64(99.0)]),
        )
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(rx.sample("/x").unwrap(), 2.5);

    // The port is free for a new listener.
    let rebound = ControlReceiver::builder(9210)
        .address("/x")
        .hub(hub)
        .build()
        .unwrap();
    assert_eq!(rebound.port(), 9210);
}

// ---------------------------------------------------------------------------
// 8. Mixed numeric tags on the control path
// ---------------------------------------------------------------------------

/// Int and float tags all feed a control slot; strings drop the message.
#[test]
fn test_any_numeric_tag_feeds_a_control_slot() {
    let hub = LoopbackHub::new();
    let rx = ControlReceiver::builder(9211)
        .address("/x")
        .address("/sync")
        .interpolate(false)
        .hub(Arc::clone(&hub))
        .build()
        .unwrap();
    let sink = hub.sink();

    for (value, expected) in [
        (ControlValue::Int32(3), 3.0),
        (ControlValue::Int64(4), 4.0),
        (ControlValue::Float32(2.5), 2.5),
        (ControlValue::Float64(0.125), 0.125),
    ] {
        sink.send("127.0.0.1", 9211, Message::new("/x", vec![value]))
            .unwrap();
        sync_port(&hub, 9211, &rx, expected);
        assert_eq!(rx.sample("/x").unwrap(), expected);
    }

    // Strings do not coerce; the message drops and the value stands.
    sink.send(
        "127.0.0.1",
        9211,
        Message::new("/x", vec![ControlValue::from("loud")]),
    )
    .unwrap();
    sync_port(&hub, 9211, &rx, 42.0);
    assert_eq!(rx.sample("/x").unwrap(), 0.125);
    assert_eq!(rx.stats().non_numeric, 1);
}

// ---------------------------------------------------------------------------
// 9. Render-style sampling through pre-resolved handles
// ---------------------------------------------------------------------------

/// Pre-resolved handles sample without per-block lookups, the shape a
/// render callback uses.
#[test]
fn test_handles_sample_without_lookup() {
    let hub = LoopbackHub::new();
    let rx = ControlReceiver::builder(9212)
        .address("/pitch")
        .vector_address("/partials", 4)
        .address("/sync")
        .interpolate(false)
        .hub(Arc::clone(&hub))
        .build()
        .unwrap();

    let pitch = rx.handle("/pitch").unwrap();
    let partials = rx.handle("/partials").unwrap();
    assert_eq!(partials.width(), 4);

    hub.sink()
        .send(
            "127.0.0.1",
            9212,
            Message::new("/pitch", vec![ControlValue::Float64(440.0)]),
        )
        .unwrap();
    hub.sink()
        .send(
            "127.0.0.1",
            9212,
            Message::new(
                "/partials",
                (1..=4).map(|i| ControlValue::Float64(i as f64)).collect(),
            ),
        )
        .unwrap();
    sync_port(&hub, 9212, &rx, 1.0);

    // Simulated render callback: fixed buffers, no lookups, no errors.
    assert_eq!(pitch.sample(), 440.0);
    let mut out = [0.0; 4];
    partials.sample_into(&mut out);
    assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
}
