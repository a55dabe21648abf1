//! End-to-end tour of the control bridge over the loopback transport:
//! block-rate control values, a typed data channel, and drop counters.

use oscio::transport::LoopbackHub;
use oscio::{ControlReceiver, ControlSender, ControlValue, DataReceiver, DataSender, SendTarget};
use std::thread;
use std::time::Duration;

fn main() -> oscio::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let hub = LoopbackHub::new();

    // Control path: /pitch and /amp sampled once per render block.
    let receiver = ControlReceiver::builder(9000)
        .address("/pitch")
        .address("/amp")
        .hub(hub.clone())
        .build()?;

    let sender = ControlSender::builder()
        .target(9000, "/pitch")
        .target(9000, "/amp")
        .sink(hub.sink())
        .build()?;

    sender.tick(&[440.0, 0.8]);
    thread::sleep(Duration::from_millis(20));

    // One "render block": sample the end values, then read the ramp shape.
    let pitch = receiver.sample("/pitch")?;
    let amp = receiver.sample("/amp")?;
    println!("block end: pitch = {pitch} Hz, amp = {amp}");

    let mut ramp = [0.0; 16];
    receiver.ramp_into("/amp", 0, &mut ramp)?;
    println!("amp ramp over the block: {ramp:?}");

    // Data path: arbitrary typed tuples straight to a handler.
    let data_rx = DataReceiver::builder(9001)
        .address("/note")
        .handler(|address, args| {
            println!("data message at {address}: {args:?}");
        })
        .hub(hub.clone())
        .build()?;

    let data_tx = DataSender::with_sink(hub.sink());
    data_tx.add_target("sif", SendTarget::new(9001, "/note"))?;
    data_tx.send_to(
        "/note",
        &[
            ControlValue::from("pluck"),
            ControlValue::from(60i32),
            ControlValue::from(0.9f32),
        ],
    )?;
    thread::sleep(Duration::from_millis(20));

    // A message for an unregistered address is dropped, visible in the stats.
    hub.sink().send(
        "127.0.0.1",
        9000,
        oscio::Message::new("/unknown", vec![ControlValue::from(1i32)]),
    )?;
    thread::sleep(Duration::from_millis(20));
    println!("receiver drops: {:?}", receiver.stats());

    data_rx.close();
    receiver.close();
    Ok(())
}
