//! Codec throughput: header decode and variant projection over one record.
//!
//! Plain harness; run with `cargo bench --bench codec_bench`.

use std::hint::black_box;
use std::time::Instant;

use zerocopy::AsBytes;

use tickgate::wire::{
    decode_header, pack_symbol, Message, MessageType, OrderBody, OrderSide, OrderType,
    TimeInForce,
};

const ITERATIONS: usize = 100_000_000;

fn order_record() -> Message {
    let body = OrderBody {
        symbol: pack_symbol("AAPL"),
        side: OrderSide::Buy as u8,
        order_type: OrderType::Limit as u8,
        time_in_force: TimeInForce::Day as u8,
        _pad0: [0; 5],
        order_id: 42,
        client_order_id: 42,
        quantity: 100,
        _pad1: [0; 4],
        price: 1_500_000,
        stop_price: 0,
    };
    let mut msg = Message::new(MessageType::OrderNew);
    msg.message_id = 42;
    msg.set_body(&body);
    msg
}

fn bench_decode_header() {
    let msg = order_record();
    let bytes = msg.as_bytes();
    let start = Instant::now();
    for _ in 0..ITERATIONS {
        black_box(decode_header(black_box(bytes)).expect("decode failed"));
    }
    let elapsed = start.elapsed();
    println!(
        "decode_header:      {:.2} ns/op",
        elapsed.as_nanos() as f64 / ITERATIONS as f64
    );
}

fn bench_variant_projection() {
    let msg = order_record();
    let start = Instant::now();
    for _ in 0..ITERATIONS {
        let view = black_box(&msg).order_body().expect("projection failed");
        black_box(view.price);
    }
    let elapsed = start.elapsed();
    println!(
        "order projection:   {:.2} ns/op",
        elapsed.as_nanos() as f64 / ITERATIONS as f64
    );
}

fn main() {
    println!("codec bench: {ITERATIONS} iterations");
    bench_decode_header();
    bench_variant_projection();
}
