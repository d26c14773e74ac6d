use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use zerocopy::{AsBytes, FromBytes};

use tickgate::wire::{
    pack_symbol, MarketDataBody, Message, MessageStatus, MessageType, OrderBody, OrderSide,
    OrderType, TimeInForce, WIRE_SIZE,
};

const SYMBOLS: [&str; 5] = ["AAPL", "GOOGL", "MSFT", "TSLA", "AMZN"];

#[derive(Parser)]
#[command(about = "Test client for the tickgate message server")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = 8888)]
    port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Send one order and one market data update, verify the order ack (default)
    Smoke,
    /// Send a back-to-back burst of orders and read every ack
    Burst {
        /// Number of orders
        #[arg(short, long, default_value_t = 1000)]
        count: usize,
    },
    /// Sustained load with per-request latency measurement
    Sustain {
        /// Number of concurrent connections
        #[arg(short, long, default_value_t = 4)]
        connections: usize,
        /// In-flight orders per connection (pipeline window)
        #[arg(short, long, default_value_t = 64)]
        window: usize,
        /// Warmup duration in seconds (discarded from report)
        #[arg(short = 'W', long, default_value_t = 3)]
        warmup: u64,
        /// Measurement duration in seconds
        #[arg(short, long, default_value_t = 10)]
        duration: u64,
    },
}

fn build_order(message_id: u64, index: usize) -> Message {
    let side = if index % 2 == 0 {
        OrderSide::Buy
    } else {
        OrderSide::Sell
    };
    let body = OrderBody {
        symbol: pack_symbol(SYMBOLS[index % SYMBOLS.len()]),
        side: side as u8,
        order_type: OrderType::Limit as u8,
        time_in_force: TimeInForce::Day as u8,
        _pad0: [0; 5],
        order_id: message_id,
        client_order_id: message_id,
        quantity: 100,
        _pad1: [0; 4],
        price: 1_500_000 + (index as u64 % 100),
        stop_price: 0,
    };
    let mut msg = Message::new(MessageType::OrderNew);
    msg.message_id = message_id;
    msg.sequence_number = message_id as u32;
    msg.set_body(&body);
    msg
}

fn build_market_data(message_id: u64, symbol: &str, bid: u64, ask: u64) -> Message {
    let body = MarketDataBody {
        symbol: pack_symbol(symbol),
        bid_price: bid,
        ask_price: ask,
        last_price: bid,
        high_price: ask,
        low_price: bid,
        volume: 1_000,
        bid_size: 500,
        ask_size: 500,
        last_size: 100,
        _pad0: [0; 4],
    };
    let mut msg = Message::new(MessageType::MarketData);
    msg.message_id = message_id;
    msg.set_body(&body);
    msg
}

fn send_record(stream: &mut TcpStream, msg: &Message) {
    stream.write_all(msg.as_bytes()).expect("failed to write record");
}

fn read_record(stream: &mut TcpStream) -> Message {
    let mut buf = [0u8; WIRE_SIZE];
    stream.read_exact(&mut buf).expect("failed to read record");
    Message::read_from(&buf[..]).expect("record decode failed")
}

fn main() {
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    match args.command.unwrap_or(Command::Smoke) {
        Command::Smoke => smoke_test(&addr),
        Command::Burst { count } => burst_test(&addr, count),
        Command::Sustain {
            connections,
            window,
            warmup,
            duration,
        } => sustain_test(&addr, connections, window, warmup, duration),
    }
}

fn smoke_test(addr: &str) {
    eprintln!("smoke test: connecting to {}", addr);
    let mut stream = TcpStream::connect(addr).expect("failed to connect");
    stream.set_nodelay(true).expect("nodelay");

    let order = build_order(1, 0);
    send_record(&mut stream, &order);
    let ack = read_record(&mut stream);
    assert_eq!(
        ack.message_id, order.message_id,
        "ack message_id mismatch (protocol error or reordering)"
    );
    assert_eq!(ack.status, MessageStatus::Processed as u8);
    eprintln!("  order ack: OK (message_id={})", ack.message_id);

    send_record(&mut stream, &build_market_data(2, "GOOGL", 2_800_000, 2_800_100));
    eprintln!("  market data sent");

    let mut heartbeat = Message::new(MessageType::Heartbeat);
    heartbeat.message_id = 3;
    send_record(&mut stream, &heartbeat);
    eprintln!("  heartbeat sent");

    eprintln!("smoke test: PASSED");
}

fn burst_test(addr: &str, count: usize) {
    eprintln!("burst test: sending {} orders to {}", count, addr);
    let mut stream = TcpStream::connect(addr).expect("failed to connect");
    stream.set_nodelay(true).expect("nodelay");

    let start = Instant::now();

    let mut writer = stream.try_clone().expect("clone failed");
    let write_handle = std::thread::spawn(move || {
        for i in 0..count {
            send_record(&mut writer, &build_order(i as u64 + 1, i));
        }
    });

    for i in 0..count {
        let ack = read_record(&mut stream);
        assert_eq!(
            ack.message_id,
            i as u64 + 1,
            "ack {} out of order",
            i
        );
        assert_eq!(ack.status, MessageStatus::Processed as u8);
    }
    write_handle.join().expect("writer panicked");

    let elapsed = start.elapsed();
    eprintln!(
        "burst test: PASSED ({} orders in {:.2}s = {:.0} msg/s)",
        count,
        elapsed.as_secs_f64(),
        count as f64 / elapsed.as_secs_f64()
    );
}

fn percentile(sorted: &[u64], p: f64) -> f64 {
    let i = ((p / 100.0) * sorted.len() as f64) as usize;
    sorted[i.min(sorted.len() - 1)] as f64 / 1_000.0
}

fn print_interval(samples: &mut [u64], elapsed: Duration) {
    samples.sort_unstable();
    let n = samples.len();
    let qps = n as f64 / elapsed.as_secs_f64();
    eprintln!(
        "{:>10.0}  {:>8.1}µs  {:>8.1}µs  {:>8.1}µs  {:>8.1}µs  {:>8}",
        qps,
        percentile(samples, 50.0),
        percentile(samples, 95.0),
        percentile(samples, 99.0),
        percentile(samples, 99.9),
        n,
    );
}

fn sustain_test(addr: &str, num_connections: usize, window: usize, warmup_secs: u64, duration_secs: u64) {
    eprintln!(
        "sustain: {} connections, window={}, warmup={}s, duration={}s → {}",
        num_connections, window, warmup_secs, duration_secs, addr
    );

    let (tx, rx) = mpsc::channel::<u64>();

    for c in 0..num_connections {
        let addr = addr.to_string();
        let tx = tx.clone();
        std::thread::spawn(move || {
            let mut stream = TcpStream::connect(&addr).expect("failed to connect");
            stream.set_nodelay(true).expect("nodelay");
            let mut in_flight: VecDeque<Instant> = VecDeque::with_capacity(window);
            let mut next_id = (c as u64) << 32;

            loop {
                while in_flight.len() < window {
                    next_id += 1;
                    send_record(&mut stream, &build_order(next_id, next_id as usize));
                    in_flight.push_back(Instant::now());
                }
                let ack = read_record(&mut stream);
                assert_eq!(ack.status, MessageStatus::Processed as u8);
                let sent_at = in_flight.pop_front().expect("window underflow");
                if tx.send(sent_at.elapsed().as_nanos() as u64).is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    if warmup_secs > 0 {
        eprint!("warming up ({warmup_secs}s)");
        let warmup_end = Instant::now() + Duration::from_secs(warmup_secs);
        while Instant::now() < warmup_end {
            while rx.try_recv().is_ok() {}
            std::thread::sleep(Duration::from_millis(100));
            eprint!(".");
        }
        eprintln!(" ready");
    }

    eprintln!(
        "{:>10}  {:>9}  {:>9}  {:>9}  {:>9}  {:>8}",
        "qps", "p50", "p95", "p99", "p99.9", "n"
    );

    let measure_start = Instant::now();
    let measure_end = measure_start + Duration::from_secs(duration_secs);
    let mut all_samples: Vec<u64> = Vec::new();
    let mut interval_samples: Vec<u64> = Vec::new();
    let mut last_print = Instant::now();

    loop {
        let now = Instant::now();
        if now >= measure_end {
            break;
        }
        let timeout = (measure_end - now).min(Duration::from_millis(100));
        match rx.recv_timeout(timeout) {
            Ok(ns) => {
                interval_samples.push(ns);
                all_samples.push(ns);
                while let Ok(ns) = rx.try_recv() {
                    interval_samples.push(ns);
                    all_samples.push(ns);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                eprintln!("error: all worker connections died — is the server running?");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        if last_print.elapsed() >= Duration::from_secs(1) && !interval_samples.is_empty() {
            print_interval(&mut interval_samples, last_print.elapsed());
            interval_samples.clear();
            last_print = Instant::now();
        }
    }

    if !interval_samples.is_empty() {
        print_interval(&mut interval_samples, last_print.elapsed());
    }

    if all_samples.is_empty() {
        eprintln!("no samples collected");
        return;
    }
    all_samples.sort_unstable();
    let n = all_samples.len();
    let elapsed = measure_start.elapsed();
    eprintln!();
    eprintln!(
        "── summary ({:.1}s, {} requests) ──────────────────────────────────",
        elapsed.as_secs_f64(),
        n
    );
    eprintln!("  qps     {:.0}", n as f64 / elapsed.as_secs_f64());
    eprintln!("  p50     {:.1}µs", percentile(&all_samples, 50.0));
    eprintln!("  p95     {:.1}µs", percentile(&all_samples, 95.0));
    eprintln!("  p99     {:.1}µs", percentile(&all_samples, 99.0));
    eprintln!("  p99.9   {:.1}µs", percentile(&all_samples, 99.9));
    eprintln!("  max     {:.1}µs", all_samples[n - 1] as f64 / 1_000.0);
}
