#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::time::{Duration, Instant};

use zerocopy::{AsBytes, FromBytes};

use tickgate::server::{Server, ServerConfig};
use tickgate::wire::{
    pack_symbol, MarketDataBody, Message, MessageType, OrderBody, OrderSide, OrderType,
    TimeInForce, WIRE_SIZE,
};

/// Initialize (but do not start) a server on an OS-assigned loopback port.
pub fn init_server(threads: usize) -> Server {
    Server::initialize(ServerConfig {
        ip: Ipv4Addr::LOCALHOST,
        port: 0,
        threads,
    })
    .expect("server initialization failed")
}

pub fn connect(server: &Server) -> TcpStream {
    let stream = TcpStream::connect(server.local_addr()).expect("connect failed");
    stream.set_nodelay(true).expect("nodelay failed");
    stream
}

pub fn send_record(stream: &mut TcpStream, msg: &Message) {
    stream.write_all(msg.as_bytes()).expect("write failed");
}

pub fn read_record(stream: &mut TcpStream) -> Message {
    let mut buf = [0u8; WIRE_SIZE];
    stream.read_exact(&mut buf).expect("read failed");
    Message::read_from(&buf[..]).expect("record decode failed")
}

pub fn build_order(message_id: u64, symbol: &str, side: OrderSide, quantity: u32, price: u64) -> Message {
    let body = OrderBody {
        symbol: pack_symbol(symbol),
        side: side as u8,
        order_type: OrderType::Limit as u8,
        time_in_force: TimeInForce::Day as u8,
        _pad0: [0; 5],
        order_id: message_id,
        client_order_id: message_id,
        quantity,
        _pad1: [0; 4],
        price,
        stop_price: 0,
    };
    let mut msg = Message::new(MessageType::OrderNew);
    msg.message_id = message_id;
    msg.sequence_number = message_id as u32;
    msg.set_body(&body);
    msg
}

pub fn build_market_data(message_id: u64, symbol: &str, bid: u64, bid_size: u32, ask: u64, ask_size: u32) -> Message {
    let body = MarketDataBody {
        symbol: pack_symbol(symbol),
        bid_price: bid,
        ask_price: ask,
        last_price: bid,
        high_price: ask,
        low_price: bid,
        volume: 0,
        bid_size,
        ask_size,
        last_size: 0,
        _pad0: [0; 4],
    };
    let mut msg = Message::new(MessageType::MarketData);
    msg.message_id = message_id;
    msg.set_body(&body);
    msg
}

/// Poll `predicate` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    predicate()
}
