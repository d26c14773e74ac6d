//! Built-in message handlers: order flow, market data, session bookkeeping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::buffer_pool::BufferPool;
use crate::conn::Connection;
use crate::dispatch::MessageHandler;
use crate::wire::{
    now_nanos, symbol_text, Message, MessageStatus, MessageType, OrderSide,
};

/// Handles the order family (NEW / CANCEL / REPLACE). A well-formed
/// ORDER_NEW is acknowledged with a `Processed` echo of the request,
/// composed in a send-pool slot and written straight to the socket.
pub struct OrderHandler {
    pool: Arc<BufferPool>,
}

impl OrderHandler {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self { pool }
    }

    fn ack(&self, msg: &Message, conn: &mut Connection) {
        let ack = self.pool.next_send_buffer();
        *ack = *msg;
        ack.status = MessageStatus::Processed as u8;
        ack.timestamp = now_nanos();
        if let Err(e) = conn.send_record(ack) {
            warn!(client_id = conn.client_id(), error = %e, "order ack send failed");
        }
    }
}

impl MessageHandler for OrderHandler {
    fn process_message(&self, msg: &Message, conn: &mut Connection) {
        match msg.kind() {
            Some(MessageType::OrderNew) => {
                if let Some(order) = msg.order_body() {
                    debug!(
                        client_id = conn.client_id(),
                        symbol = symbol_text(&order.symbol),
                        side = if order.side == OrderSide::Buy as u8 { "BUY" } else { "SELL" },
                        quantity = order.quantity,
                        price = order.price,
                        order_id = order.order_id,
                        "new order"
                    );
                } else {
                    debug!(
                        client_id = conn.client_id(),
                        payload_size = msg.payload_size,
                        "new order without full order body"
                    );
                }
                self.ack(msg, conn);
            }
            Some(MessageType::OrderCancel) => {
                // Cancel carries the target order id in the first payload
                // bytes when the sender did not fill a full order body.
                let order_id = msg
                    .order_body()
                    .map(|o| o.order_id)
                    .or_else(|| {
                        msg.payload[..8].try_into().ok().map(u64::from_le_bytes)
                    })
                    .unwrap_or(0);
                debug!(client_id = conn.client_id(), order_id, "cancel order");
            }
            Some(MessageType::OrderReplace) => {
                debug!(client_id = conn.client_id(), "replace order");
            }
            _ => {}
        }
    }

    fn on_connection_established(&self, conn: &mut Connection) {
        conn.set_authenticated(true);
    }

    fn on_connection_closed(&self, conn: &mut Connection) {
        conn.set_authenticated(false);
    }
}

/// Top-of-book snapshot kept per symbol by the market data handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TopOfBook {
    pub bid_price: u64,
    pub bid_size: u32,
    pub ask_price: u64,
    pub ask_size: u32,
    pub last_price: u64,
    pub last_size: u32,
}

/// Records the latest top-of-book per symbol from MARKET_DATA records.
#[derive(Default)]
pub struct MarketDataHandler {
    books: Mutex<HashMap<String, TopOfBook>>,
}

impl MarketDataHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest book for a symbol, if any update has been seen.
    pub fn top_of_book(&self, symbol: &str) -> Option<TopOfBook> {
        let books = self.books.lock().unwrap_or_else(PoisonError::into_inner);
        books.get(symbol).copied()
    }
}

impl MessageHandler for MarketDataHandler {
    fn process_message(&self, msg: &Message, _conn: &mut Connection) {
        let Some(data) = msg.market_data_body() else {
            debug!(payload_size = msg.payload_size, "market data without full body");
            return;
        };
        let symbol = symbol_text(&data.symbol).to_owned();
        debug!(
            symbol = %symbol,
            bid = data.bid_price,
            bid_size = data.bid_size,
            ask = data.ask_price,
            ask_size = data.ask_size,
            "market data"
        );
        let mut books = self.books.lock().unwrap_or_else(PoisonError::into_inner);
        books.insert(
            symbol,
            TopOfBook {
                bid_price: data.bid_price,
                bid_size: data.bid_size,
                ask_price: data.ask_price,
                ask_size: data.ask_size,
                last_price: data.last_price,
                last_size: data.last_size,
            },
        );
    }
}

/// Session bookkeeping: LOGIN authenticates, LOGOUT clears it, HEARTBEAT
/// refreshes the activity timestamp (dispatch already touches it; the
/// handler only logs).
#[derive(Default)]
pub struct SessionHandler;

impl SessionHandler {
    pub fn new() -> Self {
        Self
    }
}

impl MessageHandler for SessionHandler {
    fn process_message(&self, msg: &Message, conn: &mut Connection) {
        match msg.kind() {
            Some(MessageType::Login) => {
                conn.set_authenticated(true);
                debug!(client_id = conn.client_id(), "login");
            }
            Some(MessageType::Logout) => {
                conn.set_authenticated(false);
                debug!(client_id = conn.client_id(), "logout");
            }
            Some(MessageType::Heartbeat) => {
                debug!(client_id = conn.client_id(), "heartbeat");
            }
            _ => {}
        }
    }
}

/// Echoes every record back with `Processed` status. Used by the round-trip
/// integration tests.
pub struct EchoHandler {
    pool: Arc<BufferPool>,
}

impl EchoHandler {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self { pool }
    }
}

impl MessageHandler for EchoHandler {
    fn process_message(&self, msg: &Message, conn: &mut Connection) {
        let echo = self.pool.next_send_buffer();
        *echo = *msg;
        echo.status = MessageStatus::Processed as u8;
        if let Err(e) = conn.send_record(echo) {
            warn!(client_id = conn.client_id(), error = %e, "echo send failed");
        }
    }
}
