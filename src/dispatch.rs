//! Handler contract, registry, and the message dispatcher.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use tracing::warn;

use crate::conn::Connection;
use crate::stats::ServerStats;
use crate::wire::{Message, MessageType};

/// A message-processing plug-in.
///
/// `process_message` runs synchronously on the worker thread that read the
/// record: it must not block, must not retain either reference past return,
/// and writes responses only through the connection's send path. Lifecycle
/// callbacks fire exactly once per connection, even when the same handler
/// instance is registered for several tags.
pub trait MessageHandler: Send + Sync {
    fn process_message(&self, msg: &Message, conn: &mut Connection);

    fn on_connection_established(&self, _conn: &mut Connection) {}

    fn on_connection_closed(&self, _conn: &mut Connection) {}
}

/// Maps message-type tags to handlers. Last registration for a tag wins.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<MessageType, Arc<dyn MessageHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: MessageType, handler: Arc<dyn MessageHandler>) {
        let mut map = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        map.insert(kind, handler);
    }

    pub fn get(&self, kind: MessageType) -> Option<Arc<dyn MessageHandler>> {
        let map = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        map.get(&kind).cloned()
    }

    /// Distinct handler instances, deduplicated across tags.
    fn distinct_handlers(&self) -> Vec<Arc<dyn MessageHandler>> {
        let map = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut seen = Vec::new();
        let mut out: Vec<Arc<dyn MessageHandler>> = Vec::new();
        for handler in map.values() {
            let key = Arc::as_ptr(handler) as *const () as usize;
            if !seen.contains(&key) {
                seen.push(key);
                out.push(handler.clone());
            }
        }
        out
    }

    /// Fire `on_connection_established` once per registered handler instance.
    pub fn connection_established(&self, conn: &mut Connection) {
        for handler in self.distinct_handlers() {
            handler.on_connection_established(conn);
        }
    }

    /// Fire `on_connection_closed` once per registered handler instance.
    pub fn connection_closed(&self, conn: &mut Connection) {
        for handler in self.distinct_handlers() {
            handler.on_connection_closed(conn);
        }
    }
}

/// What the worker should do with the connection after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Processed,
    /// The handler panicked; the offending connection must be closed.
    CloseConnection,
}

/// Dispatch one validated record to its handler and record the latency.
///
/// The record keeps its uniform wire shape; handlers project the variant
/// view (`order_body`, `market_data_body`, …), which succeeds exactly when
/// the tag and declared payload size admit it, so a variant-capable handler
/// always wins over base-record treatment of the same bytes. A tag with no
/// registered handler is dropped silently and still counted as processed.
pub fn dispatch(
    msg: &Message,
    conn: &mut Connection,
    registry: &HandlerRegistry,
    stats: &ServerStats,
) -> DispatchOutcome {
    let started = Instant::now();

    let outcome = match msg.kind().and_then(|kind| registry.get(kind)) {
        Some(handler) => {
            match catch_unwind(AssertUnwindSafe(|| handler.process_message(msg, conn))) {
                Ok(()) => DispatchOutcome::Processed,
                Err(_) => {
                    warn!(
                        client_id = conn.client_id(),
                        message_type = msg.message_type,
                        "handler panicked, closing connection"
                    );
                    DispatchOutcome::CloseConnection
                }
            }
        }
        None => DispatchOutcome::Processed,
    };

    stats.record_message(started.elapsed().as_nanos() as u64);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct CountingHandler {
        calls: AtomicU64,
        established: AtomicU64,
        closed: AtomicU64,
    }

    impl CountingHandler {
        fn new() -> Self {
            Self {
                calls: AtomicU64::new(0),
                established: AtomicU64::new(0),
                closed: AtomicU64::new(0),
            }
        }
    }

    impl MessageHandler for CountingHandler {
        fn process_message(&self, _msg: &Message, _conn: &mut Connection) {
            self.calls.fetch_add(1, Ordering::Relaxed);
        }

        fn on_connection_established(&self, _conn: &mut Connection) {
            self.established.fetch_add(1, Ordering::Relaxed);
        }

        fn on_connection_closed(&self, _conn: &mut Connection) {
            self.closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct PanickingHandler;

    impl MessageHandler for PanickingHandler {
        fn process_message(&self, _msg: &Message, _conn: &mut Connection) {
            panic!("boom");
        }
    }

    fn test_connection() -> (crate::conn::ConnectionTable, std::sync::Arc<Mutex<Connection>>) {
        let table = crate::conn::ConnectionTable::new();
        let fd = unsafe { libc::eventfd(0, 0) };
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let (_, conn) = table.insert(fd, peer);
        (table, conn)
    }

    #[test]
    fn dispatch_invokes_registered_handler_and_counts() {
        let registry = HandlerRegistry::new();
        let handler = Arc::new(CountingHandler::new());
        registry.register(MessageType::OrderNew, handler.clone());

        let stats = ServerStats::new();
        let (_table, conn) = test_connection();
        let mut guard = conn.lock().unwrap();
        let msg = Message::new(MessageType::OrderNew);

        for _ in 0..3 {
            assert_eq!(
                dispatch(&msg, &mut guard, &registry, &stats),
                DispatchOutcome::Processed
            );
        }
        assert_eq!(handler.calls.load(Ordering::Relaxed), 3);
        assert_eq!(stats.total_messages(), 3);
    }

    #[test]
    fn absent_handler_still_counts_as_processed() {
        let registry = HandlerRegistry::new();
        let stats = ServerStats::new();
        let (_table, conn) = test_connection();
        let mut guard = conn.lock().unwrap();
        let msg = Message::new(MessageType::Heartbeat);

        assert_eq!(
            dispatch(&msg, &mut guard, &registry, &stats),
            DispatchOutcome::Processed
        );
        assert_eq!(stats.total_messages(), 1);
    }

    #[test]
    fn panicking_handler_requests_close() {
        let registry = HandlerRegistry::new();
        registry.register(MessageType::OrderNew, Arc::new(PanickingHandler));
        let stats = ServerStats::new();
        let (_table, conn) = test_connection();
        let mut guard = conn.lock().unwrap();
        let msg = Message::new(MessageType::OrderNew);

        assert_eq!(
            dispatch(&msg, &mut guard, &registry, &stats),
            DispatchOutcome::CloseConnection
        );
        // The failed dispatch is still a dispatched record.
        assert_eq!(stats.total_messages(), 1);
    }

    #[test]
    fn last_registration_wins() {
        let registry = HandlerRegistry::new();
        let first = Arc::new(CountingHandler::new());
        let second = Arc::new(CountingHandler::new());
        registry.register(MessageType::MarketData, first.clone());
        registry.register(MessageType::MarketData, second.clone());

        let stats = ServerStats::new();
        let (_table, conn) = test_connection();
        let mut guard = conn.lock().unwrap();
        let msg = Message::new(MessageType::MarketData);
        dispatch(&msg, &mut guard, &registry, &stats);

        assert_eq!(first.calls.load(Ordering::Relaxed), 0);
        assert_eq!(second.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn lifecycle_callbacks_fire_once_per_instance() {
        let registry = HandlerRegistry::new();
        let handler = Arc::new(CountingHandler::new());
        // One instance under three tags must still get one callback.
        registry.register(MessageType::OrderNew, handler.clone());
        registry.register(MessageType::OrderCancel, handler.clone());
        registry.register(MessageType::OrderReplace, handler.clone());

        let (_table, conn) = test_connection();
        let mut guard = conn.lock().unwrap();
        registry.connection_established(&mut guard);
        registry.connection_closed(&mut guard);

        assert_eq!(handler.established.load(Ordering::Relaxed), 1);
        assert_eq!(handler.closed.load(Ordering::Relaxed), 1);
    }
}
