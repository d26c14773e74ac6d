//! Wire codec: fixed-layout binary trading records.
//!
//! Every logical send is one whole `Message` record (`WIRE_SIZE` bytes,
//! little-endian, `#[repr(C)]` with explicit padding so the in-memory
//! representation *is* the wire representation). Variant records (order,
//! market data, fill) project their extra fields into the leading bytes of
//! the payload area, so the wire size is uniform between client and server.

use std::mem::size_of;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Header bytes preceding the payload area.
pub const HEADER_SIZE: usize = 40;
/// Inline payload capacity per record.
pub const PAYLOAD_CAPACITY: usize = 1024;
/// Size of one on-wire record.
pub const WIRE_SIZE: usize = size_of::<Message>();

const _: () = assert!(WIRE_SIZE == HEADER_SIZE + PAYLOAD_CAPACITY);
const _: () = assert!(size_of::<OrderBody>() <= PAYLOAD_CAPACITY);
const _: () = assert!(size_of::<MarketDataBody>() <= PAYLOAD_CAPACITY);
const _: () = assert!(size_of::<FillBody>() <= PAYLOAD_CAPACITY);

/// Message type tags (8-bit, on-wire values).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    OrderNew = 0x01,
    OrderCancel = 0x02,
    OrderReplace = 0x03,
    OrderFill = 0x04,
    OrderReject = 0x05,
    MarketData = 0x06,
    Heartbeat = 0x07,
    Login = 0x08,
    Logout = 0x09,
    Error = 0xFF,
}

impl MessageType {
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(MessageType::OrderNew),
            0x02 => Some(MessageType::OrderCancel),
            0x03 => Some(MessageType::OrderReplace),
            0x04 => Some(MessageType::OrderFill),
            0x05 => Some(MessageType::OrderReject),
            0x06 => Some(MessageType::MarketData),
            0x07 => Some(MessageType::Heartbeat),
            0x08 => Some(MessageType::Login),
            0x09 => Some(MessageType::Logout),
            0xFF => Some(MessageType::Error),
            _ => None,
        }
    }

    /// Tags whose records may carry an [`OrderBody`] in the payload area.
    #[inline]
    pub fn is_order_family(self) -> bool {
        matches!(
            self,
            MessageType::OrderNew | MessageType::OrderCancel | MessageType::OrderReplace
        )
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy = 0x01,
    Sell = 0x02,
}

impl OrderSide {
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(OrderSide::Buy),
            0x02 => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market = 0x01,
    Limit = 0x02,
    Stop = 0x03,
    StopLimit = 0x04,
}

impl OrderType {
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(OrderType::Market),
            0x02 => Some(OrderType::Limit),
            0x03 => Some(OrderType::Stop),
            0x04 => Some(OrderType::StopLimit),
            _ => None,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    Day = 0x01,
    Ioc = 0x02,
    Fok = 0x03,
    Gtc = 0x04,
}

impl TimeInForce {
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(TimeInForce::Day),
            0x02 => Some(TimeInForce::Ioc),
            0x03 => Some(TimeInForce::Fok),
            0x04 => Some(TimeInForce::Gtc),
            _ => None,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Pending = 0x01,
    Processed = 0x02,
    Completed = 0x03,
    Failed = 0x04,
}

impl MessageStatus {
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(MessageStatus::Pending),
            0x02 => Some(MessageStatus::Processed),
            0x03 => Some(MessageStatus::Completed),
            0x04 => Some(MessageStatus::Failed),
            _ => None,
        }
    }
}

/// Base record. 1064 bytes on the wire: a 40-byte header followed by the
/// 1024-byte payload buffer.
///
/// Field order groups by size (u64 → u32 → u8) and pads explicitly, so the
/// struct has no hidden padding and `AsBytes` proves the layout at compile
/// time. DO NOT reorder fields without re-checking the offsets.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct Message {
    pub message_id: u64,       // bytes 0..8
    pub timestamp: u64,        // bytes 8..16, nanoseconds
    pub sequence_number: u32,  // bytes 16..20
    pub message_type: u8,      // byte 20
    pub status: u8,            // byte 21
    pub _pad0: [u8; 2],        // bytes 22..24
    pub source_id: u32,        // bytes 24..28
    pub destination_id: u32,   // bytes 28..32
    pub payload_size: u32,     // bytes 32..36, meaningful payload bytes
    pub _pad1: [u8; 4],        // bytes 36..40
    pub payload: [u8; PAYLOAD_CAPACITY],
}

/// Order variant fields, carried in the payload area of order-family records.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct OrderBody {
    pub symbol: [u8; 16],
    pub side: u8,
    pub order_type: u8,
    pub time_in_force: u8,
    pub _pad0: [u8; 5],
    pub order_id: u64,
    pub client_order_id: u64,
    pub quantity: u32,
    pub _pad1: [u8; 4],
    pub price: u64,      // integer ticks
    pub stop_price: u64, // integer ticks
}

/// Market data variant fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct MarketDataBody {
    pub symbol: [u8; 16],
    pub bid_price: u64,
    pub ask_price: u64,
    pub last_price: u64,
    pub high_price: u64,
    pub low_price: u64,
    pub volume: u64,
    pub bid_size: u32,
    pub ask_size: u32,
    pub last_size: u32,
    pub _pad0: [u8; 4],
}

/// Fill variant fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct FillBody {
    pub order_id: u64,
    pub fill_id: u64,
    pub fill_price: u64,
    pub commission: u64,
    pub fill_quantity: u32,
    pub _pad0: [u8; 4],
    pub execution_venue: [u8; 16],
}

/// Validation failure for an incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("record too short: {got} bytes, header needs {HEADER_SIZE}")]
    ShortRecord { got: usize },
    #[error("payload_size {size} exceeds capacity {PAYLOAD_CAPACITY}")]
    BadPayloadSize { size: u32 },
    #[error("unknown message type tag {tag:#04x}")]
    UnknownType { tag: u8 },
}

/// Read and validate the header of a raw record.
///
/// Pure: the same bytes always yield the same result. Rejects records whose
/// `payload_size` exceeds the payload capacity or whose tag is not in the
/// enumerated set.
pub fn decode_header(bytes: &[u8]) -> Result<(MessageType, u32), CodecError> {
    if bytes.len() < HEADER_SIZE {
        return Err(CodecError::ShortRecord { got: bytes.len() });
    }
    let tag = bytes[20];
    let kind = MessageType::from_u8(tag).ok_or(CodecError::UnknownType { tag })?;
    let payload_size = u32::from_le_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]);
    if payload_size as usize > PAYLOAD_CAPACITY {
        return Err(CodecError::BadPayloadSize { size: payload_size });
    }
    Ok((kind, payload_size))
}

impl Message {
    /// Zero-filled record with the given tag, stamped with the current
    /// wall-clock time and `Pending` status.
    pub fn new(kind: MessageType) -> Self {
        let mut msg = Message::new_zeroed();
        msg.message_type = kind as u8;
        msg.status = MessageStatus::Pending as u8;
        msg.timestamp = now_nanos();
        msg
    }

    #[inline]
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_u8(self.message_type)
    }

    /// Check the invariants every well-formed record satisfies.
    pub fn validate(&self) -> Result<(), CodecError> {
        if MessageType::from_u8(self.message_type).is_none() {
            return Err(CodecError::UnknownType {
                tag: self.message_type,
            });
        }
        if self.payload_size as usize > PAYLOAD_CAPACITY {
            return Err(CodecError::BadPayloadSize {
                size: self.payload_size,
            });
        }
        Ok(())
    }

    /// Copy a variant body into the payload area and set `payload_size`.
    pub fn set_body<T: AsBytes>(&mut self, body: &T) {
        let bytes = body.as_bytes();
        debug_assert!(bytes.len() <= PAYLOAD_CAPACITY);
        self.payload[..bytes.len()].copy_from_slice(bytes);
        self.payload_size = bytes.len() as u32;
    }

    /// Zero-copy view of the order variant, when the tag is in the order
    /// family and the declared payload is large enough.
    #[inline]
    pub fn order_body(&self) -> Option<&OrderBody> {
        if !self.kind().is_some_and(MessageType::is_order_family) {
            return None;
        }
        if (self.payload_size as usize) < size_of::<OrderBody>() {
            return None;
        }
        OrderBody::ref_from_prefix(&self.payload)
    }

    /// Zero-copy view of the market data variant.
    #[inline]
    pub fn market_data_body(&self) -> Option<&MarketDataBody> {
        if self.kind() != Some(MessageType::MarketData) {
            return None;
        }
        if (self.payload_size as usize) < size_of::<MarketDataBody>() {
            return None;
        }
        MarketDataBody::ref_from_prefix(&self.payload)
    }

    /// Zero-copy view of the fill variant.
    #[inline]
    pub fn fill_body(&self) -> Option<&FillBody> {
        if self.kind() != Some(MessageType::OrderFill) {
            return None;
        }
        if (self.payload_size as usize) < size_of::<FillBody>() {
            return None;
        }
        FillBody::ref_from_prefix(&self.payload)
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("message_id", &self.message_id)
            .field("timestamp", &self.timestamp)
            .field("sequence_number", &self.sequence_number)
            .field("message_type", &self.message_type)
            .field("status", &self.status)
            .field("payload_size", &self.payload_size)
            .finish_non_exhaustive()
    }
}

/// NUL-pad an ASCII symbol into its 16-byte wire form. Longer inputs are
/// truncated.
pub fn pack_symbol(symbol: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    let bytes = symbol.as_bytes();
    let n = bytes.len().min(16);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// Text of a NUL-padded symbol field. Non-UTF-8 content reads as empty.
pub fn symbol_text(raw: &[u8; 16]) -> &str {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end]).unwrap_or("")
}

/// Wall-clock nanoseconds since the Unix epoch, for record timestamps.
pub fn now_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout_is_wire_layout() {
        assert_eq!(size_of::<Message>(), 1064);
        assert_eq!(size_of::<OrderBody>(), 64);
        assert_eq!(size_of::<MarketDataBody>(), 80);
        assert_eq!(size_of::<FillBody>(), 56);
    }

    #[test]
    fn decode_header_roundtrip() {
        let mut msg = Message::new(MessageType::OrderNew);
        msg.payload_size = 64;
        let (kind, size) = decode_header(msg.as_bytes()).unwrap();
        assert_eq!(kind, MessageType::OrderNew);
        assert_eq!(size, 64);
    }

    #[test]
    fn decode_header_is_pure() {
        let mut msg = Message::new(MessageType::MarketData);
        msg.payload_size = 80;
        let bytes = msg.as_bytes();
        let first = decode_header(bytes).unwrap();
        for _ in 0..10 {
            assert_eq!(decode_header(bytes).unwrap(), first);
        }
    }

    #[test]
    fn decode_header_rejects_unknown_tag() {
        let mut msg = Message::new_zeroed();
        msg.message_type = 0x42;
        assert!(matches!(
            decode_header(msg.as_bytes()),
            Err(CodecError::UnknownType { tag: 0x42 })
        ));
    }

    #[test]
    fn decode_header_rejects_oversized_payload() {
        let mut msg = Message::new(MessageType::Heartbeat);
        msg.payload_size = PAYLOAD_CAPACITY as u32 + 1;
        assert!(matches!(
            decode_header(msg.as_bytes()),
            Err(CodecError::BadPayloadSize { .. })
        ));
    }

    #[test]
    fn decode_header_rejects_short_input() {
        assert!(matches!(
            decode_header(&[0u8; 10]),
            Err(CodecError::ShortRecord { got: 10 })
        ));
    }

    #[test]
    fn order_view_requires_matching_tag_and_size() {
        let body = OrderBody {
            symbol: pack_symbol("AAPL"),
            side: OrderSide::Buy as u8,
            order_type: OrderType::Limit as u8,
            time_in_force: TimeInForce::Day as u8,
            _pad0: [0; 5],
            order_id: 7,
            client_order_id: 9,
            quantity: 100,
            _pad1: [0; 4],
            price: 1_500_000,
            stop_price: 0,
        };
        let mut msg = Message::new(MessageType::OrderNew);
        msg.set_body(&body);

        let view = msg.order_body().expect("order view");
        assert_eq!(view, &body);
        assert_eq!(symbol_text(&view.symbol), "AAPL");

        // Same bytes under a non-order tag must not project.
        msg.message_type = MessageType::Heartbeat as u8;
        assert!(msg.order_body().is_none());

        // Declared payload smaller than the body must not project.
        msg.message_type = MessageType::OrderNew as u8;
        msg.payload_size = 8;
        assert!(msg.order_body().is_none());
    }

    #[test]
    fn market_data_view_roundtrip() {
        let body = MarketDataBody {
            symbol: pack_symbol("GOOGL"),
            bid_price: 2_800_000,
            ask_price: 2_800_100,
            last_price: 2_800_050,
            high_price: 2_810_000,
            low_price: 2_790_000,
            volume: 1_000_000,
            bid_size: 500,
            ask_size: 500,
            last_size: 100,
            _pad0: [0; 4],
        };
        let mut msg = Message::new(MessageType::MarketData);
        msg.set_body(&body);
        assert_eq!(msg.market_data_body(), Some(&body));
        assert!(msg.order_body().is_none());
        assert!(msg.fill_body().is_none());
    }

    #[test]
    fn fill_view_roundtrip() {
        let body = FillBody {
            order_id: 11,
            fill_id: 12,
            fill_price: 1_500_000,
            commission: 25,
            fill_quantity: 100,
            _pad0: [0; 4],
            execution_venue: pack_symbol("ARCA"),
        };
        let mut msg = Message::new(MessageType::OrderFill);
        msg.set_body(&body);
        assert_eq!(msg.fill_body(), Some(&body));
    }

    #[test]
    fn validate_accepts_every_enumerated_tag() {
        for tag in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0xFF] {
            let mut msg = Message::new_zeroed();
            msg.message_type = tag;
            assert!(msg.validate().is_ok(), "tag {tag:#04x}");
        }
    }

    #[test]
    fn symbol_packing_truncates_and_pads() {
        let packed = pack_symbol("MSFT");
        assert_eq!(&packed[..4], b"MSFT");
        assert!(packed[4..].iter().all(|&b| b == 0));
        assert_eq!(symbol_text(&packed), "MSFT");

        let long = pack_symbol("ABCDEFGHIJKLMNOPQRST");
        assert_eq!(&long, b"ABCDEFGHIJKLMNOP");
    }
}
