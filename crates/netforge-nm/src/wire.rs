//! NM wire codec: self-describing typed key/value messages.
//!
//! Framing: magic `'V'`, version `0x01`, 16-bit field count, then per
//! field an 8-bit name length, the name bytes, an 8-bit type tag and the
//! value (fixed-width scalars in the buffer's byte order, floats as
//! IEEE 754 bit patterns, strings and blobs with a 32-bit length).

use netforge_core::{ByteBuf, ErrorCode, Result, net_error};
use netforge_net::RecvStatus;
use tracing::debug;

use crate::message::NmMessage;
use crate::value::NmValue;

pub(crate) const NM_MAGIC: u8 = 0x56;
pub(crate) const NM_VERSION: u8 = 0x01;

/// Serializes `msg` into `buf`.
pub fn encode(msg: &NmMessage, buf: &mut ByteBuf) -> Result<()> {
    buf.put_u8(NM_MAGIC)?;
    buf.put_u8(NM_VERSION)?;

    let count = u16::try_from(msg.len())
        .map_err(|_| net_error!(ErrorCode::Overflow, "too many fields: {}", msg.len()))?;
    buf.put_u16(count)?;

    for (name, value) in msg.iter() {
        let name_len = u8::try_from(name.len()).map_err(|_| {
            net_error!(ErrorCode::NotSupported, "field name too long: {name}")
        })?;
        if name_len == 0 {
            return Err(net_error!(ErrorCode::InvalidArg, "empty field name"));
        }
        buf.put_u8(name_len)?;
        buf.put_str(name)?;
        buf.put_u8(value.tag())?;

        match value {
            NmValue::Int8(v) => buf.put_u8(*v as u8)?,
            NmValue::UInt8(v) => buf.put_u8(*v)?,
            NmValue::Int16(v) => buf.put_u16(*v as u16)?,
            NmValue::UInt16(v) => buf.put_u16(*v)?,
            NmValue::Int32(v) => buf.put_u32(*v as u32)?,
            NmValue::UInt32(v) => buf.put_u32(*v)?,
            NmValue::Int64(v) => buf.put_u64(*v as u64)?,
            NmValue::UInt64(v) => buf.put_u64(*v)?,
            NmValue::Bool(v) => buf.put_u8(u8::from(*v))?,
            NmValue::Char(v) | NmValue::UChar(v) => buf.put_u8(*v)?,
            NmValue::SChar(v) => buf.put_u8(*v as u8)?,
            NmValue::Float(v) => buf.put_u32(v.to_bits())?,
            NmValue::Double(v) => buf.put_u64(v.to_bits())?,
            NmValue::Str(s) => {
                let len = u32::try_from(s.len())
                    .map_err(|_| net_error!(ErrorCode::NotSupported, "string too long"))?;
                buf.put_u32(len)?;
                buf.put_str(s)?;
            }
            NmValue::Blob(b) => {
                let len = u32::try_from(b.len())
                    .map_err(|_| net_error!(ErrorCode::NotSupported, "blob too long"))?;
                buf.put_u32(len)?;
                buf.put_bytes(b)?;
            }
        }
    }

    if let Some(code) = buf.err() {
        return Err(net_error!(code, "encode buffer failed"));
    }
    Ok(())
}

/// One-shot decode of a complete message.
pub fn decode(buf: &mut ByteBuf) -> Result<NmMessage> {
    let mut parser = NmParser::new();
    match parser.run(buf) {
        RecvStatus::Complete => {
            parser.take_msg().ok_or_else(|| net_error!(ErrorCode::InvalidState, "no message"))
        }
        RecvStatus::Again => Err(net_error!(ErrorCode::IoPartial, "truncated message")),
        RecvStatus::Invalid => Err(net_error!(ErrorCode::IoProtocol, "malformed message")),
        _ => Err(net_error!(ErrorCode::Generic, "decode failed")),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    MsgBegin,
    Magic,
    Version,
    FieldCount,
    FieldBegin,
    NameLen,
    Name,
    ValueType,
    ValueLen,
    Value,
    FieldComplete,
    MsgComplete,
}

/// Incremental decoder for NM messages arriving in arbitrary chunks.
pub struct NmParser {
    state: State,
    field_count: u16,
    fields_parsed: u16,
    name_len: u8,
    name: Option<String>,
    value_tag: u8,
    value_len: usize,
    value: Option<NmValue>,
    msg: Option<NmMessage>,
}

impl Default for NmParser {
    fn default() -> Self {
        Self::new()
    }
}

impl NmParser {
    pub fn new() -> Self {
        Self {
            state: State::MsgBegin,
            field_count: 0,
            fields_parsed: 0,
            name_len: 0,
            name: None,
            value_tag: 0,
            value_len: 0,
            value: None,
            msg: None,
        }
    }

    /// Drops any partial state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Consumes message bytes from the buffer's read cursor.
    pub fn run(&mut self, buf: &mut ByteBuf) -> RecvStatus {
        loop {
            match self.state {
                State::MsgBegin => {
                    self.msg = None;
                    self.fields_parsed = 0;
                    self.state = State::Magic;
                }

                State::Magic => {
                    if !buf.has_avail(1) {
                        return RecvStatus::Again;
                    }
                    if buf.get_u8() != Ok(NM_MAGIC) {
                        debug!("nm: bad magic byte");
                        return RecvStatus::Invalid;
                    }
                    self.state = State::Version;
                }

                State::Version => {
                    if !buf.has_avail(1) {
                        return RecvStatus::Again;
                    }
                    if buf.get_u8() != Ok(NM_VERSION) {
                        debug!("nm: unsupported version");
                        return RecvStatus::Invalid;
                    }
                    self.state = State::FieldCount;
                }

                State::FieldCount => {
                    if !buf.has_avail(2) {
                        return RecvStatus::Again;
                    }
                    let Ok(count) = buf.get_u16() else { return RecvStatus::Error };
                    self.field_count = count;
                    self.msg = Some(NmMessage::new());
                    self.state = State::FieldBegin;
                }

                State::FieldBegin => {
                    self.state = if self.fields_parsed == self.field_count {
                        State::MsgComplete
                    } else {
                        State::NameLen
                    };
                }

                State::NameLen => {
                    if !buf.has_avail(1) {
                        return RecvStatus::Again;
                    }
                    let Ok(len) = buf.get_u8() else { return RecvStatus::Error };
                    if len == 0 {
                        debug!("nm: empty field name");
                        return RecvStatus::Invalid;
                    }
                    self.name_len = len;
                    self.state = State::Name;
                }

                State::Name => {
                    if !buf.has_avail(self.name_len as usize) {
                        return RecvStatus::Again;
                    }
                    let mut raw = vec![0u8; self.name_len as usize];
                    if buf.get_bytes(&mut raw).is_err() {
                        return RecvStatus::Error;
                    }
                    match String::from_utf8(raw) {
                        Ok(name) => self.name = Some(name),
                        Err(_) => {
                            debug!("nm: field name not utf-8");
                            return RecvStatus::Invalid;
                        }
                    }
                    self.state = State::ValueType;
                }

                State::ValueType => {
                    if !buf.has_avail(1) {
                        return RecvStatus::Again;
                    }
                    let Ok(tag) = buf.get_u8() else { return RecvStatus::Error };
                    if !NmValue::valid_tag(tag) {
                        debug!(tag, "nm: unknown type tag");
                        return RecvStatus::Invalid;
                    }
                    self.value_tag = tag;
                    self.state = match NmValue::fixed_size(tag) {
                        Some(size) => {
                            self.value_len = size;
                            State::Value
                        }
                        None => State::ValueLen,
                    };
                }

                State::ValueLen => {
                    if !buf.has_avail(4) {
                        return RecvStatus::Again;
                    }
                    let Ok(len) = buf.get_u32() else { return RecvStatus::Error };
                    self.value_len = len as usize;
                    self.state = State::Value;
                }

                State::Value => {
                    if !buf.has_avail(self.value_len) {
                        return RecvStatus::Again;
                    }
                    match self.read_value(buf) {
                        Ok(value) => self.value = Some(value),
                        Err(status) => return status,
                    }
                    self.state = State::FieldComplete;
                }

                State::FieldComplete => {
                    let (Some(name), Some(value)) = (self.name.take(), self.value.take()) else {
                        return RecvStatus::Error;
                    };
                    self.msg.as_mut().expect("message allocated at field count").set(name, value);
                    self.fields_parsed += 1;
                    self.state = State::FieldBegin;
                }

                State::MsgComplete => return RecvStatus::Complete,
            }
        }
    }

    fn read_value(&mut self, buf: &mut ByteBuf) -> std::result::Result<NmValue, RecvStatus> {
        let scalar_err = |_| RecvStatus::Error;
        Ok(match self.value_tag {
            1 => NmValue::Int8(buf.get_u8().map_err(scalar_err)? as i8),
            2 => NmValue::UInt8(buf.get_u8().map_err(scalar_err)?),
            3 => NmValue::Int16(buf.get_u16().map_err(scalar_err)? as i16),
            4 => NmValue::UInt16(buf.get_u16().map_err(scalar_err)?),
            5 => NmValue::Int32(buf.get_u32().map_err(scalar_err)? as i32),
            6 => NmValue::UInt32(buf.get_u32().map_err(scalar_err)?),
            7 => NmValue::Int64(buf.get_u64().map_err(scalar_err)? as i64),
            8 => NmValue::UInt64(buf.get_u64().map_err(scalar_err)?),
            9 => NmValue::Bool(buf.get_u8().map_err(scalar_err)? != 0),
            10 => NmValue::Char(buf.get_u8().map_err(scalar_err)?),
            11 => NmValue::SChar(buf.get_u8().map_err(scalar_err)? as i8),
            12 => NmValue::UChar(buf.get_u8().map_err(scalar_err)?),
            13 => NmValue::Float(f32::from_bits(buf.get_u32().map_err(scalar_err)?)),
            14 => NmValue::Double(f64::from_bits(buf.get_u64().map_err(scalar_err)?)),
            15 => {
                let mut raw = vec![0u8; self.value_len];
                buf.get_bytes(&mut raw).map_err(scalar_err)?;
                match String::from_utf8(raw) {
                    Ok(s) => NmValue::Str(s),
                    Err(_) => {
                        debug!("nm: string value not utf-8");
                        return Err(RecvStatus::Invalid);
                    }
                }
            }
            16 => {
                let mut raw = vec![0u8; self.value_len];
                buf.get_bytes(&mut raw).map_err(scalar_err)?;
                NmValue::Blob(raw)
            }
            _ => return Err(RecvStatus::Invalid),
        })
    }

    /// The decoded message after a `Complete` run; re-arms the parser.
    pub fn take_msg(&mut self) -> Option<NmMessage> {
        if self.state != State::MsgComplete {
            return None;
        }
        self.state = State::MsgBegin;
        self.msg.take()
    }
}

#[cfg(test)]
mod tests {
    use netforge_core::ByteOrder;

    use super::*;

    fn sample_msg() -> NmMessage {
        let mut msg = NmMessage::new();
        msg.set_i8("INT8", -7);
        msg.set_u8("UINT8", 7);
        msg.set_i16("INT16", -15);
        msg.set_u16("UINT16", 15);
        msg.set_i32("INT32", -31);
        msg.set_u32("UINT32", 31);
        msg.set_i64("INT64", -63);
        msg.set_u64("UINT64", 63);
        msg.set_bool("BOOL", true);
        msg.set_char("CHAR", 63);
        msg.set_schar("SCHAR", -126);
        msg.set_uchar("UCHAR", 254);
        msg.set_f32("FLOAT", 1.23456);
        msg.set_f64("DOUBLE", 1.234_567_8);
        msg.set_str("STR", "Hello");
        msg.set_blob("BLOB", vec![0x54]);
        msg
    }

    #[test]
    fn roundtrip_all_types() {
        let msg = sample_msg();
        let mut buf = ByteBuf::new(ByteOrder::network());
        encode(&msg, &mut buf).unwrap();
        let decoded = decode(&mut buf).unwrap();

        assert_eq!(decoded.get_i8("INT8"), Some(-7));
        assert_eq!(decoded.get_u8("UINT8"), Some(7));
        assert_eq!(decoded.get_i16("INT16"), Some(-15));
        assert_eq!(decoded.get_u16("UINT16"), Some(15));
        assert_eq!(decoded.get_i32("INT32"), Some(-31));
        assert_eq!(decoded.get_u32("UINT32"), Some(31));
        assert_eq!(decoded.get_i64("INT64"), Some(-63));
        assert_eq!(decoded.get_u64("UINT64"), Some(63));
        assert_eq!(decoded.get_bool("BOOL"), Some(true));
        assert_eq!(decoded.get_char("CHAR"), Some(63));
        assert_eq!(decoded.get_schar("SCHAR"), Some(-126));
        assert_eq!(decoded.get_uchar("UCHAR"), Some(254));
        assert!((decoded.get_f32("FLOAT").unwrap() - 1.23456).abs() < 1e-4);
        assert!((decoded.get_f64("DOUBLE").unwrap() - 1.234_567_8).abs() < 1e-4);
        assert_eq!(decoded.get_str("STR"), Some("Hello"));
        assert_eq!(decoded.get_blob("BLOB"), Some(&[0x54][..]));
        assert_eq!(decoded, msg);
    }

    #[test]
    fn roundtrip_in_both_byte_orders() {
        let msg = sample_msg();
        for order in [ByteOrder::Big, ByteOrder::Little] {
            let mut buf = ByteBuf::new(order);
            encode(&msg, &mut buf).unwrap();
            assert_eq!(decode(&mut buf).unwrap(), msg);
        }
    }

    #[test]
    fn wire_prefix_is_magic_version_count() {
        let mut msg = NmMessage::new();
        msg.set_u8("a", 1);
        let mut buf = ByteBuf::new(ByteOrder::Big);
        encode(&msg, &mut buf).unwrap();
        assert_eq!(&buf.as_slice()[..4], &[0x56, 0x01, 0x00, 0x01]);
    }

    #[test]
    fn empty_message_roundtrips() {
        let msg = NmMessage::new();
        let mut buf = ByteBuf::new(ByteOrder::network());
        encode(&msg, &mut buf).unwrap();
        assert_eq!(buf.used(), 4);
        let decoded = decode(&mut buf).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn bad_magic_is_invalid() {
        let mut buf = ByteBuf::new(ByteOrder::network());
        buf.put_bytes(&[0x57, 0x01, 0, 0]).unwrap();
        let mut parser = NmParser::new();
        assert_eq!(parser.run(&mut buf), RecvStatus::Invalid);
    }

    #[test]
    fn zero_length_name_is_invalid() {
        let mut buf = ByteBuf::new(ByteOrder::network());
        buf.put_bytes(&[0x56, 0x01, 0, 1, 0]).unwrap();
        let mut parser = NmParser::new();
        assert_eq!(parser.run(&mut buf), RecvStatus::Invalid);
    }

    #[test]
    fn unknown_tag_is_invalid() {
        let mut buf = ByteBuf::new(ByteOrder::network());
        buf.put_bytes(&[0x56, 0x01, 0, 1, 1, b'x', 17]).unwrap();
        let mut parser = NmParser::new();
        assert_eq!(parser.run(&mut buf), RecvStatus::Invalid);
    }

    #[test]
    fn incremental_chunks_resume() {
        let msg = sample_msg();
        let mut full = ByteBuf::new(ByteOrder::network());
        encode(&msg, &mut full).unwrap();
        let bytes = full.as_slice().to_vec();

        let mut parser = NmParser::new();
        let mut buf = ByteBuf::new(ByteOrder::network());
        for chunk in bytes.chunks(3) {
            buf.put_bytes(chunk).unwrap();
            match parser.run(&mut buf) {
                RecvStatus::Again => {}
                RecvStatus::Complete => break,
                other => panic!("unexpected status {other:?}"),
            }
        }
        assert_eq!(parser.take_msg().unwrap(), msg);
    }

    #[test]
    fn back_to_back_messages_parse_sequentially() {
        let mut buf = ByteBuf::new(ByteOrder::network());
        let mut first = NmMessage::new();
        first.set_u32("seq", 1);
        let mut second = NmMessage::new();
        second.set_u32("seq", 2);
        encode(&first, &mut buf).unwrap();
        encode(&second, &mut buf).unwrap();

        let mut parser = NmParser::new();
        assert_eq!(parser.run(&mut buf), RecvStatus::Complete);
        assert_eq!(parser.take_msg().unwrap().get_u32("seq"), Some(1));
        assert_eq!(parser.run(&mut buf), RecvStatus::Complete);
        assert_eq!(parser.take_msg().unwrap().get_u32("seq"), Some(2));
    }
}
