//! WebSocket frame parser and message assembler.

use netforge_core::ByteBuf;
use netforge_net::RecvStatus;
use tracing::debug;

use super::frame::{self, LEN7_MAX, LEN16_ID, LEN16_MAX, LEN64_ID, OPCODE_CLOSE, OPCODE_CONTINUE};
use super::{WsMessage, WsMsgType, WsMode};

const MSG_BUF_INIT: usize = 1024;
const MSG_BUF_MAX: usize = 65_536;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    MsgBegin,
    FrameBegin,
    FrameFinOpcode,
    FrameMaskLen7,
    FrameLen16,
    FrameLen64,
    FrameMask32,
    FramePayload,
    FrameFinishCtrl,
    FrameFinishData,
    FrameComplete,
    MsgComplete,
    Error,
}

/// Reassembles data messages from (possibly fragmented) frames and
/// surfaces control frames that arrive in between.
///
/// The assembly buffer starts small and grows up to a 64 KiB cap; a data
/// message larger than that is an error.
pub struct WsParser {
    mode: WsMode,
    stage: Stage,

    fin: bool,
    opcode: u8,
    masked: bool,
    payload_len: usize,
    payload_begin: usize,
    mask: u32,

    msg_buf: Vec<u8>,
    msg_frame_count: usize,
    msg_type: WsMsgType,

    ctrl_msg: Option<WsMessage>,
}

impl WsParser {
    pub fn new(mode: WsMode) -> Self {
        Self {
            mode,
            stage: Stage::MsgBegin,
            fin: false,
            opcode: 0,
            masked: false,
            payload_len: 0,
            payload_begin: 0,
            mask: 0,
            msg_buf: Vec::with_capacity(MSG_BUF_INIT),
            msg_frame_count: 0,
            msg_type: WsMsgType::Close,
            ctrl_msg: None,
        }
    }

    pub fn reset(&mut self) {
        self.stage = Stage::MsgBegin;
        self.msg_buf.clear();
        self.ctrl_msg = None;
    }

    /// Consumes frames from the buffer. `Complete` means a message is
    /// ready via [`take_msg`](Self::take_msg); control frames complete
    /// ahead of the data message they interleave with.
    pub fn run(&mut self, buf: &mut ByteBuf) -> RecvStatus {
        loop {
            match self.stage {
                Stage::MsgBegin => {
                    self.msg_buf.clear();
                    self.msg_frame_count = 0;
                    self.msg_type = WsMsgType::Close;
                    self.stage = Stage::FrameBegin;
                }

                Stage::FrameBegin => {
                    self.payload_begin = 0;
                    self.payload_len = 0;
                    self.stage = Stage::FrameFinOpcode;
                }

                Stage::FrameFinOpcode => {
                    if !buf.has_avail(1) {
                        return RecvStatus::Again;
                    }
                    let c = buf.get_u8().expect("availability checked");
                    self.fin = c & 0x80 != 0;
                    self.opcode = c & 0x0f;

                    if c & 0x70 != 0 {
                        debug!("ws: reserved bits set");
                        return self.invalid();
                    }
                    if self.opcode != OPCODE_CONTINUE && frame::kind_of(self.opcode).is_none() {
                        debug!(opcode = self.opcode, "ws: invalid opcode");
                        return self.invalid();
                    }
                    if frame::is_control(self.opcode) && !self.fin {
                        debug!("ws: fragmented control frame");
                        return self.invalid();
                    }
                    if self.opcode == OPCODE_CONTINUE && self.msg_frame_count < 1 {
                        debug!("ws: continuation without predecessor");
                        return self.invalid();
                    }
                    if self.msg_frame_count > 0
                        && self.opcode > OPCODE_CONTINUE
                        && self.opcode < OPCODE_CLOSE
                    {
                        debug!("ws: unfinished message not continued");
                        return self.invalid();
                    }

                    if self.msg_frame_count == 0 && self.opcode < OPCODE_CLOSE {
                        if let Some(kind) = frame::kind_of(self.opcode) {
                            self.msg_type = kind;
                        }
                    }
                    self.stage = Stage::FrameMaskLen7;
                }

                Stage::FrameMaskLen7 => {
                    if !buf.has_avail(1) {
                        return RecvStatus::Again;
                    }
                    let c = buf.get_u8().expect("availability checked");
                    self.masked = c & 0x80 != 0;
                    self.payload_len = (c & 0x7f) as usize;

                    if self.mode == WsMode::Server && !self.masked {
                        debug!("ws: client frame not masked");
                        return self.invalid();
                    }
                    if self.mode == WsMode::Client && self.masked {
                        debug!("ws: server frame masked");
                        return self.invalid();
                    }

                    self.stage = match self.payload_len {
                        LEN16_ID => Stage::FrameLen16,
                        LEN64_ID => Stage::FrameLen64,
                        _ => Stage::FrameMask32,
                    };
                }

                Stage::FrameLen16 => {
                    if !buf.has_avail(2) {
                        return RecvStatus::Again;
                    }
                    let hi = buf.get_u8().expect("availability checked") as usize;
                    let lo = buf.get_u8().expect("availability checked") as usize;
                    self.payload_len = (hi << 8) | lo;

                    // Must not fit the 7-bit encoding.
                    if self.payload_len <= LEN7_MAX {
                        return self.invalid();
                    }
                    self.stage = Stage::FrameMask32;
                }

                Stage::FrameLen64 => {
                    if !buf.has_avail(8) {
                        return RecvStatus::Again;
                    }
                    let mut len: u64 = 0;
                    for _ in 0..8 {
                        len = (len << 8) | u64::from(buf.get_u8().expect("availability checked"));
                    }
                    if len >> 63 != 0 {
                        return self.invalid();
                    }
                    // Must not fit the 16-bit encoding.
                    if len <= LEN16_MAX as u64 {
                        return self.invalid();
                    }
                    let Ok(len) = usize::try_from(len) else {
                        return self.invalid();
                    };
                    self.payload_len = len;
                    self.stage = Stage::FrameMask32;
                }

                Stage::FrameMask32 => {
                    if self.masked {
                        if !buf.has_avail(4) {
                            return RecvStatus::Again;
                        }
                        let mut mask: u32 = 0;
                        for _ in 0..4 {
                            mask = (mask << 8)
                                | u32::from(buf.get_u8().expect("availability checked"));
                        }
                        self.mask = mask;
                    }
                    self.payload_begin = buf.read_pos();
                    self.stage = Stage::FramePayload;
                }

                Stage::FramePayload => {
                    if !buf.has_avail(self.payload_len) {
                        return RecvStatus::Again;
                    }
                    if buf.mark_processed(self.payload_len).is_err() {
                        return RecvStatus::Error;
                    }
                    if self.masked {
                        let begin = self.payload_begin;
                        let len = self.payload_len;
                        frame::mask_payload(
                            &mut buf.as_mut_slice()[begin..begin + len],
                            self.mask,
                        );
                    }
                    self.stage = if frame::is_control(self.opcode) {
                        Stage::FrameFinishCtrl
                    } else {
                        Stage::FrameFinishData
                    };
                }

                Stage::FrameFinishCtrl => {
                    // Control frames are limited to short payloads.
                    if self.payload_len > LEN7_MAX {
                        return self.invalid();
                    }
                    if self.ctrl_msg.is_some() {
                        debug!("ws: unread control message pending");
                        return self.invalid();
                    }
                    let payload =
                        buf.as_slice()[self.payload_begin..self.payload_begin + self.payload_len]
                            .to_vec();
                    let kind = frame::kind_of(self.opcode).expect("control opcode validated");
                    self.ctrl_msg = Some(WsMessage::new(kind, payload));
                    self.stage = Stage::FrameComplete;
                }

                Stage::FrameFinishData => {
                    let needed = self.msg_buf.len() + self.payload_len;
                    if needed > MSG_BUF_MAX {
                        debug!(needed, "ws: message exceeds assembly cap");
                        return RecvStatus::Error;
                    }
                    self.msg_buf.extend_from_slice(
                        &buf.as_slice()[self.payload_begin..self.payload_begin + self.payload_len],
                    );
                    self.msg_frame_count += 1;
                    self.stage = Stage::FrameComplete;
                }

                Stage::FrameComplete => {
                    buf.discard_processed();
                    if self.ctrl_msg.is_some() {
                        self.stage = Stage::FrameBegin;
                        return RecvStatus::Complete;
                    }
                    self.stage = if self.fin { Stage::MsgComplete } else { Stage::FrameBegin };
                }

                Stage::MsgComplete => {
                    self.stage = Stage::MsgBegin;
                    return RecvStatus::Complete;
                }

                Stage::Error => return RecvStatus::Error,
            }
        }
    }

    /// Hands out the completed message: an interleaved control message
    /// first, otherwise the assembled data message.
    pub fn take_msg(&mut self) -> WsMessage {
        if let Some(ctrl) = self.ctrl_msg.take() {
            return ctrl;
        }
        let payload = std::mem::replace(&mut self.msg_buf, Vec::with_capacity(MSG_BUF_INIT));
        WsMessage::new(self.msg_type, payload)
    }

    fn invalid(&mut self) -> RecvStatus {
        self.stage = Stage::Error;
        RecvStatus::Invalid
    }
}

#[cfg(test)]
mod tests {
    use netforge_core::ByteOrder;

    use super::super::frame::write_frame;
    use super::*;

    fn buf_with(frames: &[&[u8]]) -> ByteBuf {
        let mut buf = ByteBuf::new(ByteOrder::network());
        for frame in frames {
            buf.put_bytes(frame).unwrap();
        }
        buf
    }

    #[test]
    fn decodes_masked_client_text() {
        let mut buf = ByteBuf::new(ByteOrder::network());
        write_frame(&mut buf, WsMsgType::Text, b"A", Some(0xCAFE_BABE)).unwrap();

        let mut parser = WsParser::new(WsMode::Server);
        assert_eq!(parser.run(&mut buf), RecvStatus::Complete);
        let msg = parser.take_msg();
        assert_eq!(msg.kind, WsMsgType::Text);
        assert_eq!(msg.payload, b"A");
    }

    #[test]
    fn decodes_unmasked_server_text() {
        let mut buf = ByteBuf::new(ByteOrder::network());
        write_frame(&mut buf, WsMsgType::Text, b"B", None).unwrap();

        let mut parser = WsParser::new(WsMode::Client);
        assert_eq!(parser.run(&mut buf), RecvStatus::Complete);
        let msg = parser.take_msg();
        assert_eq!(msg.kind, WsMsgType::Text);
        assert_eq!(msg.payload, b"B");
    }

    #[test]
    fn server_rejects_unmasked_input() {
        let mut buf = ByteBuf::new(ByteOrder::network());
        write_frame(&mut buf, WsMsgType::Text, b"x", None).unwrap();
        let mut parser = WsParser::new(WsMode::Server);
        assert_eq!(parser.run(&mut buf), RecvStatus::Invalid);
    }

    #[test]
    fn client_rejects_masked_input() {
        let mut buf = ByteBuf::new(ByteOrder::network());
        write_frame(&mut buf, WsMsgType::Text, b"x", Some(1)).unwrap();
        let mut parser = WsParser::new(WsMode::Client);
        assert_eq!(parser.run(&mut buf), RecvStatus::Invalid);
    }

    #[test]
    fn reserved_bits_are_invalid() {
        let mut buf = buf_with(&[&[0xC1, 0x00]]);
        let mut parser = WsParser::new(WsMode::Client);
        assert_eq!(parser.run(&mut buf), RecvStatus::Invalid);
    }

    #[test]
    fn fragmented_message_reassembles() {
        // "Hel" (TEXT, no FIN) + "lo" (CONTINUE, FIN).
        let mut buf = buf_with(&[&[0x01, 0x03], b"Hel", &[0x80, 0x02], b"lo"]);
        let mut parser = WsParser::new(WsMode::Client);
        assert_eq!(parser.run(&mut buf), RecvStatus::Complete);
        let msg = parser.take_msg();
        assert_eq!(msg.kind, WsMsgType::Text);
        assert_eq!(msg.payload, b"Hello");
    }

    #[test]
    fn control_frame_interleaves_with_fragments() {
        let mut buf = buf_with(&[
            &[0x01, 0x03],
            b"Hel",
            &[0x89, 0x04], // PING with FIN
            b"ping",
            &[0x80, 0x02],
            b"lo",
        ]);
        let mut parser = WsParser::new(WsMode::Client);

        assert_eq!(parser.run(&mut buf), RecvStatus::Complete);
        let ping = parser.take_msg();
        assert_eq!(ping.kind, WsMsgType::Ping);
        assert_eq!(ping.payload, b"ping");

        assert_eq!(parser.run(&mut buf), RecvStatus::Complete);
        let msg = parser.take_msg();
        assert_eq!(msg.kind, WsMsgType::Text);
        assert_eq!(msg.payload, b"Hello");
    }

    #[test]
    fn continuation_without_predecessor_is_invalid() {
        let mut buf = buf_with(&[&[0x80, 0x01], b"x"]);
        let mut parser = WsParser::new(WsMode::Client);
        assert_eq!(parser.run(&mut buf), RecvStatus::Invalid);
    }

    #[test]
    fn fragmented_control_frame_is_invalid() {
        let mut buf = buf_with(&[&[0x09, 0x00]]);
        let mut parser = WsParser::new(WsMode::Client);
        assert_eq!(parser.run(&mut buf), RecvStatus::Invalid);
    }

    #[test]
    fn sixteen_bit_length_boundaries() {
        // 126 bytes via the 16-bit encoding is the minimum valid use.
        let mut buf = ByteBuf::new(ByteOrder::network());
        buf.put_bytes(&[0x82, 126, 0x00, 126]).unwrap();
        buf.put_bytes(&vec![7u8; 126]).unwrap();
        let mut parser = WsParser::new(WsMode::Client);
        assert_eq!(parser.run(&mut buf), RecvStatus::Complete);

        // 125 encoded as 16-bit must be rejected.
        let mut buf = ByteBuf::new(ByteOrder::network());
        buf.put_bytes(&[0x82, 126, 0x00, 125]).unwrap();
        buf.put_bytes(&vec![7u8; 125]).unwrap();
        let mut parser = WsParser::new(WsMode::Client);
        assert_eq!(parser.run(&mut buf), RecvStatus::Invalid);
    }

    #[test]
    fn sixty_four_bit_length_boundaries() {
        // 65535 encoded as 64-bit is invalid, 65536 is fine but large;
        // use the header-only prefix to check validation short of data.
        let mut buf = ByteBuf::new(ByteOrder::network());
        buf.put_bytes(&[0x82, 127]).unwrap();
        buf.put_bytes(&65_535u64.to_be_bytes()).unwrap();
        let mut parser = WsParser::new(WsMode::Client);
        assert_eq!(parser.run(&mut buf), RecvStatus::Invalid);

        let mut buf = ByteBuf::new(ByteOrder::network());
        buf.put_bytes(&[0x82, 127]).unwrap();
        let mut len = 65_536u64.to_be_bytes();
        len[0] |= 0x80; // MSB set
        buf.put_bytes(&len).unwrap();
        let mut parser = WsParser::new(WsMode::Client);
        assert_eq!(parser.run(&mut buf), RecvStatus::Invalid);
    }

    #[test]
    fn partial_frame_reports_again() {
        let mut buf = buf_with(&[&[0x81]]);
        let mut parser = WsParser::new(WsMode::Client);
        assert_eq!(parser.run(&mut buf), RecvStatus::Again);
        buf.put_bytes(&[0x01, b'Z']).unwrap();
        assert_eq!(parser.run(&mut buf), RecvStatus::Complete);
        assert_eq!(parser.take_msg().payload, b"Z");
    }

    #[test]
    fn oversized_message_is_an_error() {
        // Two 40 KiB fragments overflow the 64 KiB assembly cap.
        let chunk = vec![0u8; 40 * 1024];
        let len = (chunk.len() as u16).to_be_bytes();
        let mut buf = ByteBuf::new(ByteOrder::network());
        buf.put_bytes(&[0x02, 126, len[0], len[1]]).unwrap();
        buf.put_bytes(&chunk).unwrap();
        buf.put_bytes(&[0x80, 126, len[0], len[1]]).unwrap();
        buf.put_bytes(&chunk).unwrap();

        let mut parser = WsParser::new(WsMode::Client);
        assert_eq!(parser.run(&mut buf), RecvStatus::Error);
    }
}
