//! crates/podcast_core/src/codec.rs
//!
//! Byte-exact encoding and decoding of protocol frames.
//!
//! Layout (big-endian throughout):
//! ```text
//! byte0: version(4) | header_size(4)
//! byte1: type(4)    | flag(4)
//! byte2: serialization(4) | compression(4)
//! [(header_size - 1) * 4 reserved bytes]
//! [event: i32]                    iff flag has WithEvent
//! [session id: u32 len + utf8]    iff WithEvent and the event is session scoped
//! [connect id: u32 len + utf8]    iff WithEvent and the event is a connection response
//! [sequence: i32]                 iff data type and flag is PositiveSeq/NegativeSeq
//! [error code: u32]               iff type is Error
//! payload: u32 len + bytes
//! ```

use crate::frame::{
    Compression, DataType, Event, EventFrame, IdField, Message, MessageKind, MsgType, Sequence,
    Serialization, FLAG_SEQ_MASK, FLAG_WITH_EVENT,
};
use bytes::{BufMut, Bytes, BytesMut};

/// Errors produced while encoding or decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("data too short: expected at least 3 bytes, got {0}")]
    TooShort(usize),
    #[error("insufficient data for {0}")]
    InsufficientData(&'static str),
    #[error("unsupported message type: {0:#06b}")]
    UnsupportedType(u8),
    #[error("invalid header size: {0}")]
    InvalidHeaderSize(u8),
    #[error("{0} does not fit in 4 bits")]
    NibbleOverflow(&'static str),
    #[error("{0} is too large to encode")]
    TooLarge(&'static str),
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),
    /// The message would decode to a different value than the one encoded.
    #[error("{0} has no canonical wire form")]
    NonCanonical(&'static str),
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

const MIN_FRAME_LEN: usize = 3;

//=========================================================================================
// Encoding
//=========================================================================================

/// Encodes a message into its wire representation.
pub fn encode(msg: &Message) -> CodecResult<Bytes> {
    if msg.header_size == 0 || msg.header_size > 0x0F {
        return Err(CodecError::InvalidHeaderSize(msg.header_size));
    }
    let version = nibble(msg.version, "version")?;
    let serialization = nibble(msg.serialization.bits(), "serialization")?;
    let compression = nibble(msg.compression.bits(), "compression")?;
    if !msg.serialization.is_canonical() {
        return Err(CodecError::NonCanonical("serialization"));
    }
    if !msg.compression.is_canonical() {
        return Err(CodecError::NonCanonical("compression"));
    }
    if let Some(frame) = &msg.event {
        if !frame.is_canonical() {
            return Err(CodecError::NonCanonical("event"));
        }
    }

    let header_len = 4 * usize::from(msg.header_size);
    let mut buf = BytesMut::with_capacity(header_len + 32 + msg.payload.len());

    buf.put_u8((version << 4) | msg.header_size);
    buf.put_u8((msg.msg_type().bits() << 4) | msg.flag_bits());
    buf.put_u8((serialization << 4) | compression);
    buf.put_bytes(0, header_len - MIN_FRAME_LEN);

    if let Some(frame) = &msg.event {
        buf.put_i32(frame.event.code());
        match frame.event.id_field() {
            IdField::Absent => {}
            IdField::SessionId => {
                put_prefixed(&mut buf, id_bytes(frame), "session ID")?;
            }
            IdField::ConnectId => {
                put_prefixed(&mut buf, id_bytes(frame), "connect ID")?;
            }
        }
    }

    match msg.kind {
        MessageKind::Data { sequence, .. } => {
            if let Some(seq) = sequence.number() {
                buf.put_i32(seq);
            }
        }
        MessageKind::Error { code } => buf.put_u32(code),
    }

    put_prefixed(&mut buf, &msg.payload, "payload")?;
    Ok(buf.freeze())
}

fn nibble(value: u8, field: &'static str) -> CodecResult<u8> {
    if value > 0x0F {
        return Err(CodecError::NibbleOverflow(field));
    }
    Ok(value)
}

fn id_bytes(frame: &EventFrame) -> &[u8] {
    frame.id.as_deref().unwrap_or_default().as_bytes()
}

fn put_prefixed(buf: &mut BytesMut, data: &[u8], field: &'static str) -> CodecResult<()> {
    let len = u32::try_from(data.len()).map_err(|_| CodecError::TooLarge(field))?;
    buf.put_u32(len);
    buf.put_slice(data);
    Ok(())
}

//=========================================================================================
// Decoding
//=========================================================================================

/// Decodes one frame. Reserved header bytes are skipped without interpretation.
pub fn decode(data: &[u8]) -> CodecResult<Message> {
    if data.len() < MIN_FRAME_LEN {
        return Err(CodecError::TooShort(data.len()));
    }

    let version = data[0] >> 4;
    let header_size = data[0] & 0x0F;
    let type_bits = data[1] >> 4;
    let flag = data[1] & 0x0F;
    let serialization = Serialization::from_bits(data[2] >> 4);
    let compression = Compression::from_bits(data[2] & 0x0F);

    if header_size == 0 {
        return Err(CodecError::InvalidHeaderSize(header_size));
    }
    let msg_type = MsgType::from_bits(type_bits).ok_or(CodecError::UnsupportedType(type_bits))?;

    let mut reader = Reader::new(data);
    reader.take(4 * usize::from(header_size), "header")?;

    let event = if flag & FLAG_WITH_EVENT != 0 {
        let event = Event::from_code(reader.read_i32("event")?);
        let mut frame = EventFrame::new(event);
        if event.id_field() == IdField::SessionId {
            frame.id = reader.read_string("session ID size", "session ID")?;
        }
        if event.is_connection_response() {
            frame.id = reader.read_string("connect ID size", "connect ID")?;
        }
        Some(frame)
    } else {
        None
    };

    let kind = match DataType::from_msg_type(msg_type) {
        Some(data_type) => {
            let sequence = match flag & FLAG_SEQ_MASK {
                0b01 => Sequence::Positive(reader.read_i32("sequence")?),
                0b10 => Sequence::LastNoSeq,
                0b11 => Sequence::Negative(reader.read_i32("sequence")?),
                _ => Sequence::NoSeq,
            };
            MessageKind::Data {
                msg_type: data_type,
                sequence,
            }
        }
        None => MessageKind::Error {
            code: reader.read_u32("error code")?,
        },
    };

    let payload = reader.read_prefixed("payload size", "payload")?;

    Ok(Message {
        version,
        header_size,
        serialization,
        compression,
        kind,
        event,
        payload: Bytes::copy_from_slice(payload),
    })
}

/// A bounds-checked cursor over an inbound frame.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize, field: &'static str) -> CodecResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::InsufficientData(field))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_array(&mut self, field: &'static str) -> CodecResult<[u8; 4]> {
        let mut out = [0u8; 4];
        out.copy_from_slice(self.take(4, field)?);
        Ok(out)
    }

    fn read_i32(&mut self, field: &'static str) -> CodecResult<i32> {
        self.read_array(field).map(i32::from_be_bytes)
    }

    fn read_u32(&mut self, field: &'static str) -> CodecResult<u32> {
        self.read_array(field).map(u32::from_be_bytes)
    }

    fn read_prefixed(
        &mut self,
        size_field: &'static str,
        field: &'static str,
    ) -> CodecResult<&'a [u8]> {
        let len = self.read_u32(size_field)?;
        let len = usize::try_from(len).map_err(|_| CodecError::InsufficientData(field))?;
        self.take(len, field)
    }

    /// Reads a length-prefixed identifier; a zero length means "not set".
    fn read_string(
        &mut self,
        size_field: &'static str,
        field: &'static str,
    ) -> CodecResult<Option<String>> {
        let raw = self.read_prefixed(size_field, field)?;
        if raw.is_empty() {
            return Ok(None);
        }
        std::str::from_utf8(raw)
            .map(|s| Some(s.to_owned()))
            .map_err(|_| CodecError::InvalidUtf8(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_connection() -> Message {
        Message::client_event(Event::StartConnection).with_payload(&b"{}"[..])
    }

    #[test]
    fn start_connection_encodes_byte_exact() {
        let bytes = encode(&start_connection()).unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[
                0x11, 0x14, 0x10, 0x00, // header
                0x00, 0x00, 0x00, 0x01, // event
                0x00, 0x00, 0x00, 0x02, b'{', b'}', // payload
            ]
        );
    }

    #[test]
    fn start_session_carries_session_id() {
        let msg = Message::client_event(Event::StartSession)
            .with_event_id(Event::StartSession, "abc")
            .with_payload(&b"{}"[..]);
        let bytes = encode(&msg).unwrap();
        assert_eq!(&bytes[4..8], &100i32.to_be_bytes());
        assert_eq!(&bytes[8..12], &3u32.to_be_bytes());
        assert_eq!(&bytes[12..15], b"abc");
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn session_scoped_event_without_id_writes_zero_length() {
        let msg = Message::client_event(Event::FinishSession);
        let bytes = encode(&msg).unwrap();
        // header + event + empty id prefix + empty payload prefix
        assert_eq!(bytes.len(), 4 + 4 + 4 + 4);
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn decodes_connect_id_on_connection_responses() {
        let mut raw = vec![0x11, 0x94, 0x10, 0x00];
        raw.extend_from_slice(&50i32.to_be_bytes());
        raw.extend_from_slice(&4u32.to_be_bytes());
        raw.extend_from_slice(b"c-01");
        raw.extend_from_slice(&2u32.to_be_bytes());
        raw.extend_from_slice(b"{}");

        let msg = decode(&raw).unwrap();
        assert_eq!(msg.msg_type(), MsgType::FullServerResponse);
        assert_eq!(msg.event(), Some(Event::ConnectionStarted));
        assert_eq!(msg.connect_id(), Some("c-01"));
        assert_eq!(msg.session_id(), None);
        assert_eq!(msg.payload.as_ref(), b"{}");
        assert_eq!(encode(&msg).unwrap().as_ref(), raw.as_slice());
    }

    #[test]
    fn round_trips_every_type_flag_and_event_class() {
        let data_types = [
            DataType::FullClientRequest,
            DataType::AudioOnlyClient,
            DataType::FullServerResponse,
            DataType::AudioOnlyServer,
            DataType::FrontEndResultServer,
        ];
        let sequences = [
            Sequence::NoSeq,
            Sequence::Positive(7),
            Sequence::LastNoSeq,
            Sequence::Negative(-7),
        ];
        let events = [
            None,
            Some(EventFrame::new(Event::StartConnection)),
            Some(EventFrame::new(Event::FinishConnection)),
            Some(EventFrame::with_id(Event::ConnectionStarted, "conn")),
            Some(EventFrame::new(Event::ConnectionFailed)),
            Some(EventFrame::with_id(Event::ConnectionFinished, "conn")),
            Some(EventFrame::with_id(Event::StartSession, "sess")),
            Some(EventFrame::with_id(Event::PodcastRoundResponse, "sess")),
            Some(EventFrame::with_id(Event::Unknown(999), "sess")),
            Some(EventFrame::with_id(Event::SessionStarted, "")),
            Some(EventFrame::with_id(Event::StartConnection, "ignored")),
            Some(EventFrame::with_id(Event::FinishConnection, "ignored")),
        ];
        let metadata = [
            (Serialization::Json, Compression::None),
            (Serialization::Other(2), Compression::Other(4)),
            (Serialization::Custom, Compression::Gzip),
        ];

        let mut kinds: Vec<MessageKind> = data_types
            .iter()
            .flat_map(|&msg_type| {
                sequences
                    .iter()
                    .map(move |&sequence| MessageKind::Data { msg_type, sequence })
            })
            .collect();
        kinds.push(MessageKind::Error { code: 55_000_001 });

        for kind in kinds {
            for event in &events {
                for &(serialization, compression) in &metadata {
                    let mut msg = Message::new(kind).with_payload(vec![0xAB, 0xCD]);
                    msg.event = event.clone();
                    msg.serialization = serialization;
                    msg.compression = compression;
                    let bytes = encode(&msg).unwrap();
                    assert_eq!(decode(&bytes).unwrap(), msg, "round trip failed for {:?}", msg);
                }
            }
        }
    }

    #[test]
    fn frames_without_event_flag_have_no_event_bytes() {
        let msg = Message::data(DataType::FullServerResponse, Sequence::NoSeq)
            .with_payload(vec![9u8]);
        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes.len(), 4 + 4 + 1);
        assert_eq!(bytes[1] & FLAG_WITH_EVENT, 0);
    }

    #[test]
    fn only_error_frames_carry_an_error_code() {
        let data = encode(&Message::data(DataType::AudioOnlyServer, Sequence::NoSeq)).unwrap();
        assert_eq!(data.len(), 8);

        let error = encode(&Message::error(0xDEAD_BEEF)).unwrap();
        assert_eq!(error.len(), 12);
        assert_eq!(&error[4..8], &0xDEAD_BEEFu32.to_be_bytes());
    }

    #[test]
    fn sequence_only_written_for_signed_modes() {
        let last = encode(&Message::data(DataType::AudioOnlyClient, Sequence::LastNoSeq)).unwrap();
        assert_eq!(last.len(), 8);

        let positive =
            encode(&Message::data(DataType::AudioOnlyClient, Sequence::Positive(3))).unwrap();
        assert_eq!(positive.len(), 12);
        assert_eq!(&positive[4..8], &3i32.to_be_bytes());
    }

    #[test]
    fn reserved_header_bytes_are_skipped() {
        let mut raw = vec![0x12, 0x90, 0x10, 0x00, 0xFF, 0xEE, 0xDD, 0xCC];
        raw.extend_from_slice(&1u32.to_be_bytes());
        raw.push(0x42);

        let msg = decode(&raw).unwrap();
        assert_eq!(msg.header_size, 2);
        assert_eq!(msg.msg_type(), MsgType::FullServerResponse);
        assert_eq!(msg.payload.as_ref(), &[0x42]);

        let reencoded = encode(&msg).unwrap();
        assert_eq!(&reencoded[4..8], &[0, 0, 0, 0]);
        assert_eq!(&reencoded[8..], &raw[8..]);
    }

    #[test]
    fn truncated_frames_fail_instead_of_truncating() {
        let msg = Message::data(DataType::AudioOnlyServer, Sequence::Positive(1))
            .with_event_id(Event::PodcastRoundResponse, "session")
            .with_payload(vec![1u8, 2, 3, 4]);
        let bytes = encode(&msg).unwrap();

        for len in 0..bytes.len() {
            assert!(decode(&bytes[..len]).is_err(), "prefix of {} bytes decoded", len);
        }
        assert_eq!(
            decode(&bytes[..bytes.len() - 1]).unwrap_err(),
            CodecError::InsufficientData("payload")
        );
    }

    #[test]
    fn declared_header_longer_than_frame_is_rejected() {
        let raw = [0x13, 0x90, 0x10, 0x00, 0x00];
        assert_eq!(decode(&raw).unwrap_err(), CodecError::InsufficientData("header"));
    }

    #[test]
    fn unsupported_type_is_rejected() {
        let raw = [0x11, 0x30, 0x10, 0x00, 0, 0, 0, 0];
        assert_eq!(decode(&raw).unwrap_err(), CodecError::UnsupportedType(0b0011));
    }

    #[test]
    fn invalid_header_fields_fail_to_encode() {
        let mut msg = start_connection();
        msg.header_size = 0;
        assert_eq!(encode(&msg).unwrap_err(), CodecError::InvalidHeaderSize(0));

        let mut msg = start_connection();
        msg.version = 16;
        assert_eq!(encode(&msg).unwrap_err(), CodecError::NibbleOverflow("version"));
    }

    #[test]
    fn non_canonical_messages_fail_to_encode() {
        let mut empty_id = Message::client_event(Event::FinishSession);
        empty_id.event = Some(EventFrame {
            event: Event::FinishSession,
            id: Some(String::new()),
        });
        assert_eq!(encode(&empty_id).unwrap_err(), CodecError::NonCanonical("event"));

        let mut bootstrap_id = start_connection();
        bootstrap_id.event = Some(EventFrame {
            event: Event::StartConnection,
            id: Some("conn".to_string()),
        });
        assert_eq!(encode(&bootstrap_id).unwrap_err(), CodecError::NonCanonical("event"));

        let mut aliased_event = start_connection();
        aliased_event.event = Some(EventFrame::new(Event::Unknown(1)));
        assert_eq!(encode(&aliased_event).unwrap_err(), CodecError::NonCanonical("event"));

        let mut serialization = start_connection();
        serialization.serialization = Serialization::Other(1);
        assert_eq!(
            encode(&serialization).unwrap_err(),
            CodecError::NonCanonical("serialization")
        );

        let mut compression = start_connection();
        compression.compression = Compression::Other(1);
        assert_eq!(
            encode(&compression).unwrap_err(),
            CodecError::NonCanonical("compression")
        );
    }

    #[test]
    fn invalid_utf8_session_id_is_rejected() {
        let mut raw = vec![0x11, 0x94, 0x10, 0x00];
        raw.extend_from_slice(&150i32.to_be_bytes());
        raw.extend_from_slice(&2u32.to_be_bytes());
        raw.extend_from_slice(&[0xFF, 0xFE]);
        raw.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(decode(&raw).unwrap_err(), CodecError::InvalidUtf8("session ID"));
    }
}
