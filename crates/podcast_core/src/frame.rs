//! crates/podcast_core/src/frame.rs
//!
//! Defines the in-memory model of a single protocol frame.
//!
//! The set of fields a frame physically carries depends on its type, flag and
//! event. The model encodes those rules in its shape: sequence numbers only exist
//! on data frames with a signed sequencing flag, error codes only on error frames,
//! and the event block only when the frame is tagged with an event.

use bytes::Bytes;
use std::fmt;

/// Protocol version written by this client.
pub const DEFAULT_VERSION: u8 = 1;

/// Header size multiplier (x4 bytes) written by this client.
pub const DEFAULT_HEADER_SIZE: u8 = 1;

/// Bit of the flag nibble marking a frame that carries an event block.
pub const FLAG_WITH_EVENT: u8 = 0b100;

/// Sequencing bits of the flag nibble.
pub const FLAG_SEQ_MASK: u8 = 0b011;

//=========================================================================================
// Message Types
//=========================================================================================

/// The 4-bit message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    FullClientRequest,
    AudioOnlyClient,
    FullServerResponse,
    AudioOnlyServer,
    FrontEndResultServer,
    Error,
}

impl MsgType {
    pub fn bits(self) -> u8 {
        match self {
            MsgType::FullClientRequest => 0b0001,
            MsgType::AudioOnlyClient => 0b0010,
            MsgType::FullServerResponse => 0b1001,
            MsgType::AudioOnlyServer => 0b1011,
            MsgType::FrontEndResultServer => 0b1100,
            MsgType::Error => 0b1111,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b0001 => Some(MsgType::FullClientRequest),
            0b0010 => Some(MsgType::AudioOnlyClient),
            0b1001 => Some(MsgType::FullServerResponse),
            0b1011 => Some(MsgType::AudioOnlyServer),
            0b1100 => Some(MsgType::FrontEndResultServer),
            0b1111 => Some(MsgType::Error),
            _ => None,
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MsgType::FullClientRequest => "FullClientRequest",
            MsgType::AudioOnlyClient => "AudioOnlyClient",
            MsgType::FullServerResponse => "FullServerResponse",
            MsgType::AudioOnlyServer => "AudioOnlyServer",
            MsgType::FrontEndResultServer => "FrontEndResultServer",
            MsgType::Error => "Error",
        };
        f.write_str(name)
    }
}

/// The message types that carry data and may carry a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    FullClientRequest,
    AudioOnlyClient,
    FullServerResponse,
    AudioOnlyServer,
    FrontEndResultServer,
}

impl From<DataType> for MsgType {
    fn from(value: DataType) -> Self {
        match value {
            DataType::FullClientRequest => MsgType::FullClientRequest,
            DataType::AudioOnlyClient => MsgType::AudioOnlyClient,
            DataType::FullServerResponse => MsgType::FullServerResponse,
            DataType::AudioOnlyServer => MsgType::AudioOnlyServer,
            DataType::FrontEndResultServer => MsgType::FrontEndResultServer,
        }
    }
}

impl DataType {
    /// Narrows a message type to its data variant. `None` for `MsgType::Error`.
    pub fn from_msg_type(msg_type: MsgType) -> Option<Self> {
        match msg_type {
            MsgType::FullClientRequest => Some(DataType::FullClientRequest),
            MsgType::AudioOnlyClient => Some(DataType::AudioOnlyClient),
            MsgType::FullServerResponse => Some(DataType::FullServerResponse),
            MsgType::AudioOnlyServer => Some(DataType::AudioOnlyServer),
            MsgType::FrontEndResultServer => Some(DataType::FrontEndResultServer),
            MsgType::Error => None,
        }
    }
}

/// Sequencing mode of a data frame. The signed modes carry the sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Sequence {
    #[default]
    NoSeq,
    Positive(i32),
    LastNoSeq,
    Negative(i32),
}

impl Sequence {
    pub fn bits(self) -> u8 {
        match self {
            Sequence::NoSeq => 0b00,
            Sequence::Positive(_) => 0b01,
            Sequence::LastNoSeq => 0b10,
            Sequence::Negative(_) => 0b11,
        }
    }

    /// The sequence number, present only for the signed modes.
    pub fn number(self) -> Option<i32> {
        match self {
            Sequence::Positive(n) | Sequence::Negative(n) => Some(n),
            Sequence::NoSeq | Sequence::LastNoSeq => None,
        }
    }
}

/// Type-dependent part of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Data { msg_type: DataType, sequence: Sequence },
    Error { code: u32 },
}

//=========================================================================================
// Payload Metadata
//=========================================================================================

/// Payload serialization tag. Advisory only; the codec never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Serialization {
    Raw,
    Json,
    Thrift,
    Custom,
    /// A value with no named variant.
    Other(u8),
}

impl Serialization {
    pub fn bits(self) -> u8 {
        match self {
            Serialization::Raw => 0,
            Serialization::Json => 0b1,
            Serialization::Thrift => 0b11,
            Serialization::Custom => 0b1111,
            Serialization::Other(bits) => bits,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Serialization::Raw,
            0b1 => Serialization::Json,
            0b11 => Serialization::Thrift,
            0b1111 => Serialization::Custom,
            other => Serialization::Other(other),
        }
    }

    /// False for an `Other` holding the bits of a named variant.
    pub fn is_canonical(self) -> bool {
        Self::from_bits(self.bits()) == self
    }
}

/// Payload compression tag. Advisory only; the codec never inflates payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    None,
    Gzip,
    Custom,
    /// A value with no named variant.
    Other(u8),
}

impl Compression {
    pub fn bits(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 0b1,
            Compression::Custom => 0b1111,
            Compression::Other(bits) => bits,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits {
            0 => Compression::None,
            0b1 => Compression::Gzip,
            0b1111 => Compression::Custom,
            other => Compression::Other(other),
        }
    }

    /// False for an `Other` holding the bits of a named variant.
    pub fn is_canonical(self) -> bool {
        Self::from_bits(self.bits()) == self
    }
}

//=========================================================================================
// Events
//=========================================================================================

macro_rules! events {
    ($($name:ident = $code:literal),+ $(,)?) => {
        /// The semantic tag carried by frames flagged `WithEvent`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Event {
            $($name,)+
            /// An event number this client does not know about.
            Unknown(i32),
        }

        impl Event {
            pub fn code(self) -> i32 {
                match self {
                    $(Event::$name => $code,)+
                    Event::Unknown(code) => code,
                }
            }

            pub fn from_code(code: i32) -> Self {
                match code {
                    $($code => Event::$name,)+
                    other => Event::Unknown(other),
                }
            }

            /// False for an `Unknown` holding the code of a named event.
            pub fn is_canonical(self) -> bool {
                Self::from_code(self.code()) == self
            }
        }

        impl fmt::Display for Event {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Event::$name => f.write_str(stringify!($name)),)+
                    Event::Unknown(code) => write!(f, "invalid event type: {}", code),
                }
            }
        }
    };
}

events! {
    None = 0,

    StartConnection = 1,
    FinishConnection = 2,
    ConnectionStarted = 50,
    ConnectionFailed = 51,
    ConnectionFinished = 52,

    StartSession = 100,
    CancelSession = 101,
    FinishSession = 102,
    SessionStarted = 150,
    SessionCanceled = 151,
    SessionFinished = 152,
    SessionFailed = 153,
    UsageResponse = 154,

    TaskRequest = 200,
    UpdateConfig = 201,
    AudioMuted = 250,

    SayHello = 300,
    TtsSentenceStart = 350,
    TtsSentenceEnd = 351,
    TtsResponse = 352,
    TtsEnded = 359,
    PodcastRoundStart = 360,
    PodcastRoundResponse = 361,
    PodcastRoundEnd = 362,
    PodcastEnd = 363,

    AsrInfo = 450,
    AsrResponse = 451,
    AsrEnded = 459,

    ChatTtsText = 500,
    ChatResponse = 550,
    ChatEnded = 559,

    SourceSubtitleStart = 650,
    SourceSubtitleResponse = 651,
    SourceSubtitleEnd = 652,
    TranslationSubtitleStart = 653,
    TranslationSubtitleResponse = 654,
    TranslationSubtitleEnd = 655,
}

/// Which identifier field follows the event number on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdField {
    /// Bootstrap events sent before any identifier is assigned.
    Absent,
    ConnectId,
    SessionId,
}

impl Event {
    /// Events exchanged before the server has assigned any identifier.
    pub fn is_pre_identifier(self) -> bool {
        matches!(
            self,
            Event::StartConnection
                | Event::FinishConnection
                | Event::ConnectionStarted
                | Event::ConnectionFailed
                | Event::ConnectionFinished
        )
    }

    /// Connection lifecycle responses, the only events carrying a connect id.
    pub fn is_connection_response(self) -> bool {
        matches!(
            self,
            Event::ConnectionStarted | Event::ConnectionFailed | Event::ConnectionFinished
        )
    }

    pub fn id_field(self) -> IdField {
        if self.is_connection_response() {
            IdField::ConnectId
        } else if self.is_pre_identifier() {
            IdField::Absent
        } else {
            IdField::SessionId
        }
    }
}

/// The event block of a frame: the event number and its identifier, if any.
///
/// `id` is the session id or the connect id depending on `event.id_field()`.
/// It is `None` for events that carry neither, and never `Some("")`: a
/// zero-length identifier on the wire decodes to `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventFrame {
    pub event: Event,
    pub id: Option<String>,
}

impl EventFrame {
    pub fn new(event: Event) -> Self {
        Self { event, id: None }
    }

    /// Attaches `id` where the event has an identifier field. Empty ids and
    /// ids on bootstrap events are dropped.
    pub fn with_id(event: Event, id: impl Into<String>) -> Self {
        let id = id.into();
        let id = match event.id_field() {
            IdField::Absent => None,
            _ if id.is_empty() => None,
            _ => Some(id),
        };
        Self { event, id }
    }

    /// True when the frame survives an encode/decode round trip unchanged.
    pub fn is_canonical(&self) -> bool {
        let id_ok = match (&self.id, self.event.id_field()) {
            (Some(_), IdField::Absent) => false,
            (Some(id), _) => !id.is_empty(),
            (None, _) => true,
        };
        id_ok && self.event.is_canonical()
    }
}

//=========================================================================================
// Message
//=========================================================================================

/// One frame of wire communication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: u8,
    /// Header block length in units of 4 bytes.
    pub header_size: u8,
    pub serialization: Serialization,
    pub compression: Compression,
    pub kind: MessageKind,
    /// Present exactly when the `WithEvent` flag bit is set.
    pub event: Option<EventFrame>,
    pub payload: Bytes,
}

impl Message {
    /// Creates a frame with this client's default header fields and an empty payload.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            version: DEFAULT_VERSION,
            header_size: DEFAULT_HEADER_SIZE,
            serialization: Serialization::Json,
            compression: Compression::None,
            kind,
            event: None,
            payload: Bytes::new(),
        }
    }

    pub fn data(msg_type: DataType, sequence: Sequence) -> Self {
        Self::new(MessageKind::Data { msg_type, sequence })
    }

    pub fn error(code: u32) -> Self {
        Self::new(MessageKind::Error { code })
    }

    /// A `FullClientRequest` control frame tagged with `event`.
    pub fn client_event(event: Event) -> Self {
        Self::data(DataType::FullClientRequest, Sequence::NoSeq).with_event(event)
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.event = Some(EventFrame::new(event));
        self
    }

    pub fn with_event_id(mut self, event: Event, id: impl Into<String>) -> Self {
        self.event = Some(EventFrame::with_id(event, id));
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn msg_type(&self) -> MsgType {
        match self.kind {
            MessageKind::Data { msg_type, .. } => msg_type.into(),
            MessageKind::Error { .. } => MsgType::Error,
        }
    }

    /// The 4-bit flag: sequencing bits plus the `WithEvent` bit.
    pub fn flag_bits(&self) -> u8 {
        let seq = match self.kind {
            MessageKind::Data { sequence, .. } => sequence.bits(),
            MessageKind::Error { .. } => 0,
        };
        if self.event.is_some() {
            seq | FLAG_WITH_EVENT
        } else {
            seq
        }
    }

    pub fn event(&self) -> Option<Event> {
        self.event.as_ref().map(|frame| frame.event)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.event
            .as_ref()
            .filter(|frame| frame.event.id_field() == IdField::SessionId)
            .and_then(|frame| frame.id.as_deref())
    }

    pub fn connect_id(&self) -> Option<&str> {
        self.event
            .as_ref()
            .filter(|frame| frame.event.id_field() == IdField::ConnectId)
            .and_then(|frame| frame.id.as_deref())
    }

    pub fn sequence(&self) -> Option<i32> {
        match self.kind {
            MessageKind::Data { sequence, .. } => sequence.number(),
            MessageKind::Error { .. } => None,
        }
    }

    pub fn error_code(&self) -> Option<u32> {
        match self.kind {
            MessageKind::Error { code } => Some(code),
            MessageKind::Data { .. } => None,
        }
    }

    /// True when the frame has exactly this type and event.
    pub fn is(&self, msg_type: MsgType, event: Event) -> bool {
        self.msg_type() == msg_type && self.event() == Some(event)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MsgType: {}, EventType: ", self.msg_type())?;
        match self.event() {
            Some(event) => write!(f, "{}", event)?,
            None => f.write_str("NoEvent")?,
        }

        match self.kind {
            MessageKind::Error { code } => write!(
                f,
                ", ErrorCode: {}, Payload: {}",
                code,
                String::from_utf8_lossy(&self.payload)
            ),
            MessageKind::Data { msg_type, sequence } => {
                if let Some(seq) = sequence.number() {
                    write!(f, ", Sequence: {}", seq)?;
                }
                match msg_type {
                    DataType::AudioOnlyClient | DataType::AudioOnlyServer => {
                        write!(f, ", PayloadSize: {}", self.payload.len())
                    }
                    _ => write!(f, ", Payload: {}", String::from_utf8_lossy(&self.payload)),
                }
            }
        }
    }
}
