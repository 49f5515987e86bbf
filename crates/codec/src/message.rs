//! Message envelopes: the logical kinds every transport carries.
//!
//! Document sync, ephemeral awareness, acknowledgements, file transfer,
//! request/response, and heartbeat pings all share one framed envelope so a
//! single channel (websocket frame, SSE event, POSTed batch) can carry any
//! of them interchangeably.

use bytes::{BufMut, Bytes, BytesMut};
use veil_primitives::{DocumentId, MessageId};

use crate::sync_step2::SyncStep2Frame;
use crate::update::{take_u8, UpdateFrame};
use crate::varint::{
    read_bytes, read_varstring, read_varuint, write_bytes, write_varstring, write_varuint,
};
use crate::{check_version, CodecError, PROTOCOL_VERSION};

const KIND_DOCUMENT: u8 = 0;
const KIND_AWARENESS: u8 = 1;
const KIND_ACK: u8 = 2;
const KIND_FILE: u8 = 3;
const KIND_REQUEST: u8 = 4;
const KIND_RESPONSE: u8 = 5;
const KIND_PING: u8 = 6;

const DOC_SYNC_STEP_1: u8 = 0;
const DOC_SYNC_STEP_2: u8 = 1;
const DOC_UPDATE: u8 = 2;
const DOC_SYNC_DONE: u8 = 3;

/// Body of a document-sync envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocMessage {
    /// State advertisement: "this is what I have."
    ///
    /// The vector bytes are opaque here: whether they decode as a
    /// snapshot-mode `(snapshot id, server version)` pair or as a Lamport
    /// max-counter map is agreed per document by the layers above.
    SyncStep1(Bytes),
    /// The content the advertiser was missing.
    SyncStep2(SyncStep2Frame),
    /// An incremental encrypted update (or snapshot).
    Update(UpdateFrame),
    /// The responder has nothing further for this exchange.
    SyncDone,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    Error,
    Stream,
}

impl ResponseStatus {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Error => 1,
            Self::Stream => 2,
        }
    }

    fn try_from_u8(byte: u8) -> Result<Self, CodecError> {
        match byte {
            0 => Ok(Self::Success),
            1 => Ok(Self::Error),
            2 => Ok(Self::Stream),
            _ => Err(CodecError::InvalidFrame("unknown response status")),
        }
    }
}

/// One transport-level message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Document {
        document: DocumentId,
        body: DocMessage,
    },
    Awareness {
        document: DocumentId,
        payload: Bytes,
    },
    Ack {
        message_id: MessageId,
    },
    File {
        payload: Bytes,
    },
    Request {
        method: String,
        request_id: u64,
        payload: Bytes,
    },
    Response {
        request_id: u64,
        status: ResponseStatus,
        payload: Bytes,
    },
    Ping,
}

impl Message {
    /// Whether this message awaits an acknowledgement once sent.
    ///
    /// Acks, awareness, and pings are fire-and-forget; everything else is
    /// tracked in-flight until the peer acknowledges it.
    #[must_use]
    pub const fn is_trackable(&self) -> bool {
        matches!(
            self,
            Self::Document { .. } | Self::File { .. } | Self::Request { .. } | Self::Response { .. }
        )
    }

    /// The document this message belongs to, when it belongs to one.
    #[must_use]
    pub const fn document(&self) -> Option<&DocumentId> {
        match self {
            Self::Document { document, .. } | Self::Awareness { document, .. } => Some(document),
            _ => None,
        }
    }

    /// Content address of the encoded envelope.
    #[must_use]
    pub fn id(&self) -> MessageId {
        MessageId::of(&self.encode())
    }

    pub fn encode_to(&self, buf: &mut BytesMut) {
        write_varuint(buf, PROTOCOL_VERSION);

        match self {
            Self::Document { document, body } => {
                buf.put_u8(KIND_DOCUMENT);
                write_varstring(buf, document.as_str());

                match body {
                    DocMessage::SyncStep1(vector) => {
                        buf.put_u8(DOC_SYNC_STEP_1);
                        write_bytes(buf, vector);
                    }
                    DocMessage::SyncStep2(frame) => {
                        buf.put_u8(DOC_SYNC_STEP_2);
                        frame.encode_to(buf);
                    }
                    DocMessage::Update(frame) => {
                        buf.put_u8(DOC_UPDATE);
                        frame.encode_to(buf);
                    }
                    DocMessage::SyncDone => buf.put_u8(DOC_SYNC_DONE),
                }
            }
            Self::Awareness { document, payload } => {
                buf.put_u8(KIND_AWARENESS);
                write_varstring(buf, document.as_str());
                write_bytes(buf, payload);
            }
            Self::Ack { message_id } => {
                buf.put_u8(KIND_ACK);
                write_varstring(buf, message_id.as_str());
            }
            Self::File { payload } => {
                buf.put_u8(KIND_FILE);
                write_bytes(buf, payload);
            }
            Self::Request {
                method,
                request_id,
                payload,
            } => {
                buf.put_u8(KIND_REQUEST);
                write_varstring(buf, method);
                write_varuint(buf, *request_id);
                write_bytes(buf, payload);
            }
            Self::Response {
                request_id,
                status,
                payload,
            } => {
                buf.put_u8(KIND_RESPONSE);
                write_varuint(buf, *request_id);
                buf.put_u8(status.as_u8());
                write_bytes(buf, payload);
            }
            Self::Ping => buf.put_u8(KIND_PING),
        }
    }

    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_to(&mut buf);
        buf.freeze()
    }

    pub fn decode_from(buf: &mut &[u8]) -> Result<Self, CodecError> {
        check_version(read_varuint(buf)?)?;

        match take_u8(buf)? {
            KIND_DOCUMENT => {
                let document = DocumentId::from(read_varstring(buf)?);

                let body = match take_u8(buf)? {
                    DOC_SYNC_STEP_1 => DocMessage::SyncStep1(read_bytes(buf)?),
                    DOC_SYNC_STEP_2 => DocMessage::SyncStep2(SyncStep2Frame::decode_from(buf)?),
                    DOC_UPDATE => DocMessage::Update(UpdateFrame::decode_from(buf)?),
                    DOC_SYNC_DONE => DocMessage::SyncDone,
                    _ => return Err(CodecError::InvalidFrame("unknown document message tag")),
                };

                Ok(Self::Document { document, body })
            }
            KIND_AWARENESS => Ok(Self::Awareness {
                document: DocumentId::from(read_varstring(buf)?),
                payload: read_bytes(buf)?,
            }),
            KIND_ACK => Ok(Self::Ack {
                message_id: MessageId::from(read_varstring(buf)?),
            }),
            KIND_FILE => Ok(Self::File {
                payload: read_bytes(buf)?,
            }),
            KIND_REQUEST => Ok(Self::Request {
                method: read_varstring(buf)?,
                request_id: read_varuint(buf)?,
                payload: read_bytes(buf)?,
            }),
            KIND_RESPONSE => Ok(Self::Response {
                request_id: read_varuint(buf)?,
                status: ResponseStatus::try_from_u8(take_u8(buf)?)?,
                payload: read_bytes(buf)?,
            }),
            KIND_PING => Ok(Self::Ping),
            _ => Err(CodecError::InvalidFrame("unknown message kind")),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut buf = bytes;
        let message = Self::decode_from(&mut buf)?;

        if !buf.is_empty() {
            return Err(CodecError::InvalidFrame("trailing bytes after frame"));
        }

        Ok(message)
    }
}

/// Frames already-encoded envelopes as one body (varuint count, then each
/// frame length-prefixed). The half-duplex and durable stream transports
/// POST these.
#[must_use]
pub fn encode_frame_batch(frames: &[Bytes]) -> Bytes {
    let mut buf = BytesMut::new();
    write_varuint(&mut buf, frames.len() as u64);

    for frame in frames {
        write_bytes(&mut buf, frame);
    }

    buf.freeze()
}

/// Splits a batch body back into its raw frames without interpreting them.
pub fn decode_frame_batch(bytes: &[u8]) -> Result<Vec<Bytes>, CodecError> {
    let mut buf = bytes;
    let len = read_varuint(&mut buf)?;

    let mut frames = Vec::new();

    for _ in 0..len {
        frames.push(read_bytes(&mut buf)?);
    }

    if !buf.is_empty() {
        return Err(CodecError::InvalidFrame("trailing bytes after batch"));
    }

    Ok(frames)
}

/// Encodes a batch of messages as one body.
#[must_use]
pub fn encode_batch(messages: &[Message]) -> Bytes {
    let frames: Vec<Bytes> = messages.iter().map(Message::encode).collect();

    encode_frame_batch(&frames)
}

pub fn decode_batch(bytes: &[u8]) -> Result<Vec<Message>, CodecError> {
    decode_frame_batch(bytes)?
        .iter()
        .map(|frame| Message::decode(frame))
        .collect()
}
