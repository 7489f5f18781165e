//! MQTT-SN wire codec
//!
//! Every message starts with `[length, type]` where the length byte
//! counts itself. Multi-byte integers are big-endian. Encoding targets
//! a fixed-capacity buffer sized to fit one link frame.

use heapless::Vec;
use thiserror::Error;

use crate::config::mqttsn::{MAX_MESSAGE_SIZE, PROTOCOL_ID};
use crate::mqttsn::types::{flags, Message, MessageType, PublishData, ReturnCode, Topic, TopicName};

/// Encoded message buffer
pub type MessageBuf = Vec<u8, MAX_MESSAGE_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Encoded form exceeds the buffer capacity
    #[error("message exceeds {MAX_MESSAGE_SIZE} bytes")]
    TooLong,
    /// Fewer bytes than the length byte (or the type's fixed layout) requires
    #[error("message truncated")]
    Truncated,
    /// Type byte this codec does not know
    #[error("unknown message type {0:#04x}")]
    UnknownType(u8),
    /// Return code outside the defined range
    #[error("undefined return code {0:#04x}")]
    BadReturnCode(u8),
    /// Topic or client id field is not valid UTF-8
    #[error("text field is not valid UTF-8")]
    BadString,
    /// A variable-length field exceeds its in-memory capacity
    #[error("field too long")]
    FieldTooLong,
}

fn put(buf: &mut MessageBuf, byte: u8) -> Result<(), CodecError> {
    buf.push(byte).map_err(|_| CodecError::TooLong)
}

fn put_u16(buf: &mut MessageBuf, value: u16) -> Result<(), CodecError> {
    put(buf, (value >> 8) as u8)?;
    put(buf, value as u8)
}

fn put_slice(buf: &mut MessageBuf, bytes: &[u8]) -> Result<(), CodecError> {
    buf.extend_from_slice(bytes).map_err(|_| CodecError::TooLong)
}

fn get_u16(bytes: &[u8], at: usize) -> u16 {
    (u16::from(bytes[at]) << 8) | u16::from(bytes[at + 1])
}

fn get_return_code(byte: u8) -> Result<ReturnCode, CodecError> {
    ReturnCode::from_byte(byte).ok_or(CodecError::BadReturnCode(byte))
}

fn get_text<const N: usize>(bytes: &[u8]) -> Result<heapless::String<N>, CodecError> {
    let text = core::str::from_utf8(bytes).map_err(|_| CodecError::BadString)?;
    heapless::String::try_from(text).map_err(|_| CodecError::FieldTooLong)
}

/// Serialize one message, filling in the length byte last.
pub fn encode(message: &Message) -> Result<MessageBuf, CodecError> {
    let mut buf = MessageBuf::new();
    put(&mut buf, 0)?; // length placeholder
    put(&mut buf, message.message_type() as u8)?;

    match message {
        Message::Advertise { gateway_id, duration } => {
            put(&mut buf, *gateway_id)?;
            put_u16(&mut buf, *duration)?;
        }
        Message::SearchGw { radius } => put(&mut buf, *radius)?,
        Message::GwInfo { gateway_id } => put(&mut buf, *gateway_id)?,
        Message::Connect { flags, duration, client_id } => {
            put(&mut buf, *flags)?;
            put(&mut buf, PROTOCOL_ID)?;
            put_u16(&mut buf, *duration)?;
            put_slice(&mut buf, client_id.as_bytes())?;
        }
        Message::Connack { return_code } => put(&mut buf, *return_code as u8)?,
        Message::WillTopicReq | Message::WillMsgReq | Message::Pingresp => {}
        Message::WillTopic { flags, topic } => {
            // An empty will topic is the header alone and deletes the will
            if !topic.is_empty() {
                put(&mut buf, *flags)?;
                put_slice(&mut buf, topic.as_bytes())?;
            }
        }
        Message::WillMsg { message } => put_slice(&mut buf, message)?,
        Message::Register { topic_id, message_id, topic_name } => {
            put_u16(&mut buf, *topic_id)?;
            put_u16(&mut buf, *message_id)?;
            put_slice(&mut buf, topic_name.as_bytes())?;
        }
        Message::Regack { topic_id, message_id, return_code } => {
            put_u16(&mut buf, *topic_id)?;
            put_u16(&mut buf, *message_id)?;
            put(&mut buf, *return_code as u8)?;
        }
        Message::Publish { flags, topic_id, message_id, data } => {
            put(&mut buf, *flags)?;
            put_u16(&mut buf, *topic_id)?;
            put_u16(&mut buf, *message_id)?;
            put_slice(&mut buf, data)?;
        }
        Message::Puback { topic_id, message_id, return_code } => {
            put_u16(&mut buf, *topic_id)?;
            put_u16(&mut buf, *message_id)?;
            put(&mut buf, *return_code as u8)?;
        }
        Message::Subscribe { flags, message_id, topic }
        | Message::Unsubscribe { flags, message_id, topic } => {
            put(&mut buf, *flags)?;
            put_u16(&mut buf, *message_id)?;
            match topic {
                Topic::Name(name) => put_slice(&mut buf, name.as_bytes())?,
                Topic::Id(id) => put_u16(&mut buf, *id)?,
            }
        }
        Message::Suback { flags, topic_id, message_id, return_code } => {
            put(&mut buf, *flags)?;
            put_u16(&mut buf, *topic_id)?;
            put_u16(&mut buf, *message_id)?;
            put(&mut buf, *return_code as u8)?;
        }
        Message::Unsuback { message_id } => put_u16(&mut buf, *message_id)?,
        Message::Pingreq { client_id } => put_slice(&mut buf, client_id.as_bytes())?,
        Message::Disconnect { duration } => {
            if let Some(duration) = duration {
                put_u16(&mut buf, *duration)?;
            }
        }
    }

    buf[0] = buf.len() as u8;
    Ok(buf)
}

/// Parse one message. Trailing bytes beyond the declared length are
/// ignored; a declared length beyond the supplied bytes is an error.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    if bytes.len() < 2 {
        return Err(CodecError::Truncated);
    }
    let declared = bytes[0] as usize;
    if declared < 2 || declared > bytes.len() {
        return Err(CodecError::Truncated);
    }
    let body = &bytes[..declared];
    let kind = MessageType::from_byte(body[1]).ok_or(CodecError::UnknownType(body[1]))?;

    let need = |len: usize| if body.len() >= len { Ok(()) } else { Err(CodecError::Truncated) };

    let message = match kind {
        MessageType::Advertise => {
            need(5)?;
            Message::Advertise { gateway_id: body[2], duration: get_u16(body, 3) }
        }
        MessageType::SearchGw => {
            need(3)?;
            Message::SearchGw { radius: body[2] }
        }
        MessageType::GwInfo => {
            need(3)?;
            Message::GwInfo { gateway_id: body[2] }
        }
        MessageType::Connect => {
            need(6)?;
            Message::Connect {
                flags: body[2],
                duration: get_u16(body, 4),
                client_id: get_text(&body[6..])?,
            }
        }
        MessageType::Connack => {
            need(3)?;
            Message::Connack { return_code: get_return_code(body[2])? }
        }
        MessageType::WillTopicReq => Message::WillTopicReq,
        MessageType::WillTopic => {
            if body.len() == 2 {
                Message::WillTopic { flags: 0, topic: TopicName::new() }
            } else {
                need(3)?;
                Message::WillTopic { flags: body[2], topic: get_text(&body[3..])? }
            }
        }
        MessageType::WillMsgReq => Message::WillMsgReq,
        MessageType::WillMsg => Message::WillMsg {
            message: PublishData::from_slice(&body[2..]).map_err(|_| CodecError::FieldTooLong)?,
        },
        MessageType::Register => {
            need(6)?;
            Message::Register {
                topic_id: get_u16(body, 2),
                message_id: get_u16(body, 4),
                topic_name: get_text(&body[6..])?,
            }
        }
        MessageType::Regack => {
            need(7)?;
            Message::Regack {
                topic_id: get_u16(body, 2),
                message_id: get_u16(body, 4),
                return_code: get_return_code(body[6])?,
            }
        }
        MessageType::Publish => {
            need(7)?;
            Message::Publish {
                flags: body[2],
                topic_id: get_u16(body, 3),
                message_id: get_u16(body, 5),
                data: PublishData::from_slice(&body[7..]).map_err(|_| CodecError::FieldTooLong)?,
            }
        }
        MessageType::Puback => {
            need(7)?;
            Message::Puback {
                topic_id: get_u16(body, 2),
                message_id: get_u16(body, 4),
                return_code: get_return_code(body[6])?,
            }
        }
        MessageType::Subscribe | MessageType::Unsubscribe => {
            need(5)?;
            let msg_flags = body[2];
            let message_id = get_u16(body, 3);
            let topic = if msg_flags & flags::TOPIC_ID_TYPE_MASK == flags::TOPIC_PREDEFINED_ID {
                need(7)?;
                Topic::Id(get_u16(body, 5))
            } else {
                Topic::Name(get_text(&body[5..])?)
            };
            if kind == MessageType::Subscribe {
                Message::Subscribe { flags: msg_flags, message_id, topic }
            } else {
                Message::Unsubscribe { flags: msg_flags, message_id, topic }
            }
        }
        MessageType::Suback => {
            need(8)?;
            Message::Suback {
                flags: body[2],
                topic_id: get_u16(body, 3),
                message_id: get_u16(body, 5),
                return_code: get_return_code(body[7])?,
            }
        }
        MessageType::Unsuback => {
            need(4)?;
            Message::Unsuback { message_id: get_u16(body, 2) }
        }
        MessageType::Pingreq => Message::Pingreq { client_id: get_text(&body[2..])? },
        MessageType::Pingresp => Message::Pingresp,
        MessageType::Disconnect => {
            if body.len() >= 4 {
                Message::Disconnect { duration: Some(get_u16(body, 2)) }
            } else {
                Message::Disconnect { duration: None }
            }
        }
    };
    Ok(message)
}
