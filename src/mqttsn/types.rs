//! MQTT-SN v1.2 message model
//!
//! Covers the subset a battery-powered endpoint talking to a gateway
//! needs: connection setup including will negotiation, topic
//! registration, QoS 0/1 publish, subscription management and keepalive.

use heapless::{String, Vec};

use crate::config::mqttsn::{MAX_CLIENT_ID, MAX_PUBLISH_DATA, MAX_TOPIC_NAME};

/// Wire values of the message type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Advertise = 0x00,
    SearchGw = 0x01,
    GwInfo = 0x02,
    Connect = 0x04,
    Connack = 0x05,
    WillTopicReq = 0x06,
    WillTopic = 0x07,
    WillMsgReq = 0x08,
    WillMsg = 0x09,
    Register = 0x0a,
    Regack = 0x0b,
    Publish = 0x0c,
    Puback = 0x0d,
    Subscribe = 0x12,
    Suback = 0x13,
    Unsubscribe = 0x14,
    Unsuback = 0x15,
    Pingreq = 0x16,
    Pingresp = 0x17,
    Disconnect = 0x18,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Advertise),
            0x01 => Some(Self::SearchGw),
            0x02 => Some(Self::GwInfo),
            0x04 => Some(Self::Connect),
            0x05 => Some(Self::Connack),
            0x06 => Some(Self::WillTopicReq),
            0x07 => Some(Self::WillTopic),
            0x08 => Some(Self::WillMsgReq),
            0x09 => Some(Self::WillMsg),
            0x0a => Some(Self::Register),
            0x0b => Some(Self::Regack),
            0x0c => Some(Self::Publish),
            0x0d => Some(Self::Puback),
            0x12 => Some(Self::Subscribe),
            0x13 => Some(Self::Suback),
            0x14 => Some(Self::Unsubscribe),
            0x15 => Some(Self::Unsuback),
            0x16 => Some(Self::Pingreq),
            0x17 => Some(Self::Pingresp),
            0x18 => Some(Self::Disconnect),
            _ => None,
        }
    }
}

/// Return codes carried in CONNACK, REGACK, PUBACK and SUBACK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReturnCode {
    Accepted = 0x00,
    Congestion = 0x01,
    InvalidTopicId = 0x02,
    NotSupported = 0x03,
}

impl ReturnCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Accepted),
            0x01 => Some(Self::Congestion),
            0x02 => Some(Self::InvalidTopicId),
            0x03 => Some(Self::NotSupported),
            _ => None,
        }
    }
}

/// Flag byte bits shared by CONNECT, PUBLISH and SUBSCRIBE
pub mod flags {
    pub const DUP: u8 = 0x80;
    pub const QOS_MASK: u8 = 0x60;
    pub const QOS_0: u8 = 0x00;
    pub const QOS_1: u8 = 0x20;
    pub const QOS_2: u8 = 0x40;
    pub const RETAIN: u8 = 0x10;
    pub const WILL: u8 = 0x08;
    pub const CLEAN_SESSION: u8 = 0x04;
    pub const TOPIC_ID_TYPE_MASK: u8 = 0x03;
    pub const TOPIC_NAME: u8 = 0x00;
    pub const TOPIC_PREDEFINED_ID: u8 = 0x01;
    pub const TOPIC_SHORT_NAME: u8 = 0x02;
}

pub type TopicName = String<MAX_TOPIC_NAME>;
pub type ClientId = String<MAX_CLIENT_ID>;
pub type PublishData = Vec<u8, MAX_PUBLISH_DATA>;

/// Topic reference in SUBSCRIBE and UNSUBSCRIBE: by name or by
/// predefined numeric id, chosen by the flag byte's topic id type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    Name(TopicName),
    Id(u16),
}

/// One parsed MQTT-SN message.
///
/// Multi-byte integers are big-endian on the wire. Optional trailing
/// fields the standard allows to be absent (DISCONNECT duration, the
/// PINGREQ client id) are modelled as empty or `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Advertise { gateway_id: u8, duration: u16 },
    SearchGw { radius: u8 },
    GwInfo { gateway_id: u8 },
    Connect { flags: u8, duration: u16, client_id: ClientId },
    Connack { return_code: ReturnCode },
    WillTopicReq,
    WillTopic { flags: u8, topic: TopicName },
    WillMsgReq,
    WillMsg { message: PublishData },
    Register { topic_id: u16, message_id: u16, topic_name: TopicName },
    Regack { topic_id: u16, message_id: u16, return_code: ReturnCode },
    Publish { flags: u8, topic_id: u16, message_id: u16, data: PublishData },
    Puback { topic_id: u16, message_id: u16, return_code: ReturnCode },
    Subscribe { flags: u8, message_id: u16, topic: Topic },
    Suback { flags: u8, topic_id: u16, message_id: u16, return_code: ReturnCode },
    Unsubscribe { flags: u8, message_id: u16, topic: Topic },
    Unsuback { message_id: u16 },
    Pingreq { client_id: ClientId },
    Pingresp,
    Disconnect { duration: Option<u16> },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Advertise { .. } => MessageType::Advertise,
            Message::SearchGw { .. } => MessageType::SearchGw,
            Message::GwInfo { .. } => MessageType::GwInfo,
            Message::Connect { .. } => MessageType::Connect,
            Message::Connack { .. } => MessageType::Connack,
            Message::WillTopicReq => MessageType::WillTopicReq,
            Message::WillTopic { .. } => MessageType::WillTopic,
            Message::WillMsgReq => MessageType::WillMsgReq,
            Message::WillMsg { .. } => MessageType::WillMsg,
            Message::Register { .. } => MessageType::Register,
            Message::Regack { .. } => MessageType::Regack,
            Message::Publish { .. } => MessageType::Publish,
            Message::Puback { .. } => MessageType::Puback,
            Message::Subscribe { .. } => MessageType::Subscribe,
            Message::Suback { .. } => MessageType::Suback,
            Message::Unsubscribe { .. } => MessageType::Unsubscribe,
            Message::Unsuback { .. } => MessageType::Unsuback,
            Message::Pingreq { .. } => MessageType::Pingreq,
            Message::Pingresp => MessageType::Pingresp,
            Message::Disconnect { .. } => MessageType::Disconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trip() {
        for byte in 0u8..=0x20 {
            if let Some(kind) = MessageType::from_byte(byte) {
                assert_eq!(kind as u8, byte);
            }
        }
        assert_eq!(MessageType::from_byte(0x03), None);
        assert_eq!(MessageType::from_byte(0xff), None);
    }

    #[test]
    fn return_code_round_trip() {
        for byte in 0u8..4 {
            assert_eq!(ReturnCode::from_byte(byte).unwrap() as u8, byte);
        }
        assert_eq!(ReturnCode::from_byte(4), None);
    }

    #[test]
    fn qos_bits_are_disjoint() {
        assert_eq!(flags::QOS_1 & flags::QOS_MASK, flags::QOS_1);
        assert_eq!(flags::QOS_2 & flags::QOS_MASK, flags::QOS_2);
        assert_eq!(flags::DUP & flags::QOS_MASK, 0);
        assert_eq!(flags::RETAIN & flags::QOS_MASK, 0);
    }
}
