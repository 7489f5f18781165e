//! MQTT-SN client engine
//!
//! Drives one session against a gateway with a strict single
//! outstanding request discipline: while a reply is awaited, further
//! reply-expecting requests are refused. The caller owns the clock;
//! [`MessageEngine::poll`] must be called periodically to drive
//! retransmission, and returns `false` exactly once when the retry
//! budget runs out and the session is declared lost.
//!
//! The engine never touches the radio directly. Outgoing bytes go
//! through a [`MessageSink`], which the link layer implements, so the
//! engine tests run against a plain in-memory sink.

use std::time::{Duration, Instant};

use heapless::Vec;
use log::{debug, info, warn};
use thiserror::Error;

use crate::config::mqttsn::{MAX_TOPICS, RETRY_BUDGET, RETRY_INTERVAL_MS};
use crate::link::layer::{LinkError, LinkLayer};
use crate::mqttsn::codec::{self, CodecError, MessageBuf};
use crate::mqttsn::types::{
    flags, ClientId, Message, MessageType, PublishData, ReturnCode, Topic, TopicName,
};
use crate::radio::traits::Radio;

/// Where encoded messages go
pub trait MessageSink {
    fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), LinkError>;
}

impl<R: Radio> MessageSink for LinkLayer<R> {
    fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.transmit(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A reply-expecting request is already outstanding
    #[error("a request is already awaiting its reply")]
    Busy,
    /// No free slot for another topic
    #[error("topic table full")]
    TableFull,
    /// A name or payload exceeds its fixed capacity
    #[error("field too long")]
    TooLong,
    /// Message could not be encoded
    #[error("encode failed: {0}")]
    Codec(#[from] CodecError),
    /// The sink refused the bytes
    #[error("send failed: {0}")]
    Link(#[from] LinkError),
}

/// Session activity reported to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A gateway advertised itself or answered a search
    GatewaySeen { gateway_id: u8 },
    /// CONNACK arrived for our CONNECT
    Connected { return_code: ReturnCode },
    /// A topic id is now usable, whether we or the gateway registered it
    TopicRegistered { topic_id: u16 },
    /// Application data published to us
    PublishReceived { topic_id: u16, data: PublishData },
    /// PUBACK arrived for our QoS 1 publish
    PublishAcked { return_code: ReturnCode },
    /// SUBACK arrived for our SUBSCRIBE
    SubscribeAcked { topic_id: u16, return_code: ReturnCode },
    /// UNSUBACK arrived for our UNSUBSCRIBE
    UnsubscribeAcked,
    /// PINGRESP arrived
    PingResponse,
    /// The gateway disconnected us (or confirmed our DISCONNECT)
    Disconnected,
}

/// Sentinel for a topic awaiting its id from the gateway
pub const TOPIC_UNASSIGNED: u16 = 0xffff;

/// One topic the session knows about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicEntry {
    pub name: TopicName,
    pub id: u16,
}

/// Retransmission tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Silence before the last message is resent, in milliseconds
    pub retry_interval_ms: u64,
    /// Resends allowed before the session is declared lost
    pub retry_budget: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: RETRY_INTERVAL_MS,
            retry_budget: RETRY_BUDGET,
        }
    }
}

/// MQTT-SN session state
pub struct MessageEngine {
    config: EngineConfig,
    /// Reply type currently awaited, if any. A fresh session waits for
    /// an ADVERTISE so it only speaks once a gateway is known.
    waiting_for: Option<MessageType>,
    retries_left: u8,
    last_send: Instant,
    last_message: MessageBuf,
    message_id: u16,
    gateway_id: u8,
    topics: Vec<TopicEntry, MAX_TOPICS>,
}

impl MessageEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            waiting_for: Some(MessageType::Advertise),
            retries_left: config.retry_budget,
            last_send: Instant::now(),
            last_message: MessageBuf::new(),
            message_id: 0,
            gateway_id: 0,
            topics: Vec::new(),
        }
    }

    /// True while a reply is outstanding
    pub fn waiting(&self) -> bool {
        self.waiting_for.is_some()
    }

    pub fn gateway_id(&self) -> u8 {
        self.gateway_id
    }

    pub fn topics(&self) -> &[TopicEntry] {
        &self.topics
    }

    /// Look up the id the gateway assigned to a topic name
    pub fn topic_id(&self, name: &str) -> Option<u16> {
        self.topics
            .iter()
            .find(|entry| entry.name.as_str() == name && entry.id != TOPIC_UNASSIGNED)
            .map(|entry| entry.id)
    }

    fn send_message<S: MessageSink>(&mut self, sink: &mut S, message: &Message) -> Result<(), EngineError> {
        let bytes = codec::encode(message)?;
        debug!("tx {:?}", message.message_type());
        sink.send_bytes(&bytes)?;
        self.last_message = bytes;
        self.last_send = Instant::now();
        Ok(())
    }

    fn send_request<S: MessageSink>(
        &mut self,
        sink: &mut S,
        message: &Message,
        expect: MessageType,
    ) -> Result<(), EngineError> {
        if self.waiting_for.is_some() {
            return Err(EngineError::Busy);
        }
        self.send_message(sink, message)?;
        self.waiting_for = Some(expect);
        self.retries_left = self.config.retry_budget;
        Ok(())
    }

    fn next_message_id(&mut self) -> u16 {
        self.message_id = self.message_id.wrapping_add(1);
        self.message_id
    }

    /// Broadcast a gateway search; the reply is a GWINFO.
    pub fn search_gateway<S: MessageSink>(&mut self, sink: &mut S, radius: u8) -> Result<(), EngineError> {
        self.send_request(sink, &Message::SearchGw { radius }, MessageType::GwInfo)
    }

    /// Open the session; the reply is a CONNACK.
    pub fn connect<S: MessageSink>(
        &mut self,
        sink: &mut S,
        connect_flags: u8,
        duration: u16,
        client_id: &str,
    ) -> Result<(), EngineError> {
        let client_id = ClientId::try_from(client_id).map_err(|_| EngineError::TooLong)?;
        self.send_request(
            sink,
            &Message::Connect { flags: connect_flags, duration, client_id },
            MessageType::Connack,
        )
    }

    /// Ask the gateway for an id for `name`; the reply is a REGACK.
    ///
    /// Returns `Ok(false)` without sending when a reply is already
    /// outstanding or the topic table is full, so callers can retry on
    /// their own schedule. The entry sits in the table unassigned until
    /// the matching REGACK fills its id in.
    pub fn register_topic<S: MessageSink>(&mut self, sink: &mut S, name: &str) -> Result<bool, EngineError> {
        if self.waiting_for.is_some() || self.topics.is_full() {
            return Ok(false);
        }
        let topic_name = TopicName::try_from(name).map_err(|_| EngineError::TooLong)?;
        let message_id = self.next_message_id();
        self.send_request(
            sink,
            &Message::Register { topic_id: 0, message_id, topic_name: topic_name.clone() },
            MessageType::Regack,
        )?;
        // Only a sent REGISTER earns a provisional entry; a refused
        // send must leave the table untouched.
        self.topics
            .push(TopicEntry { name: topic_name, id: TOPIC_UNASSIGNED })
            .map_err(|_| EngineError::TableFull)?;
        Ok(true)
    }

    /// Publish to a registered topic id.
    ///
    /// QoS 0 is fire-and-forget and is allowed even while a reply is
    /// outstanding; QoS 1 awaits a PUBACK and is subject to the single
    /// outstanding request rule.
    pub fn publish<S: MessageSink>(
        &mut self,
        sink: &mut S,
        publish_flags: u8,
        topic_id: u16,
        data: &[u8],
    ) -> Result<(), EngineError> {
        let qos = publish_flags & flags::QOS_MASK;
        let acked = qos == flags::QOS_1 || qos == flags::QOS_2;
        if acked && self.waiting_for.is_some() {
            return Err(EngineError::Busy);
        }
        let data = PublishData::from_slice(data).map_err(|_| EngineError::TooLong)?;
        let message_id = self.next_message_id();
        let message = Message::Publish { flags: publish_flags, topic_id, message_id, data };
        if acked {
            self.send_request(sink, &message, MessageType::Puback)
        } else {
            self.send_message(sink, &message)
        }
    }

    /// Subscribe by topic name or predefined id; the reply is a SUBACK.
    pub fn subscribe<S: MessageSink>(
        &mut self,
        sink: &mut S,
        subscribe_flags: u8,
        topic: Topic,
    ) -> Result<(), EngineError> {
        let message_id = self.next_message_id();
        self.send_request(
            sink,
            &Message::Subscribe { flags: subscribe_flags, message_id, topic },
            MessageType::Suback,
        )
    }

    /// Drop a subscription; the reply is an UNSUBACK.
    pub fn unsubscribe<S: MessageSink>(
        &mut self,
        sink: &mut S,
        unsubscribe_flags: u8,
        topic: Topic,
    ) -> Result<(), EngineError> {
        let message_id = self.next_message_id();
        self.send_request(
            sink,
            &Message::Unsubscribe { flags: unsubscribe_flags, message_id, topic },
            MessageType::Unsuback,
        )
    }

    /// Keepalive; the reply is a PINGRESP.
    pub fn ping<S: MessageSink>(&mut self, sink: &mut S, client_id: &str) -> Result<(), EngineError> {
        let client_id = ClientId::try_from(client_id).map_err(|_| EngineError::TooLong)?;
        self.send_request(sink, &Message::Pingreq { client_id }, MessageType::Pingresp)
    }

    /// Close the session; the gateway confirms with a DISCONNECT.
    pub fn disconnect<S: MessageSink>(&mut self, sink: &mut S, duration: Option<u16>) -> Result<(), EngineError> {
        self.send_request(sink, &Message::Disconnect { duration }, MessageType::Disconnect)
    }

    /// Drive retransmission.
    ///
    /// Call periodically. While a reply is outstanding and the retry
    /// interval has elapsed, the last message is resent verbatim until
    /// the budget runs out; then the session is declared lost and this
    /// returns `false`, exactly once. In every other case it returns
    /// `true`.
    pub fn poll<S: MessageSink>(&mut self, sink: &mut S) -> bool {
        if self.waiting_for.is_none() {
            return true;
        }
        if self.last_send.elapsed() < Duration::from_millis(self.config.retry_interval_ms) {
            return true;
        }
        if self.retries_left == 0 {
            warn!("retry budget exhausted awaiting {:?}; session lost", self.waiting_for);
            self.waiting_for = None;
            return false;
        }
        self.retries_left -= 1;
        // The initial ADVERTISE wait has nothing to resend
        if !self.last_message.is_empty() {
            debug!("resending last message, {} retries left", self.retries_left);
            let bytes = self.last_message.clone();
            if let Err(e) = sink.send_bytes(&bytes) {
                warn!("resend failed: {}", e);
            }
        }
        self.last_send = Instant::now();
        true
    }

    /// Feed one received message through the session.
    ///
    /// Requests from the gateway (PUBLISH, REGISTER, PINGREQ, will
    /// prompts) are answered regardless of what we are waiting for.
    /// A reply only clears the waiting state when its type matches the
    /// expected one (and, for REGACK, its message id matches the
    /// outstanding REGISTER); stray acks are dropped. Undecodable input
    /// is ignored, not an error.
    pub fn dispatch<S: MessageSink>(
        &mut self,
        sink: &mut S,
        bytes: &[u8],
    ) -> Result<Option<Event>, EngineError> {
        let message = match codec::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                debug!("ignoring undecodable message: {}", e);
                return Ok(None);
            }
        };
        debug!("rx {:?}", message.message_type());
        let expected = self.waiting_for;

        let event = match message {
            Message::Advertise { gateway_id, .. } => {
                self.gateway_id = gateway_id;
                if expected == Some(MessageType::Advertise) {
                    self.waiting_for = None;
                    info!("gateway {} advertised", gateway_id);
                    Some(Event::GatewaySeen { gateway_id })
                } else {
                    None
                }
            }
            Message::GwInfo { gateway_id } => {
                self.gateway_id = gateway_id;
                if expected == Some(MessageType::GwInfo) {
                    self.waiting_for = None;
                }
                Some(Event::GatewaySeen { gateway_id })
            }
            Message::Connack { return_code } if expected == Some(MessageType::Connack) => {
                self.waiting_for = None;
                info!("connected, gateway said {:?}", return_code);
                Some(Event::Connected { return_code })
            }
            Message::WillTopicReq => {
                // No will configured: an empty WILLTOPIC declines it
                self.send_message(sink, &Message::WillTopic { flags: 0, topic: TopicName::new() })?;
                None
            }
            Message::WillMsgReq => {
                self.send_message(sink, &Message::WillMsg { message: PublishData::new() })?;
                None
            }
            Message::Register { topic_id, message_id, topic_name } => {
                let known = self
                    .topics
                    .iter_mut()
                    .find(|entry| entry.name == topic_name)
                    .map(|entry| entry.id = topic_id)
                    .is_some();
                let return_code = if known || self.note_gateway_topic(&topic_name, topic_id) {
                    ReturnCode::Accepted
                } else {
                    ReturnCode::InvalidTopicId
                };
                self.send_message(sink, &Message::Regack { topic_id, message_id, return_code })?;
                if return_code == ReturnCode::Accepted {
                    Some(Event::TopicRegistered { topic_id })
                } else {
                    None
                }
            }
            Message::Regack { topic_id, message_id, return_code }
                if expected == Some(MessageType::Regack) && message_id == self.message_id =>
            {
                self.waiting_for = None;
                self.resolve_pending_topic(topic_id, return_code)
            }
            Message::Publish { flags: publish_flags, topic_id, message_id, data } => {
                if publish_flags & flags::QOS_MASK == flags::QOS_1 {
                    let return_code = if self.topics.iter().any(|entry| entry.id == topic_id) {
                        ReturnCode::Accepted
                    } else {
                        ReturnCode::InvalidTopicId
                    };
                    self.send_message(sink, &Message::Puback { topic_id, message_id, return_code })?;
                }
                Some(Event::PublishReceived { topic_id, data })
            }
            Message::Puback { return_code, .. } if expected == Some(MessageType::Puback) => {
                self.waiting_for = None;
                Some(Event::PublishAcked { return_code })
            }
            Message::Suback { topic_id, return_code, .. } if expected == Some(MessageType::Suback) => {
                self.waiting_for = None;
                Some(Event::SubscribeAcked { topic_id, return_code })
            }
            Message::Unsuback { .. } if expected == Some(MessageType::Unsuback) => {
                self.waiting_for = None;
                Some(Event::UnsubscribeAcked)
            }
            Message::Pingreq { .. } => {
                self.send_message(sink, &Message::Pingresp)?;
                None
            }
            Message::Pingresp if expected == Some(MessageType::Pingresp) => {
                self.waiting_for = None;
                Some(Event::PingResponse)
            }
            Message::Disconnect { .. } => {
                if expected == Some(MessageType::Disconnect) {
                    self.waiting_for = None;
                }
                info!("gateway closed the session");
                Some(Event::Disconnected)
            }
            // Stray acks and peer-role messages (CONNECT, SUBSCRIBE,
            // SEARCHGW, inbound will bodies) are dropped.
            _ => None,
        };
        Ok(event)
    }

    /// Fill in the provisional entry a REGACK answers.
    ///
    /// Only called for the REGACK whose message id matches the
    /// outstanding REGISTER; a stale one falls through dispatch without
    /// touching the entry. If the gateway hands back an id already in
    /// the table, the provisional entry is dropped as a duplicate.
    fn resolve_pending_topic(&mut self, topic_id: u16, return_code: ReturnCode) -> Option<Event> {
        if return_code != ReturnCode::Accepted {
            warn!("topic registration refused: {:?}", return_code);
            self.drop_provisional_topic();
            return None;
        }
        if self.topics.iter().any(|entry| entry.id == topic_id) {
            debug!("gateway reused topic id {}, dropping duplicate entry", topic_id);
            self.drop_provisional_topic();
            return Some(Event::TopicRegistered { topic_id });
        }
        if let Some(entry) = self.topics.iter_mut().rev().find(|entry| entry.id == TOPIC_UNASSIGNED) {
            entry.id = topic_id;
            info!("topic '{}' registered as id {}", entry.name, topic_id);
            return Some(Event::TopicRegistered { topic_id });
        }
        None
    }

    fn drop_provisional_topic(&mut self) {
        if let Some(index) = self.topics.iter().rposition(|entry| entry.id == TOPIC_UNASSIGNED) {
            self.topics.remove(index);
        }
    }

    /// Record a topic the gateway registered to us. Returns false when
    /// the table has no room, which the REGACK then reports.
    fn note_gateway_topic(&mut self, name: &TopicName, topic_id: u16) -> bool {
        self.topics.push(TopicEntry { name: name.clone(), id: topic_id }).is_ok()
    }
}

impl Default for MessageEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Captures everything the engine sends
    struct VecSink {
        sent: std::vec::Vec<std::vec::Vec<u8>>,
        fail: bool,
    }

    impl VecSink {
        fn new() -> Self {
            Self { sent: std::vec::Vec::new(), fail: false }
        }

        fn last_type(&self) -> MessageType {
            let bytes = self.sent.last().unwrap();
            MessageType::from_byte(bytes[1]).unwrap()
        }
    }

    impl MessageSink for VecSink {
        fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
            if self.fail {
                return Err(LinkError::Timeout);
            }
            self.sent.push(bytes.to_vec());
            Ok(())
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig { retry_interval_ms: 0, retry_budget: 3 }
    }

    /// Engine already past the initial ADVERTISE wait
    fn advertised_engine() -> (MessageEngine, VecSink) {
        let mut engine = MessageEngine::new(fast_config());
        let mut sink = VecSink::new();
        let advertise = codec::encode(&Message::Advertise { gateway_id: 1, duration: 900 }).unwrap();
        let event = engine.dispatch(&mut sink, &advertise).unwrap();
        assert_eq!(event, Some(Event::GatewaySeen { gateway_id: 1 }));
        (engine, sink)
    }

    fn feed(engine: &mut MessageEngine, sink: &mut VecSink, message: &Message) -> Option<Event> {
        let bytes = codec::encode(message).unwrap();
        engine.dispatch(sink, &bytes).unwrap()
    }

    #[test]
    fn fresh_session_waits_for_advertise() {
        let mut engine = MessageEngine::new(fast_config());
        let mut sink = VecSink::new();
        assert!(engine.waiting());
        assert_eq!(engine.connect(&mut sink, 0, 30, "node"), Err(EngineError::Busy));
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn single_outstanding_request_enforced() {
        let (mut engine, mut sink) = advertised_engine();
        engine.connect(&mut sink, flags::CLEAN_SESSION, 60, "node").unwrap();
        assert_eq!(engine.ping(&mut sink, "node"), Err(EngineError::Busy));
        assert_eq!(
            engine.subscribe(&mut sink, 0, Topic::Id(1)),
            Err(EngineError::Busy)
        );
        assert_eq!(sink.sent.len(), 1);

        feed(&mut engine, &mut sink, &Message::Connack { return_code: ReturnCode::Accepted });
        assert!(!engine.waiting());
        engine.ping(&mut sink, "node").unwrap();
    }

    #[test]
    fn only_the_matching_reply_clears_waiting() {
        let (mut engine, mut sink) = advertised_engine();
        engine.connect(&mut sink, 0, 60, "node").unwrap();

        // A stray PUBACK must not complete the CONNECT
        let stray = feed(&mut engine, &mut sink, &Message::Puback {
            topic_id: 1,
            message_id: 1,
            return_code: ReturnCode::Accepted,
        });
        assert_eq!(stray, None);
        assert!(engine.waiting());

        let event = feed(&mut engine, &mut sink, &Message::Connack { return_code: ReturnCode::Accepted });
        assert_eq!(event, Some(Event::Connected { return_code: ReturnCode::Accepted }));
        assert!(!engine.waiting());
    }

    #[test]
    fn retry_budget_then_session_lost_once() {
        let (mut engine, mut sink) = advertised_engine();
        engine.connect(&mut sink, 0, 60, "node").unwrap();
        assert_eq!(sink.sent.len(), 1);

        // Interval is zero, so each poll retries immediately
        assert!(engine.poll(&mut sink));
        assert!(engine.poll(&mut sink));
        assert!(engine.poll(&mut sink));
        assert_eq!(sink.sent.len(), 4);
        // Every resend is byte-identical to the original
        assert!(sink.sent[1..].iter().all(|m| *m == sink.sent[0]));

        // Budget exhausted: lost exactly once, then idle
        assert!(!engine.poll(&mut sink));
        assert!(engine.poll(&mut sink));
        assert_eq!(sink.sent.len(), 4);
        assert!(!engine.waiting());
    }

    #[test]
    fn poll_is_quiet_when_idle() {
        let (mut engine, mut sink) = advertised_engine();
        assert!(engine.poll(&mut sink));
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn register_topic_fills_id_from_matching_regack() {
        let (mut engine, mut sink) = advertised_engine();
        assert!(engine.register_topic(&mut sink, "sensors/rain").unwrap());
        assert_eq!(sink.last_type(), MessageType::Register);
        assert_eq!(engine.topic_id("sensors/rain"), None);

        // A stale ack from an earlier exchange carries the wrong
        // message id: the registration stays pending, untouched
        let event = feed(&mut engine, &mut sink, &Message::Regack {
            topic_id: 99,
            message_id: 0x999,
            return_code: ReturnCode::Accepted,
        });
        assert_eq!(event, None);
        assert!(engine.waiting());
        assert_eq!(engine.topics().len(), 1);
        assert_eq!(engine.topic_id("sensors/rain"), None);

        // The genuine ack still lands afterwards
        let message_id = {
            let bytes = sink.sent.last().unwrap();
            (u16::from(bytes[4]) << 8) | u16::from(bytes[5])
        };
        let event = feed(&mut engine, &mut sink, &Message::Regack {
            topic_id: 7,
            message_id,
            return_code: ReturnCode::Accepted,
        });
        assert_eq!(event, Some(Event::TopicRegistered { topic_id: 7 }));
        assert_eq!(engine.topic_id("sensors/rain"), Some(7));
        assert!(!engine.waiting());
    }

    #[test]
    fn refused_regack_with_matching_id_drops_entry() {
        let (mut engine, mut sink) = advertised_engine();
        assert!(engine.register_topic(&mut sink, "sensors/rain").unwrap());
        let message_id = {
            let bytes = sink.sent.last().unwrap();
            (u16::from(bytes[4]) << 8) | u16::from(bytes[5])
        };
        let event = feed(&mut engine, &mut sink, &Message::Regack {
            topic_id: 0,
            message_id,
            return_code: ReturnCode::NotSupported,
        });
        assert_eq!(event, None);
        assert!(!engine.waiting());
        assert!(engine.topics().is_empty());
    }

    #[test]
    fn failed_register_send_leaves_table_unchanged() {
        let (mut engine, mut sink) = advertised_engine();
        sink.fail = true;
        assert_eq!(
            engine.register_topic(&mut sink, "sensors/rain"),
            Err(EngineError::Link(LinkError::Timeout))
        );
        // No provisional entry, no waiting state to unstick
        assert!(engine.topics().is_empty());
        assert!(!engine.waiting());

        // Once the link recovers the same registration goes through
        sink.fail = false;
        assert!(engine.register_topic(&mut sink, "sensors/rain").unwrap());
        assert_eq!(engine.topics().len(), 1);
        assert!(engine.waiting());
    }

    #[test]
    fn register_topic_refuses_quietly_when_busy_or_full() {
        let (mut engine, mut sink) = advertised_engine();
        engine.connect(&mut sink, 0, 60, "node").unwrap();
        assert!(!engine.register_topic(&mut sink, "t").unwrap());
        assert_eq!(sink.sent.len(), 1);
    }

    #[test]
    fn duplicate_regack_id_drops_provisional_entry() {
        let (mut engine, mut sink) = advertised_engine();
        assert!(engine.register_topic(&mut sink, "a").unwrap());
        let regack = |engine: &mut MessageEngine, sink: &mut VecSink, topic_id| {
            let message_id = {
                let bytes = sink.sent.last().unwrap();
                (u16::from(bytes[4]) << 8) | u16::from(bytes[5])
            };
            feed(engine, sink, &Message::Regack {
                topic_id,
                message_id,
                return_code: ReturnCode::Accepted,
            })
        };
        regack(&mut engine, &mut sink, 3);
        assert!(engine.register_topic(&mut sink, "b").unwrap());
        regack(&mut engine, &mut sink, 3);
        // Only one entry holds id 3
        assert_eq!(engine.topics().iter().filter(|e| e.id == 3).count(), 1);
        assert_eq!(engine.topics().len(), 1);
    }

    #[test]
    fn qos0_publish_allowed_while_waiting() {
        let (mut engine, mut sink) = advertised_engine();
        engine.connect(&mut sink, 0, 60, "node").unwrap();
        engine.publish(&mut sink, flags::QOS_0, 5, b"data").unwrap();
        assert_eq!(sink.sent.len(), 2);
        // Still waiting for the CONNACK
        assert!(engine.waiting());
    }

    #[test]
    fn qos1_publish_awaits_puback() {
        let (mut engine, mut sink) = advertised_engine();
        engine.publish(&mut sink, flags::QOS_1, 5, b"data").unwrap();
        assert!(engine.waiting());
        let event = feed(&mut engine, &mut sink, &Message::Puback {
            topic_id: 5,
            message_id: 1,
            return_code: ReturnCode::Accepted,
        });
        assert_eq!(event, Some(Event::PublishAcked { return_code: ReturnCode::Accepted }));
        assert!(!engine.waiting());
    }

    #[test]
    fn inbound_qos1_publish_gets_puback() {
        let (mut engine, mut sink) = advertised_engine();
        // Gateway registers a topic to us first
        let event = feed(&mut engine, &mut sink, &Message::Register {
            topic_id: 9,
            message_id: 1,
            topic_name: TopicName::try_from("downlink").unwrap(),
        });
        assert_eq!(event, Some(Event::TopicRegistered { topic_id: 9 }));
        assert_eq!(sink.last_type(), MessageType::Regack);

        let event = feed(&mut engine, &mut sink, &Message::Publish {
            flags: flags::QOS_1,
            topic_id: 9,
            message_id: 2,
            data: PublishData::from_slice(b"on").unwrap(),
        });
        assert!(matches!(event, Some(Event::PublishReceived { topic_id: 9, .. })));
        assert_eq!(sink.last_type(), MessageType::Puback);
        // Accepted, since the topic is known
        assert_eq!(sink.sent.last().unwrap()[6], ReturnCode::Accepted as u8);
    }

    #[test]
    fn inbound_qos1_publish_on_unknown_topic_rejected() {
        let (mut engine, mut sink) = advertised_engine();
        feed(&mut engine, &mut sink, &Message::Publish {
            flags: flags::QOS_1,
            topic_id: 42,
            message_id: 2,
            data: PublishData::from_slice(b"x").unwrap(),
        });
        assert_eq!(sink.last_type(), MessageType::Puback);
        assert_eq!(sink.sent.last().unwrap()[6], ReturnCode::InvalidTopicId as u8);
    }

    #[test]
    fn gateway_requests_answered_while_waiting() {
        let (mut engine, mut sink) = advertised_engine();
        engine.connect(&mut sink, 0, 60, "node").unwrap();

        feed(&mut engine, &mut sink, &Message::WillTopicReq);
        assert_eq!(sink.last_type(), MessageType::WillTopic);
        feed(&mut engine, &mut sink, &Message::WillMsgReq);
        assert_eq!(sink.last_type(), MessageType::WillMsg);
        feed(&mut engine, &mut sink, &Message::Pingreq { client_id: ClientId::new() });
        assert_eq!(sink.last_type(), MessageType::Pingresp);

        // None of that completed the CONNECT
        assert!(engine.waiting());
    }

    #[test]
    fn disconnect_handshake() {
        let (mut engine, mut sink) = advertised_engine();
        engine.disconnect(&mut sink, None).unwrap();
        assert!(engine.waiting());
        let event = feed(&mut engine, &mut sink, &Message::Disconnect { duration: None });
        assert_eq!(event, Some(Event::Disconnected));
        assert!(!engine.waiting());
    }

    #[test]
    fn undecodable_input_is_ignored() {
        let (mut engine, mut sink) = advertised_engine();
        assert_eq!(engine.dispatch(&mut sink, &[0xff, 0xff, 0xff]).unwrap(), None);
        assert_eq!(engine.dispatch(&mut sink, &[]).unwrap(), None);
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn subscribe_and_unsubscribe_round_trip() {
        let (mut engine, mut sink) = advertised_engine();
        engine
            .subscribe(&mut sink, flags::QOS_1, Topic::Name(TopicName::try_from("cmds").unwrap()))
            .unwrap();
        let event = feed(&mut engine, &mut sink, &Message::Suback {
            flags: 0,
            topic_id: 11,
            message_id: 1,
            return_code: ReturnCode::Accepted,
        });
        assert_eq!(
            event,
            Some(Event::SubscribeAcked { topic_id: 11, return_code: ReturnCode::Accepted })
        );

        engine.unsubscribe(&mut sink, 0, Topic::Id(11)).unwrap();
        let event = feed(&mut engine, &mut sink, &Message::Unsuback { message_id: 2 });
        assert_eq!(event, Some(Event::UnsubscribeAcked));
        assert!(!engine.waiting());
    }
}
