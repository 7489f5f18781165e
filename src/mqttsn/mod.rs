//! MQTT-SN v1.2 endpoint: message model, wire codec and session engine

pub mod codec;
pub mod engine;
pub mod types;

pub use codec::{CodecError, MessageBuf};
pub use engine::{EngineConfig, EngineError, Event, MessageEngine, MessageSink, TopicEntry};
pub use types::{Message, MessageType, ReturnCode, Topic};
