//! Sequence-numbered framing over the radio

pub mod frame;
pub mod layer;

pub use frame::{Frame, FrameError, FrameType};
pub use layer::{LinkError, LinkLayer, LinkStats};
