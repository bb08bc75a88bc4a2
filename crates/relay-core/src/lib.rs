pub mod ids;
pub mod message;

pub use ids::{EndpointId, MessageId, UserId};
pub use message::{ChatMessage, FrameError, InboundFrame, SYSTEM_SENDER};
