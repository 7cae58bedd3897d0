pub mod audio;
pub mod config;
pub mod display;
pub mod encode;
pub mod exchange;
pub mod pacing;
pub mod present;
pub mod render;
pub mod session;

pub use config::RenderConfig;
pub use exchange::FeatureExchange;
pub use present::{FrameBuffer, PresentationBuffers};
pub use session::{ProducerMode, Session, SessionError, SessionOptions, SessionParts};
