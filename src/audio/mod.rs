pub mod block;
pub mod capture;
pub mod decode;
pub mod features;
pub mod quantize;
pub mod source;
pub mod spectrum;

pub use block::{AudioBlock, SampleLayout};
pub use features::{FeatureExtractor, FeatureSnapshot};
pub use source::{AudioSource, CaptureError, CaptureHandler, SourceEnd, StreamInfo};
