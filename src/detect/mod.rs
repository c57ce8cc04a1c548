mod backend;
mod backends;
pub mod names;
pub mod postprocess;
mod result;

pub use backend::{DetectParams, DetectorBackend, Device};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{Detection, FrameResult};
