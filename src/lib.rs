//! Image captioning service.
//!
//! An uploaded image is decoded into an RGB pixel grid, handed to a
//! [`CaptionEngine`] that owns a pretrained [`CaptionModel`] on a dedicated
//! thread, and the generated caption is returned as JSON over HTTP.
//!
//! Backends:
//! * [`blip::BlipCaptioner`] - BLIP image captioning through candle (default)
//! * `paligemma::PaligemmaCaptioner` - PaliGemma through kornia-vlm, behind the
//!   `paligemma` feature

pub mod blip;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod messages;
pub mod model;
#[cfg(feature = "paligemma")]
pub mod paligemma;
pub mod server;

pub use config::{EngineConfig, ServerConfig};
pub use engine::{CaptionEngine, CaptionEngineResponse, CaptionEngineState, EngineError};
pub use error::CaptionError;
pub use model::CaptionModel;
