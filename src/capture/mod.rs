//! Capture negotiation: acquiring an audio-bearing stream from the platform.

pub mod negotiator;

pub use negotiator::{
    AudioSourceId, CaptureError, CaptureNegotiator, CaptureRequest, CaptureSource,
    DisplayCapture, PromptError,
};
