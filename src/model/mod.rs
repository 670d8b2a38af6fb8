//! Boundary to the external speech-recognition model.
//!
//! The model is opaque to the rest of the system: mono audio samples go in,
//! text plus segments plus a detected language come out. Backends implement
//! [`SpeechModel`]; the shipped backend ([`CommandModel`]) manages a pool of
//! external worker processes speaking hex-encoded MessagePack over stdio.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::ModelProfile;

pub mod command;

pub use command::{CommandModel, CommandModelConfig};

/// One window of mono audio submitted for transcription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Correlation id echoed back in the reply
    pub id: Uuid,
    /// Mono f32 samples
    pub audio: Vec<f32>,
    /// Sample rate (e.g. 16000)
    pub sample_rate: u32,
    /// BCP-47 language code, or None for auto-detection
    pub language_hint: Option<String>,
    pub model_profile: ModelProfile,
    pub enable_speaker_labels: bool,
}

impl ModelRequest {
    /// Serialize to MessagePack format
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize from MessagePack format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// A segment reported by the model, relative to the submitted window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSegment {
    /// Window-local speaker label, if diarization ran
    pub speaker: Option<String>,
    /// Seconds from the window start
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Model output for one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub text: String,
    /// Detected language (ISO 639-1), if reported
    pub language: Option<String>,
    /// Ordered segments; empty means the backend produced text only
    pub segments: Vec<ModelSegment>,
}

/// Failure reported by a model backend
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFailure {
    /// The submitted audio could not be processed at all
    #[error("unreadable input: {message}")]
    Input { message: String },
    /// Inference failed; retrying may help
    #[error("inference failed: {message}")]
    Model { message: String },
    /// The backend ran out of a resource (memory, process, time)
    #[error("resource exhausted: {message}")]
    Resource { message: String },
}

impl ModelFailure {
    pub fn input(message: impl Into<String>) -> Self {
        ModelFailure::Input {
            message: message.into(),
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        ModelFailure::Model {
            message: message.into(),
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        ModelFailure::Resource {
            message: message.into(),
        }
    }
}

/// Reply frame from a model process, correlated by request id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReply {
    pub id: Uuid,
    pub outcome: Result<ModelOutput, ModelFailure>,
}

impl ModelReply {
    /// Serialize to MessagePack format
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize from MessagePack format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// An opaque speech-recognition backend.
///
/// Implementations must be safe to call from concurrent workers: any model
/// cache is warmed once (first caller loads, later callers block until the
/// load completes) and read-only afterwards.
#[async_trait]
pub trait SpeechModel: Send + Sync {
    /// Load whatever the backend needs before the first transcription
    async fn warm(&self) -> Result<(), ModelFailure> {
        Ok(())
    }

    /// Transcribe one window of mono audio
    async fn transcribe(&self, request: ModelRequest) -> Result<ModelOutput, ModelFailure>;
}
