use thiserror::Error;

/// Failure classes surfaced by the session core.
///
/// Capability failures are caught at the orchestration boundary and mapped
/// into these variants; raw provider errors never reach a connection loop.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no session found for canvas {0}")]
    SessionNotFound(String),

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("chat completion failed: {0}")]
    ChatCompletion(String),

    #[error("vision analysis failed: {0}")]
    VisionAnalysis(String),

    #[error("image generation failed: {0}")]
    ImageGeneration(String),

    #[error("image download failed: {0}")]
    Download(String),
}
