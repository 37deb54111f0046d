#[derive(thiserror::Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum EncoderError {
    #[error("Frame payload exceeds peer's max frame size")]
    MaxSizeExceeded,
}
