use thiserror::Error;

/// Errors returned by binding operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The model file or buffer was missing, unreadable, or failed engine
    /// validation.
    #[error("tflite: model load failed: {0}")]
    Load(String),

    /// A delegate back end is not present on this host (no accelerator
    /// device, secondary runtime not linked).
    #[error("tflite: delegate unavailable: {0}")]
    DelegateUnavailable(String),

    /// Sizing or laying out the tensor arena failed, e.g. because an
    /// operator has no kernel under the attached delegates.
    #[error("tflite: tensor allocation failed: {0}")]
    Allocation(String),

    /// The engine reported a graph execution failure. Output tensors are
    /// left in an unspecified state and must not be read.
    #[error("tflite: invoke failed: {0}")]
    Invoke(String),

    /// API misuse caught at the boundary: wrong typed accessor, tensor
    /// index out of range, invoke before allocate, size-mismatched copy.
    #[error("tflite: contract violation: {0}")]
    Contract(String),

    /// No engine entry-point table has been installed for this process.
    #[error("tflite: no engine installed")]
    EngineMissing,
}
