//! Error types for ndgrad.

use thiserror::Error;

/// Coarse classification of an [`AutogradError`].
///
/// Every error is a caller contract violation detected synchronously; the
/// kind only says which contract was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation on an undefined handle, or a stale/out-of-range hook handle.
    InvalidState,
    /// Structural misuse that points at a bug in the calling code path.
    Logic,
    /// Semantic misuse that is not a precondition of a single call.
    Runtime,
}

/// Errors that can occur while manipulating autograd metadata.
#[derive(Debug, Error)]
pub enum AutogradError {
    /// Operation invoked on an undefined tensor handle.
    #[error("cannot call {op}() on undefined tensor")]
    UndefinedTensor { op: &'static str },

    /// Hook handle that was never issued for this tensor.
    #[error("invalid index, no hook at position {index}")]
    InvalidHookIndex { index: usize },

    /// Hook registration on a tensor that does not require gradient.
    #[error("cannot register a hook on a variable that doesn't require gradient")]
    HookRequiresGrad,

    /// Gradient accumulator requested for a non-leaf tensor.
    #[error("grad_accumulator() should be only called on leaf variables")]
    NotALeaf,

    /// Gradient edge without a function where one is mandatory.
    #[error("{op}() requires a gradient edge with a function")]
    MissingGradFn { op: &'static str },

    /// Broken internal invariant.
    #[error("internal assert failed: {message}")]
    InternalAssert { message: String },

    /// Base requested for a tensor that is not a view.
    #[error("can't get base of non-view variable")]
    NotAView,

    /// In-place function on a view that takes more than one gradient.
    #[error("functions which modify views in-place must return a single variable, got {num_inputs}")]
    MultiOutputInPlaceView { num_inputs: usize },

    /// requires_grad cleared on a tensor that has a producing node.
    #[error("you can only change requires_grad flags of leaf variables")]
    RequiresGradOnNonLeaf,

    /// Hook replaced a gradient with one of a different shape.
    #[error("hook changed gradient shape: expected {expected:?}, got {actual:?}")]
    HookShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Wrong number of indices provided.
    #[error("wrong number of indices: expected {expected}, got {actual}")]
    WrongNumberOfIndices { expected: usize, actual: usize },

    /// Slice range out of bounds.
    #[error("slice range {start}..{end} out of bounds for dimension {dim} with size {size}")]
    SliceOutOfBounds {
        start: usize,
        end: usize,
        dim: usize,
        size: usize,
    },

    /// View geometry reaches past the end of its storage.
    #[error("view needs {required} storage elements, storage has {available}")]
    ViewOutOfBounds { required: usize, available: usize },
}

impl AutogradError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UndefinedTensor { .. } | Self::InvalidHookIndex { .. } | Self::HookRequiresGrad => {
                ErrorKind::InvalidState
            }
            Self::NotALeaf | Self::MissingGradFn { .. } | Self::InternalAssert { .. } => {
                ErrorKind::Logic
            }
            Self::NotAView
            | Self::MultiOutputInPlaceView { .. }
            | Self::RequiresGradOnNonLeaf
            | Self::HookShapeMismatch { .. }
            | Self::WrongNumberOfIndices { .. }
            | Self::SliceOutOfBounds { .. }
            | Self::ViewOutOfBounds { .. } => ErrorKind::Runtime,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::InternalAssert {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let undefined = AutogradError::UndefinedTensor { op: "bump_version" };
        assert_eq!(undefined.kind(), ErrorKind::InvalidState);
        assert_eq!(AutogradError::NotALeaf.kind(), ErrorKind::Logic);
        assert_eq!(AutogradError::NotAView.kind(), ErrorKind::Runtime);
        assert_eq!(
            AutogradError::InvalidHookIndex { index: 3 }.kind(),
            ErrorKind::InvalidState
        );
    }

    #[test]
    fn test_error_messages() {
        let err = AutogradError::UndefinedTensor { op: "version_counter" };
        assert_eq!(
            err.to_string(),
            "cannot call version_counter() on undefined tensor"
        );
        let err = AutogradError::InvalidHookIndex { index: 7 };
        assert_eq!(err.to_string(), "invalid index, no hook at position 7");
    }
}
