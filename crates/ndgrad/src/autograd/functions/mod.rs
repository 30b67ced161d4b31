//! Concrete backward nodes built by the metadata layer itself.

mod accumulate_grad;
mod as_strided;
mod copy_slices;

pub use accumulate_grad::AccumulateGrad;
pub use as_strided::AsStridedBackward;
pub use copy_slices::CopySlices;
