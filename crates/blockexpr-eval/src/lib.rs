//! Block-scheduled evaluation engine for compiled expression plans.
//!
//! The evaluator walks the input in cache-sized blocks, dispatching
//! per-dtype kernels from a process-wide registry, with lazy coercion
//! temporaries drawn from a per-call buffer pool. Reductions keep rolling
//! accumulators merged in block order; ND plans evaluate only the valid
//! prefix of each (chunk, block) tile and zero the padding.

pub mod block;
pub mod buffer;
mod dsl;
pub mod kernels;
pub mod nd;
pub mod reduce;
pub mod registry;

pub use block::{evaluate, validate_call};
pub use buffer::{Buffer, BufferPool, Scalar};
pub use nd::{evaluate_nd, valid_nitems, zero_pad};
pub use reduce::Reduction;
pub use registry::KernelRegistry;
