//! Tensor runtime facade over ONNX Runtime
//!
//! Wraps `ort` sessions behind a name-indexed manager that caches
//! input/output metadata at load time, and provides the tensor
//! construction/extraction helpers the generation loop depends on
//! (owned tensors, zero-sized KV-cache placeholders, transparent fp16
//! upcasting).

pub mod session;
pub mod tensor;

pub use session::{ElemType, ModelHandle, SessionManager, SessionManagerOptions};
