//! Kernel Library (KLib).
//!
//! Utilitários agnósticos de hardware para uso interno do núcleo.

pub mod cpumask;

pub use cpumask::{CpuMask, MAX_CPUS};
