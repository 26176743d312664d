//! # Boot - Parâmetros de Inicialização
//!
//! Linha de comando do hipervisor → `BootParams`.

pub mod cmdline;

pub use cmdline::{BootParams, DEFAULT_NR_CPUS};
