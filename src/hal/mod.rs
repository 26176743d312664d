//! Hardware Abstraction Layer (HAL)
//!
//! O núcleo de escalonamento não fala com hardware diretamente: relógio,
//! identificação da CPU corrente, timer one-shot e IPIs passam pelo trait
//! [`Platform`], implementado pelo integrador.
//!
//! # Implementações
//! - `sim`: plataforma simulada para testes e para a feature `sim`

pub mod platform;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use platform::Platform;
