//! Tempo e Timers
//!
//! Serviço de timers one-shot por CPU (heap + lista de overflow + inativos)
//! e suas constantes.

pub mod heap;
pub mod timer;

#[cfg(test)]
mod test;

use crate::sys::{microsecs, STime};

pub use timer::{align_timer, Timer, TimerFn, TimerService, TimerStatus};

/// O hardware é programado este tanto depois do deadline mais próximo
pub const DEFAULT_TIMER_SLOP: STime = microsecs(50);

/// Fator de crescimento do heap: limite `(n + 1) * 16 - 1`
pub const HEAP_GROWTH_FACTOR: usize = 16;
