//! Anvil - núcleo de escalonamento de CPU do hypervisor Redstone.
//!
//! Ponto central de exportação dos módulos.
//! Timers por CPU, interface de plugins de scheduler, o executivo cíclico
//! ARINC 653 e o gerenciador de pools de CPUs.

#![cfg_attr(not(any(test, feature = "sim")), no_std)]

// Habilitar alocação dinâmica (necessário para Vec/Box/Arc)
extern crate alloc;

// --- Base ---
pub mod hal; // Plataforma (relógio, timer de hardware, IPIs)
pub mod klib; // Utilitários internos (CpuMask)
pub mod sync; // Spinlocks
pub mod sys; // Tipos e erros

// --- Núcleo ---
pub mod core; // Logging, boot, SMP, timers, Machine
pub mod cpupool; // Pools de CPUs
pub mod sched; // Plugins de scheduler e dispatch

pub use crate::core::machine::Machine;
