//! # Synchronization Primitives
//!
//! Primitivas de sincronização para ambiente SMP.
//!
//! ## Regras
//!
//! - **Spinlock**: único tipo de lock do núcleo; nenhuma operação dorme.
//! - **Ordem de Lock**: quando duas estruturas por-CPU são travadas juntas, SEMPRE
//!   em ordem crescente de id de CPU (`lock_pair`).
//! - **Hierarquia**: lock global de pools → lock de dispatch da CPU → lock do
//!   scheduler do pool → dados privados de VCPU. Timers são folha.
//! - **Esperas**: `kill_timer` e a remoção de CPU de pool giram SEM lock algum.

/// Spinlock (busy-wait, não dorme)
pub mod spinlock;

pub use spinlock::{lock_pair, Spinlock, SpinlockGuard};
