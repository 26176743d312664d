//! # Scheduler Subsystem
//!
//! Decide qual VCPU roda em cada CPU física e por quanto tempo.
//!
//! ## Arquitetura
//! - **Plugin:** toda política implementa [`plugin::Scheduler`]. Cada pool de
//!   CPUs tem sua própria instância, criada pelo [`registry::SchedulerRegistry`].
//! - **Dispatch:** [`core::SchedCore`] guarda o estado por CPU (VCPU atual,
//!   pool, dados privados) e arma o timer de scheduler no fim de cada fatia.
//! - **ARINC 653:** [`arinc653::Arinc653`] é o executivo cíclico estático, o
//!   scheduler padrão do pool 0.
//!
//! ## Ordem de locks
//! lock global de pools → estado de dispatch da CPU → lock do scheduler do
//! pool → dado privado da VCPU. Locks de timer são folhas.

pub mod arinc653;
pub mod config;
pub mod core;
pub mod domain;
pub mod plugin;
pub mod registry;

#[cfg(test)]
mod test;

pub use self::core::SchedCore;
pub use arinc653::Arinc653;
pub use domain::{Domain, DomainList, Vcpu};
pub use plugin::{
    Arinc653Schedule, DomainParams, GlobalParams, SchedPriv, ScheduleEntry, Scheduler,
    SchedulerOp, TaskSlice,
};
pub use registry::{SchedulerFactory, SchedulerRegistry};
