//! Constantes de configuração do Scheduler

use crate::sys::{millisecs, STime};

/// Maior tabela ARINC 653 aceita
pub const ARINC653_MAX_DOMAINS_PER_SCHEDULE: usize = 64;

/// Ids de VCPU válidos são `0..MAX_VIRT_CPUS`
pub const MAX_VIRT_CPUS: u32 = 128;

/// Major frame e runtime da entrada padrão da tabela ARINC 653
pub const DEFAULT_TIMESLICE: STime = millisecs(10);

/// `opt_name` do scheduler padrão (pool 0)
pub const DEFAULT_SCHEDULER: &str = "arinc653";

/// Id numérico do ARINC 653 no canal de controle
pub const SCHED_ID_ARINC653: u32 = 7;

/// VCPUs do domínio de sistema criados no boot
pub const DEFAULT_DOM0_VCPUS: u32 = 1;
