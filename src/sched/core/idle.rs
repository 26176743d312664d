//! VCPUs idle - fallback permanente de cada CPU
//!
//! Cada CPU possível tem uma VCPU idle, criada uma vez e NUNCA removida.
//! Todas pertencem ao domínio idle (`DomId::IDLE`), que não entra na lista
//! de domínios nem em pool algum.

use alloc::sync::Arc;

use crate::sched::domain::Domain;
use crate::sys::{CpuId, DomId, DomainHandle};

/// Cria o domínio idle com uma VCPU por CPU; a VCPU `n` mora na CPU `n`
pub fn create_idle_domain(nr_cpus: usize) -> Arc<Domain> {
    crate::kinfo!("(Idle) Criando VCPUs idle, total=", nr_cpus);

    let idle = Domain::new(DomId::IDLE, DomainHandle::default(), nr_cpus as u32);
    for v in idle.vcpus() {
        v.set_processor(v.vcpu_id() as CpuId);
        v.set_runnable(true);
    }
    idle
}

