/// Arquivo: cpupool/mod.rs
///
/// Propósito: Pools de CPUs.
/// Um pool é uma partição exclusiva de CPUs físicas que roda uma instância
/// própria de scheduler. Domínios são ligados a exatamente um pool.
///
/// Detalhes de Implementação:
/// - Todo o estado de partição (lista de pools, CPUs livres, CPU em movimento,
///   CPUs travadas por hot-unplug) vive num único registro protegido por lock,
///   o `CpuPoolManager`, passado como `Arc`.
/// - A contagem de referências do pool é o `strong_count` do `Arc`: o registro
///   segura uma, cada chamador outra. A última a cair desliga o scheduler.
///
/// Módulos contidos:
/// - `manager`: criação/destruição, atribuição de CPUs e domínios.
/// - `hotplug`: reação a CPUs entrando e saindo do ar.
/// - `sysctl`: canal de controle.

pub mod hotplug;
pub mod manager;
pub mod sysctl;


use alloc::boxed::Box;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::klib::CpuMask;
use crate::sched::Scheduler;
use crate::sync::Spinlock;
use crate::sys::PoolId;

pub use hotplug::CpuAction;
pub use manager::CpuPoolManager;
pub use sysctl::{CpupoolOp, CpupoolReply, PoolInfo};

pub struct CpuPool {
    id: PoolId,
    pub(crate) sched: Spinlock<Box<dyn Scheduler>>,
    /// Só muda sob o lock do `CpuPoolManager`
    cpu_valid: Spinlock<CpuMask>,
    n_dom: AtomicU32,
}

impl CpuPool {
    pub(crate) fn new(id: PoolId, sched: Box<dyn Scheduler>) -> Self {
        Self {
            id,
            sched: Spinlock::new(sched),
            cpu_valid: Spinlock::new(CpuMask::new()),
            n_dom: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    /// CPUs atualmente no pool
    pub fn cpu_valid(&self) -> CpuMask {
        *self.cpu_valid.lock()
    }

    /// Domínios ligados ao pool
    pub fn n_dom(&self) -> u32 {
        self.n_dom.load(Ordering::Acquire)
    }

    pub fn sched_id(&self) -> u32 {
        self.sched.lock().sched_id()
    }

    pub(crate) fn set_cpu(&self, cpu: crate::sys::CpuId, present: bool) {
        let mut mask = self.cpu_valid.lock();
        if present {
            mask.set(cpu);
        } else {
            mask.clear(cpu);
        }
    }

    pub(crate) fn inc_dom(&self) {
        self.n_dom.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn dec_dom(&self) {
        let prev = self.n_dom.fetch_sub(1, Ordering::AcqRel);
        crate::bug_on!(prev == 0, "(Cpupool) n_dom negativo");
    }
}

impl Drop for CpuPool {
    fn drop(&mut self) {
        crate::kdebug!("(Cpupool) Última referência liberada, pool=", self.id.as_u32());
        self.sched.get_mut().deinit();
    }
}
