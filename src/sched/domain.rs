//! Domínios e VCPUs
//!
//! O mínimo do modelo de domínio de que o escalonamento precisa: identidade,
//! estado "morrendo", o pool ao qual o domínio está ligado (referência fraca),
//! as VCPUs com sua CPU atual e afinidade, e os dados privados do scheduler.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use super::plugin::SchedPriv;
use crate::core::smp::CpuTopology;
use crate::cpupool::CpuPool;
use crate::klib::CpuMask;
use crate::sync::Spinlock;
use crate::sys::{CpuId, DomId, DomainHandle, Errno, PoolId, SysResult};

pub struct Vcpu {
    vcpu_id: u32,
    dom_id: DomId,
    dom_handle: DomainHandle,
    domain: Weak<Domain>,
    processor: AtomicU32,
    runnable: AtomicBool,
    cpu_affinity: Spinlock<CpuMask>,
    pub(crate) sched_priv: Spinlock<Option<SchedPriv>>,
}

impl Vcpu {
    pub fn vcpu_id(&self) -> u32 {
        self.vcpu_id
    }

    pub fn dom_id(&self) -> DomId {
        self.dom_id
    }

    pub fn dom_handle(&self) -> DomainHandle {
        self.dom_handle
    }

    pub fn domain(&self) -> Option<Arc<Domain>> {
        self.domain.upgrade()
    }

    pub fn is_idle(&self) -> bool {
        self.dom_id == DomId::IDLE
    }

    /// CPU onde a VCPU roda ou rodará
    pub fn processor(&self) -> CpuId {
        self.processor.load(Ordering::Acquire)
    }

    pub fn set_processor(&self, cpu: CpuId) {
        self.processor.store(cpu, Ordering::Release);
    }

    /// Pronta para rodar (não bloqueada nem pausada)
    pub fn is_runnable(&self) -> bool {
        self.runnable.load(Ordering::Acquire)
    }

    pub(crate) fn set_runnable(&self, runnable: bool) {
        self.runnable.store(runnable, Ordering::Release);
    }

    pub fn cpu_affinity(&self) -> CpuMask {
        *self.cpu_affinity.lock()
    }

    pub fn set_cpu_affinity(&self, mask: CpuMask) {
        *self.cpu_affinity.lock() = mask;
    }

    /// Troca o dado privado do scheduler, devolvendo o antigo
    pub(crate) fn swap_sched_priv(&self, new: Option<SchedPriv>) -> Option<SchedPriv> {
        core::mem::replace(&mut *self.sched_priv.lock(), new)
    }
}

pub struct Domain {
    id: DomId,
    handle: DomainHandle,
    is_dying: AtomicBool,
    cpupool: Spinlock<Option<Weak<CpuPool>>>,
    vcpus: Vec<Arc<Vcpu>>,
    /// Bitmap de nós NUMA onde o domínio roda
    node_affinity: AtomicU64,
    pub(crate) sched_priv: Spinlock<Option<SchedPriv>>,
}

impl Domain {
    /// Cria o domínio com `nr_vcpus` VCPUs paradas, todas na CPU `0`
    pub fn new(id: DomId, handle: DomainHandle, nr_vcpus: u32) -> Arc<Domain> {
        Arc::new_cyclic(|weak| Domain {
            id,
            handle,
            is_dying: AtomicBool::new(false),
            cpupool: Spinlock::new(None),
            vcpus: (0..nr_vcpus)
                .map(|vcpu_id| {
                    Arc::new(Vcpu {
                        vcpu_id,
                        dom_id: id,
                        dom_handle: handle,
                        domain: weak.clone(),
                        processor: AtomicU32::new(0),
                        runnable: AtomicBool::new(false),
                        cpu_affinity: Spinlock::new(CpuMask::first_n(crate::klib::MAX_CPUS)),
                        sched_priv: Spinlock::new(None),
                    })
                })
                .collect(),
            node_affinity: AtomicU64::new(0),
            sched_priv: Spinlock::new(None),
        })
    }

    pub fn id(&self) -> DomId {
        self.id
    }

    pub fn handle(&self) -> DomainHandle {
        self.handle
    }

    pub fn is_dying(&self) -> bool {
        self.is_dying.load(Ordering::Acquire)
    }

    pub(crate) fn set_dying(&self) {
        self.is_dying.store(true, Ordering::Release);
    }

    pub fn vcpus(&self) -> &[Arc<Vcpu>] {
        &self.vcpus
    }

    pub fn vcpu(&self, vcpu_id: u32) -> Option<&Arc<Vcpu>> {
        self.vcpus.get(vcpu_id as usize)
    }

    /// Pool ao qual o domínio está ligado
    pub fn cpupool(&self) -> Option<Arc<CpuPool>> {
        self.cpupool.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Id do pool, sem segurar referência
    pub fn cpupool_id(&self) -> Option<PoolId> {
        self.cpupool().map(|c| c.id())
    }

    pub(crate) fn set_cpupool(&self, pool: Option<&Arc<CpuPool>>) {
        *self.cpupool.lock() = pool.map(Arc::downgrade);
    }

    pub(crate) fn swap_sched_priv(&self, new: Option<SchedPriv>) -> Option<SchedPriv> {
        core::mem::replace(&mut *self.sched_priv.lock(), new)
    }

    pub fn node_affinity(&self) -> u64 {
        self.node_affinity.load(Ordering::Acquire)
    }

    /// Recalcula os nós NUMA a partir da afinidade das VCPUs restrita às
    /// CPUs do pool (`pool_cpus`)
    pub fn update_node_affinity(&self, pool_cpus: &CpuMask, topology: &CpuTopology) {
        let mut cpus = CpuMask::new();
        for v in &self.vcpus {
            cpus = cpus.or(&v.cpu_affinity());
        }
        let cpus = cpus.and(pool_cpus);

        let mut nodes = 0u64;
        for cpu in cpus.iter() {
            nodes |= 1u64 << (topology.cpu_to_node(cpu) % 64);
        }
        self.node_affinity.store(nodes, Ordering::Release);
    }
}

/// Lista global de domínios, ordenada por id
pub struct DomainList {
    list: Spinlock<Vec<Arc<Domain>>>,
}

impl DomainList {
    pub const fn new() -> Self {
        Self {
            list: Spinlock::new(Vec::new()),
        }
    }

    /// `EEXIST` se o id já está em uso
    pub fn insert(&self, dom: Arc<Domain>) -> SysResult<()> {
        let mut list = self.list.lock();
        match list.binary_search_by_key(&dom.id(), |d| d.id()) {
            Ok(_) => Err(Errno::EEXIST),
            Err(pos) => {
                list.try_reserve(1)?;
                list.insert(pos, dom);
                Ok(())
            }
        }
    }

    pub fn remove(&self, id: DomId) -> Option<Arc<Domain>> {
        let mut list = self.list.lock();
        let pos = list.binary_search_by_key(&id, |d| d.id()).ok()?;
        Some(list.remove(pos))
    }

    pub fn get(&self, id: DomId) -> Option<Arc<Domain>> {
        let list = self.list.lock();
        list.binary_search_by_key(&id, |d| d.id())
            .ok()
            .map(|pos| list[pos].clone())
    }

    /// Domínios ligados a `pool`, em ordem de id
    pub fn in_pool(&self, pool: &Arc<CpuPool>) -> Vec<Arc<Domain>> {
        self.list
            .lock()
            .iter()
            .filter(|d| d.cpupool().is_some_and(|c| Arc::ptr_eq(&c, pool)))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Arc<Domain>> {
        self.list.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.list.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.lock().is_empty()
    }
}

impl Default for DomainList {
    fn default() -> Self {
        Self::new()
    }
}
