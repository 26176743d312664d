/// Arquivo: cpupool/manager.rs
///
/// Propósito: Registro de pools e as operações que mudam a partição.
///
/// Detalhes de Implementação:
/// - Um único lock (`state`) protege lista de pools, CPUs livres, CPUs
///   travadas, a CPU em movimento e o ponteiro de pool por CPU.
/// - Invariante de partição: cada CPU está em no máximo um `cpu_valid`, e
///   CPUs livres não estão em pool algum.
/// - No máximo uma CPU em movimento no sistema inteiro. A remoção termina em
///   outra CPU (`UnassignCpu`), porque uma CPU não tira a si mesma do pool.
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use super::CpuPool;
use crate::core::smp::{CallQueues, Completion, CpuTopology, OtherCpu, RemoteCall};
use crate::hal::Platform;
use crate::klib::CpuMask;
use crate::sched::{Domain, DomainList, SchedCore, SchedulerRegistry};
use crate::sync::Spinlock;
use crate::sys::{CpuId, Errno, PoolId, SysResult};

pub(super) struct PoolState {
    /// Ordenada por id
    pub(super) pools: Vec<Arc<CpuPool>>,
    pub(super) free_cpus: CpuMask,
    /// CPUs em processo de hot-unplug
    pub(super) locked_cpus: CpuMask,
    pub(super) moving: Option<(CpuId, Arc<CpuPool>)>,
    pub(super) cpu_pool: Vec<Option<Arc<CpuPool>>>,
}

impl PoolState {
    pub(super) fn find(&self, id: PoolId) -> Option<&Arc<CpuPool>> {
        self.pools
            .binary_search_by_key(&id, |c| c.id())
            .ok()
            .map(|pos| &self.pools[pos])
    }

    pub(super) fn pool0(&self) -> Option<Arc<CpuPool>> {
        self.find(PoolId::DEFAULT).cloned()
    }

    fn moving_cpu(&self) -> Option<CpuId> {
        self.moving.as_ref().map(|(cpu, _)| *cpu)
    }
}

pub struct CpuPoolManager {
    pub(super) state: Spinlock<PoolState>,
    registry: Arc<SchedulerRegistry>,
    pub(super) sched: Arc<SchedCore>,
    pub(super) domains: Arc<DomainList>,
    pub(super) topology: Arc<CpuTopology>,
    calls: Arc<CallQueues>,
    pub(super) platform: Arc<dyn Platform>,
}

/// Segunda metade de `unassign_cpu`, executada na CPU de trabalho
struct UnassignCpu {
    manager: Arc<CpuPoolManager>,
    cpu: CpuId,
    pool: Arc<CpuPool>,
}

impl RemoteCall for UnassignCpu {
    fn run(self: Box<Self>, _here: CpuId) -> SysResult<()> {
        self.manager.unassign_cpu_helper(self.cpu, &self.pool)
    }
}

impl CpuPoolManager {
    pub fn new(
        registry: Arc<SchedulerRegistry>,
        sched: Arc<SchedCore>,
        topology: Arc<CpuTopology>,
        calls: Arc<CallQueues>,
        platform: Arc<dyn Platform>,
    ) -> Self {
        let nr_cpus = topology.nr_cpu_ids();
        Self {
            state: Spinlock::new(PoolState {
                pools: Vec::new(),
                free_cpus: CpuMask::new(),
                locked_cpus: CpuMask::new(),
                moving: None,
                cpu_pool: vec![None; nr_cpus],
            }),
            registry,
            domains: sched.domains().clone(),
            sched,
            topology,
            calls,
            platform,
        }
    }

    // =========================================================================
    // CRIAÇÃO E BUSCA
    // =========================================================================

    /// Cria um pool. `poolid = None` usa o maior id existente + 1.
    ///
    /// O pool 0 sempre recebe o scheduler padrão, ignorando `sched_id`.
    /// Retorna com duas referências: a do registro e a do chamador.
    pub fn create(&self, poolid: Option<PoolId>, sched_id: u32) -> SysResult<Arc<CpuPool>> {
        let mut st = self.state.lock();

        let id = match poolid {
            Some(id) => {
                if st.find(id).is_some() {
                    return Err(Errno::EEXIST);
                }
                id
            }
            None => PoolId::new(st.pools.last().map_or(0, |c| c.id().as_u32()) + 1),
        };

        let sched = if id == PoolId::DEFAULT {
            self.registry.alloc_default()?
        } else {
            self.registry.alloc(sched_id)?
        };

        st.pools.try_reserve(1)?;
        let pool = Arc::new(CpuPool::new(id, sched));
        let pos = st.pools.partition_point(|c| c.id() < id);
        st.pools.insert(pos, pool.clone());

        crate::kinfo!("(Cpupool) Pool criado, id=", id.as_u32());
        Ok(pool)
    }

    /// Remove `pool` do registro. Só pools vazios (sem CPUs nem domínios).
    pub fn destroy(&self, pool: &Arc<CpuPool>) -> SysResult<()> {
        let mut st = self.state.lock();
        let pos = st
            .pools
            .iter()
            .position(|c| Arc::ptr_eq(c, pool))
            .ok_or(Errno::ENOENT)?;

        if pool.n_dom() != 0 || !pool.cpu_valid().is_empty() {
            return Err(Errno::EBUSY);
        }

        st.pools.remove(pos);

        crate::kinfo!("(Cpupool) Pool destruído, id=", pool.id().as_u32());
        Ok(())
    }

    pub fn get_by_id(&self, id: PoolId) -> Option<Arc<CpuPool>> {
        self.state.lock().find(id).cloned()
    }

    /// Primeiro pool com id >= `id` (iteração do canal de controle)
    pub fn get_next_by_id(&self, id: PoolId) -> Option<Arc<CpuPool>> {
        let st = self.state.lock();
        let pos = st.pools.partition_point(|c| c.id() < id);
        st.pools.get(pos).cloned()
    }

    /// Pool ao qual `cpu` pertence (ou está saindo)
    pub fn cpu_pool(&self, cpu: CpuId) -> Option<Arc<CpuPool>> {
        self.state
            .lock()
            .cpu_pool
            .get(cpu as usize)
            .and_then(|c| c.clone())
    }

    pub fn free_cpus(&self) -> CpuMask {
        self.state.lock().free_cpus
    }

    /// CPU em movimento e seu pool de origem
    pub fn moving(&self) -> Option<(CpuId, PoolId)> {
        self.state
            .lock()
            .moving
            .as_ref()
            .map(|(cpu, pool)| (*cpu, pool.id()))
    }

    pub fn locked_cpus(&self) -> CpuMask {
        self.state.lock().locked_cpus
    }

    // =========================================================================
    // CPUs
    // =========================================================================

    pub(super) fn assign_cpu_locked(
        &self,
        st: &mut PoolState,
        pool: &Arc<CpuPool>,
        cpu: CpuId,
    ) -> SysResult<()> {
        if let Some((moving_cpu, moving_pool)) = &st.moving {
            if *moving_cpu == cpu && !Arc::ptr_eq(moving_pool, pool) {
                return Err(Errno::EBUSY);
            }
        }

        let old = core::mem::replace(&mut st.cpu_pool[cpu as usize], Some(pool.clone()));
        if let Err(e) = self.sched.schedule_cpu_switch(cpu, Some(pool)) {
            st.cpu_pool[cpu as usize] = old;
            crate::kwarn!("(Cpupool) Scheduler recusou a CPU ", cpu);
            return Err(e);
        }

        st.free_cpus.clear(cpu);
        if st.moving_cpu() == Some(cpu) {
            st.moving = None;
        }
        pool.set_cpu(cpu, true);

        let cpus = pool.cpu_valid();
        for d in self.domains.in_pool(pool) {
            d.update_node_affinity(&cpus, &self.topology);
        }

        crate::kdebug!("(Cpupool) CPU atribuída, cpu=", cpu);
        Ok(())
    }

    /// Põe uma CPU livre no pool `poolid`. `cpu = None` pega a primeira livre.
    pub fn add_cpu(&self, poolid: PoolId, cpu: Option<CpuId>) -> SysResult<CpuId> {
        let mut st = self.state.lock();

        let cpu = match cpu {
            Some(cpu) => cpu,
            None => st.free_cpus.first().ok_or(Errno::EINVAL)?,
        };
        if !self.topology.is_valid(cpu) {
            return Err(Errno::EINVAL);
        }
        if !st.free_cpus.test(cpu) {
            return Err(Errno::EBUSY);
        }
        let pool = st.find(poolid).cloned().ok_or(Errno::ENOENT)?;

        self.assign_cpu_locked(&mut st, &pool, cpu)?;
        Ok(cpu)
    }

    /// Começa a tirar `cpu` de `pool`.
    ///
    /// O trabalho termina em outra CPU; o `Completion` devolvido diz quando.
    /// Se a CPU for a última do pool, domínios morrendo são levados para o
    /// pool 0; um domínio vivo impede a remoção (`EBUSY`).
    pub fn unassign_cpu(self: &Arc<Self>, pool: &Arc<CpuPool>, cpu: CpuId) -> SysResult<Completion> {
        let mut st = self.state.lock();

        let moving_cpu = st.moving_cpu();
        if moving_cpu.is_some_and(|m| m != cpu) {
            return Err(Errno::EBUSY);
        }
        if st.locked_cpus.test(cpu) {
            return Err(Errno::EBUSY);
        }

        let cpu_valid = pool.cpu_valid();
        if !cpu_valid.test(cpu) && moving_cpu != Some(cpu) {
            return Ok(Completion::done(Ok(())));
        }

        let pool0 = st.pool0().ok_or(Errno::ENOENT)?;

        // Escolhida antes de qualquer mudança: sem CPU de trabalho nada muda.
        let target = OtherCpu::pick(self.platform.current_cpu(), &pool0.cpu_valid(), cpu)
            .ok_or(Errno::EBUSY)?;

        if pool.n_dom() > 0 && cpu_valid.weight() == 1 && moving_cpu != Some(cpu) {
            let doms = self.domains.in_pool(pool);
            if doms.iter().any(|d| !d.is_dying()) {
                return Err(Errno::EBUSY);
            }
            for d in doms {
                pool.dec_dom();
                if let Err(e) = self.sched.sched_move_domain(&d, &pool0) {
                    pool.inc_dom();
                    return Err(e);
                }
                pool0.inc_dom();
            }
        }

        st.moving = Some((cpu, pool.clone()));
        pool.set_cpu(cpu, false);
        drop(st);

        crate::kdebug!("(Cpupool) Removendo CPU, cpu=", cpu);
        Ok(self.calls.post(
            target,
            Box::new(UnassignCpu {
                manager: self.clone(),
                cpu,
                pool: pool.clone(),
            }),
        ))
    }

    /// Termina a remoção na CPU de trabalho. Se o movimento já foi
    /// cancelado (a CPU voltou ao pool), não há nada a fazer.
    fn unassign_cpu_helper(&self, cpu: CpuId, pool: &Arc<CpuPool>) -> SysResult<()> {
        let mut st = self.state.lock();

        let still_moving = st
            .moving
            .as_ref()
            .is_some_and(|(c, p)| *c == cpu && Arc::ptr_eq(p, pool));
        if !still_moving {
            return Ok(());
        }

        let ret = self.sched.cpu_disable_scheduler(cpu, pool);
        st.free_cpus.set(cpu);
        if let Err(e) = ret {
            crate::kwarn!("(Cpupool) VCPUs presas na CPU ", cpu);
            return Err(e);
        }

        if let Err(e) = self.sched.schedule_cpu_switch(cpu, None) {
            st.free_cpus.clear(cpu);
            return Err(e);
        }
        st.cpu_pool[cpu as usize] = None;
        st.moving = None;

        crate::kinfo!("(Cpupool) CPU liberada, cpu=", cpu);
        Ok(())
    }

    // =========================================================================
    // DOMÍNIOS
    // =========================================================================

    /// Liga `d` ao pool `poolid` (`None` = nenhum pool)
    pub fn add_domain(&self, d: &Arc<Domain>, poolid: Option<PoolId>) -> SysResult<()> {
        let Some(poolid) = poolid else {
            return Ok(());
        };

        let st = self.state.lock();
        let pool = st.find(poolid).ok_or(Errno::ESRCH)?;
        if pool.cpu_valid().is_empty() {
            return Err(Errno::ENODEV);
        }
        pool.inc_dom();
        d.set_cpupool(Some(pool));
        Ok(())
    }

    pub fn rm_domain(&self, d: &Arc<Domain>) {
        // Lê o vínculo sob o lock global: `move_domain` o reescreve sob ele.
        let _st = self.state.lock();
        let Some(pool) = d.cpupool() else {
            return;
        };
        pool.dec_dom();
        d.set_cpupool(None);
    }

    /// Leva `d` para `poolid`. `ENOENT` se o pool não existe ou não tem CPUs.
    pub fn move_domain(&self, d: &Arc<Domain>, poolid: PoolId) -> SysResult<()> {
        let st = self.state.lock();

        let target = st
            .find(poolid)
            .filter(|c| !c.cpu_valid().is_empty())
            .cloned()
            .ok_or(Errno::ENOENT)?;
        let old = d.cpupool().ok_or(Errno::EINVAL)?;

        old.dec_dom();
        match self.sched.sched_move_domain(d, &target) {
            Ok(()) => {
                target.inc_dom();
                Ok(())
            }
            Err(e) => {
                old.inc_dom();
                Err(e)
            }
        }
    }

    // =========================================================================
    // DIAGNÓSTICO
    // =========================================================================

    /// Estado de dispatch de todas as CPUs, por pool (tecla `'r'`)
    pub fn dump_runq(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let (pools, cpu_pool) = {
            let st = self.state.lock();
            (st.pools.clone(), st.cpu_pool.clone())
        };

        let now = self.platform.now();
        writeln!(out, "NOW={:#018x}", now)?;

        writeln!(out, "Idle cpupool:")?;
        for cpu in self.topology.online_mask().iter() {
            if cpu_pool.get(cpu as usize).is_some_and(Option::is_none) {
                self.sched.dump_cpu(out, cpu)?;
            }
        }

        for pool in &pools {
            writeln!(out, "Cpupool {}:", pool.id().as_u32())?;
            pool.sched.lock().dump_settings(out)?;
            for cpu in pool.cpu_valid().iter() {
                self.sched.dump_cpu(out, cpu)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CpuPoolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("CpuPoolManager")
            .field("pools", &st.pools.iter().map(|c| c.id()).collect::<Vec<_>>())
            .field("free_cpus", &st.free_cpus)
            .field("locked_cpus", &st.locked_cpus)
            .field("moving", &st.moving_cpu())
            .finish()
    }
}
