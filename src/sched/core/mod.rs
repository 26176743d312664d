//! Dispatch por CPU
//!
//! Liga o scheduler de cada pool às CPUs físicas: quem está rodando em cada
//! CPU, a VCPU idle, o pool e os dados privados do scheduler daquela CPU, e o
//! timer de scheduler (`s_timer`) que levanta `SCHEDULE` no fim da fatia.
//!
//! Também é aqui que domínios entram, saem e trocam de scheduler. Toda troca
//! segue o mesmo padrão: aloca tudo no scheduler novo primeiro, desfaz se algo
//! falhar, só então troca os ponteiros e libera os dados antigos.

pub mod idle;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use super::domain::{Domain, DomainList, Vcpu};
use super::plugin::{SchedPriv, Scheduler, TaskSlice};
use crate::core::smp::{CallQueues, CpuTopology, PerCpu, Softirq, SoftirqTable};
use crate::core::time::{Timer, TimerFn, TimerService};
use crate::cpupool::CpuPool;
use crate::hal::Platform;
use crate::klib::CpuMask;
use crate::sync::Spinlock;
use crate::sys::{CpuId, Errno, SysResult};

struct CpuSchedState {
    /// VCPU rodando; `None` é a idle
    curr: Option<Arc<Vcpu>>,
    pool: Option<Arc<CpuPool>>,
    pdata: Option<SchedPriv>,
}

struct SchedCpu {
    state: Spinlock<CpuSchedState>,
    s_timer: Timer,
}

/// Dados alocados num scheduler para um domínio, ainda não instalados
struct DomainData {
    domdata: Option<SchedPriv>,
    vdata: Vec<Option<SchedPriv>>,
}

pub struct SchedCore {
    platform: Arc<dyn Platform>,
    topology: Arc<CpuTopology>,
    softirq: Arc<SoftirqTable>,
    timers: Arc<TimerService>,
    calls: Arc<CallQueues>,
    domains: Arc<DomainList>,
    idle_domain: Arc<Domain>,
    cpus: PerCpu<SchedCpu>,
}

impl SchedCore {
    pub fn new(
        platform: Arc<dyn Platform>,
        topology: Arc<CpuTopology>,
        softirq: Arc<SoftirqTable>,
        timers: Arc<TimerService>,
        calls: Arc<CallQueues>,
        domains: Arc<DomainList>,
    ) -> Self {
        let nr_cpus = topology.nr_cpu_ids();
        Self {
            platform,
            topology,
            softirq,
            timers,
            calls,
            domains,
            idle_domain: idle::create_idle_domain(nr_cpus),
            cpus: PerCpu::new(nr_cpus, |_| SchedCpu {
                state: Spinlock::new(CpuSchedState {
                    curr: None,
                    pool: None,
                    pdata: None,
                }),
                s_timer: Timer::new(),
            }),
        }
    }

    pub fn domains(&self) -> &Arc<DomainList> {
        &self.domains
    }

    pub fn idle_vcpu(&self, cpu: CpuId) -> &Arc<Vcpu> {
        &self.idle_domain.vcpus()[cpu as usize]
    }

    /// VCPU rodando em `cpu` (`None` = idle)
    pub fn curr(&self, cpu: CpuId) -> Option<Arc<Vcpu>> {
        self.cpus.get(cpu).state.lock().curr.clone()
    }

    /// Pool cujo scheduler governa `cpu`
    pub fn cpu_pool(&self, cpu: CpuId) -> Option<Arc<CpuPool>> {
        self.cpus.get(cpu).state.lock().pool.clone()
    }

    fn is_curr(&self, v: &Arc<Vcpu>) -> bool {
        let cpu = v.processor();
        self.topology.is_valid(cpu)
            && self
                .curr(cpu)
                .is_some_and(|c| Arc::ptr_eq(&c, v))
    }

    // =========================================================================
    // HOT-PLUG
    // =========================================================================

    /// Arma a infraestrutura de dispatch de `cpu` (timer de scheduler)
    pub fn cpu_up_prepare(&self, cpu: CpuId) {
        let softirq = self.softirq.clone();
        let callback: TimerFn = Arc::new(move || softirq.raise(cpu, Softirq::SCHEDULE));
        self.timers
            .init_timer(&self.cpus.get(cpu).s_timer, callback, cpu);
    }

    /// `cpu` saiu do ar: mata o timer de scheduler
    pub fn cpu_dead(&self, cpu: CpuId) {
        let slot = self.cpus.get(cpu);
        self.timers.kill_timer(&slot.s_timer);
        slot.state.lock().curr = None;
    }

    // =========================================================================
    // TROCA DE SCHEDULER DE UMA CPU
    // =========================================================================

    /// Passa `cpu` para o scheduler de `pool` (`None` = nenhum).
    ///
    /// Falha de alocação no scheduler novo retorna erro sem mudar nada.
    pub fn schedule_cpu_switch(&self, cpu: CpuId, pool: Option<&Arc<CpuPool>>) -> SysResult<()> {
        let slot = self.cpus.get(cpu);
        let old_pool = slot.state.lock().pool.clone();

        let same = match (&old_pool, pool) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if same {
            return Ok(());
        }

        let idle = self.idle_vcpu(cpu);

        let (ppriv, vpriv) = match pool {
            Some(p) => {
                let mut sched = p.sched.lock();
                let ppriv = sched.alloc_pdata(cpu)?;
                match sched.alloc_vdata(idle, None) {
                    Ok(vpriv) => (ppriv, vpriv),
                    Err(e) => {
                        sched.free_pdata(ppriv, cpu);
                        return Err(e);
                    }
                }
            }
            None => (None, None),
        };

        let (ppriv_old, vpriv_old) = {
            let mut st = slot.state.lock();
            if let Some(old) = &old_pool {
                old.sched.lock().tick_suspend(cpu);
            }
            let vpriv_old = idle.swap_sched_priv(vpriv);
            let ppriv_old = core::mem::replace(&mut st.pdata, ppriv);
            st.pool = pool.cloned();
            st.curr = None;
            if let Some(p) = pool {
                p.sched.lock().tick_resume(cpu);
            }
            (ppriv_old, vpriv_old)
        };

        if let Some(old) = old_pool {
            let mut sched = old.sched.lock();
            sched.free_vdata(vpriv_old);
            sched.free_pdata(ppriv_old, cpu);
        }

        self.softirq.raise(cpu, Softirq::SCHEDULE);
        Ok(())
    }

    /// Tira de `cpu` toda VCPU de `pool` que mora nela.
    ///
    /// `pool.cpu_valid()` já não contém `cpu`. `EAGAIN` se não houver para
    /// onde mandar uma VCPU.
    pub fn cpu_disable_scheduler(&self, cpu: CpuId, pool: &Arc<CpuPool>) -> SysResult<()> {
        let targets = pool.cpu_valid();

        for d in self.domains.in_pool(pool) {
            for v in d.vcpus() {
                if v.processor() != cpu {
                    continue;
                }

                let affinity = v.cpu_affinity();
                if affinity.weight() == 1 && affinity.test(cpu) {
                    crate::kwarn!("(Sched) Quebrando afinidade de VCPU do domínio ", d.id().as_u16());
                    v.set_cpu_affinity(CpuMask::first_n(crate::klib::MAX_CPUS));
                }

                let picked = pool.sched.lock().pick_cpu(v);
                let new_cpu = if picked != cpu && targets.test(picked) {
                    picked
                } else {
                    match targets.first() {
                        Some(c) => c,
                        None => return Err(Errno::EAGAIN),
                    }
                };

                v.set_processor(new_cpu);
                self.softirq.raise(new_cpu, Softirq::SCHEDULE);
                self.softirq.raise(cpu, Softirq::SCHEDULE);
            }
        }
        Ok(())
    }

    // =========================================================================
    // DOMÍNIOS
    // =========================================================================

    /// Aloca domdata + vdata de `d` em `sched`; desfaz tudo se algo falhar.
    /// Também posiciona cada VCPU numa CPU escolhida pelo scheduler.
    fn alloc_domain_data(sched: &mut dyn Scheduler, d: &Arc<Domain>) -> SysResult<DomainData> {
        let domdata = sched.alloc_domdata(d)?;

        let mut vdata: Vec<Option<SchedPriv>> = Vec::new();
        if let Err(e) = vdata.try_reserve_exact(d.vcpus().len()) {
            sched.free_domdata(domdata);
            return Err(e.into());
        }

        for v in d.vcpus() {
            match sched.alloc_vdata(v, domdata.as_ref()) {
                Ok(p) => vdata.push(p),
                Err(e) => {
                    for p in vdata.drain(..) {
                        sched.free_vdata(p);
                    }
                    sched.free_domdata(domdata);
                    return Err(e);
                }
            }
        }

        Ok(DomainData { domdata, vdata })
    }

    fn free_domain_data(sched: &mut dyn Scheduler, data: DomainData) {
        for p in data.vdata {
            sched.free_vdata(p);
        }
        sched.free_domdata(data.domdata);
    }

    /// Instala `d` no scheduler do pool ao qual já está ligado
    pub fn sched_init_domain(&self, d: &Arc<Domain>) -> SysResult<()> {
        let Some(pool) = d.cpupool() else {
            return Ok(());
        };

        {
            let mut sched = pool.sched.lock();
            let data = Self::alloc_domain_data(&mut **sched, d)?;
            Self::install_domain_data(&mut **sched, d, data);
        }

        d.update_node_affinity(&pool.cpu_valid(), &self.topology);
        crate::kdebug!("(Sched) Domínio instalado no scheduler, id=", d.id().as_u16());
        Ok(())
    }

    /// Instala os dados e posiciona as VCPUs; devolve os dados antigos
    fn install_domain_data(sched: &mut dyn Scheduler, d: &Arc<Domain>, data: DomainData) -> DomainData {
        let mut old_vdata = Vec::with_capacity(data.vdata.len());
        for (v, p) in d.vcpus().iter().zip(data.vdata) {
            old_vdata.push(v.swap_sched_priv(p));
            let cpu = sched.pick_cpu(v);
            v.set_processor(cpu);
        }
        let old_domdata = d.swap_sched_priv(data.domdata);
        DomainData {
            domdata: old_domdata,
            vdata: old_vdata,
        }
    }

    /// Remove `d` do scheduler do seu pool
    pub fn sched_destroy_domain(&self, d: &Arc<Domain>) {
        let Some(pool) = d.cpupool() else {
            return;
        };

        let mut kicked = Vec::new();
        for v in d.vcpus() {
            if self.is_curr(v) {
                kicked.push(v.processor());
            }
        }

        {
            let mut sched = pool.sched.lock();
            for v in d.vcpus() {
                sched.free_vdata(v.swap_sched_priv(None));
            }
            sched.free_domdata(d.swap_sched_priv(None));
        }

        for cpu in kicked {
            self.softirq.raise(cpu, Softirq::SCHEDULE);
        }
    }

    /// Move `d` para o scheduler de `target`. Tudo ou nada.
    pub fn sched_move_domain(&self, d: &Arc<Domain>, target: &Arc<CpuPool>) -> SysResult<()> {
        let old_pool = d.cpupool();

        // Aloca no destino antes de tocar em qualquer coisa.
        let old_data = {
            let mut sched = target.sched.lock();
            let data = Self::alloc_domain_data(&mut **sched, d)?;

            let old_cpus: Vec<CpuId> = d.vcpus().iter().map(|v| v.processor()).collect();
            let old_data = Self::install_domain_data(&mut **sched, d, data);
            d.set_cpupool(Some(target));

            // VCPUs prontas acordam no scheduler novo
            for v in d.vcpus() {
                if v.is_runnable() {
                    sched.wake(v);
                }
            }
            drop(sched);

            for cpu in old_cpus {
                self.softirq.raise(cpu, Softirq::SCHEDULE);
            }
            for v in d.vcpus() {
                self.softirq.raise(v.processor(), Softirq::SCHEDULE);
            }
            old_data
        };

        d.update_node_affinity(&target.cpu_valid(), &self.topology);

        match old_pool {
            Some(old) => Self::free_domain_data(&mut **old.sched.lock(), old_data),
            None => {
                crate::bug_on!(
                    old_data.domdata.is_some() || old_data.vdata.iter().any(Option::is_some),
                    "(Sched) domínio sem pool com dados de scheduler"
                );
            }
        }

        crate::kdebug!("(Sched) Domínio movido para pool ", target.id().as_u32());
        Ok(())
    }

    // =========================================================================
    // VCPUs
    // =========================================================================

    pub fn vcpu_sleep(&self, v: &Arc<Vcpu>) {
        v.set_runnable(false);
        if let Some(pool) = v.domain().and_then(|d| d.cpupool()) {
            pool.sched.lock().sleep(v);
        }
        if self.is_curr(v) {
            self.softirq.raise(v.processor(), Softirq::SCHEDULE);
        }
    }

    pub fn vcpu_wake(&self, v: &Arc<Vcpu>) {
        v.set_runnable(true);
        if let Some(pool) = v.domain().and_then(|d| d.cpupool()) {
            pool.sched.lock().wake(v);
        }
        self.softirq.raise(v.processor(), Softirq::SCHEDULE);
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    /// Decide o que `cpu` roda agora e arma o timer de scheduler
    pub fn schedule(&self, cpu: CpuId) -> TaskSlice {
        let now = self.platform.now();
        let tasklet_work = self.calls.has_pending(cpu);
        let slot = self.cpus.get(cpu);

        let mut st = slot.state.lock();
        self.timers.stop_timer(&slot.s_timer);

        let Some(pool) = st.pool.clone() else {
            st.curr = None;
            return TaskSlice::idle(0);
        };

        let slice = pool.sched.lock().do_schedule(cpu, now, tasklet_work);
        crate::bug_on!(slice.time <= 0, "(Sched) fatia de tempo não positiva");

        st.curr = slice.task.clone();
        self.timers.set_timer(&slot.s_timer, now + slice.time);

        crate::ktrace!("(Sched) Dispatch, fatia(ns)=", slice.time);
        slice
    }

    // =========================================================================
    // DIAGNÓSTICO
    // =========================================================================

    /// Estado de dispatch de `cpu`
    pub fn dump_cpu(&self, out: &mut dyn fmt::Write, cpu: CpuId) -> fmt::Result {
        let (curr, pool) = {
            let st = self.cpus.get(cpu).state.lock();
            (st.curr.clone(), st.pool.clone())
        };
        match &curr {
            Some(v) => writeln!(out, "CPU[{:02}] curr=d{}v{}", cpu, v.dom_id().as_u16(), v.vcpu_id())?,
            None => writeln!(out, "CPU[{:02}] curr=idle", cpu)?,
        }
        if let Some(pool) = pool {
            pool.sched.lock().dump_cpu_state(out, cpu)?;
        }
        Ok(())
    }
}
