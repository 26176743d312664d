/// Arquivo: core/machine.rs
///
/// Propósito: Montagem do núcleo de escalonamento.
/// Constrói todos os serviços na ordem certa e expõe as operações de alto
/// nível: hot-plug de CPU, processamento de softirqs, ciclo de vida de
/// domínios, canal de controle e teclas de diagnóstico.
///
/// Detalhes de Implementação:
/// - Nada aqui é global: cada `Machine` tem seus próprios serviços, ligados
///   por `Arc`. Testes sobem quantas quiserem em paralelo.
/// - Boot: CPU 0 online → pool 0 com o scheduler padrão → CPU 0 no pool 0 →
///   domínio de sistema no pool 0, acordado.
use alloc::sync::Arc;
use core::fmt;

use crate::core::boot::BootParams;
use crate::core::debug::keyhandler::{self, KeyAction};
use crate::core::smp::{CallQueues, CpuTopology, Softirq, SoftirqTable};
use crate::core::time::TimerService;
use crate::cpupool::{CpuAction, CpuPoolManager, CpupoolOp, CpupoolReply};
use crate::hal::Platform;
use crate::sched::config::{DEFAULT_DOM0_VCPUS, MAX_VIRT_CPUS};
use crate::sched::{
    Domain, DomainList, GlobalParams, SchedCore, SchedulerOp, SchedulerRegistry, TaskSlice, Vcpu,
};
use crate::sys::{CpuId, DomId, DomainHandle, Errno, PoolId, SysResult};

pub struct Machine {
    platform: Arc<dyn Platform>,
    topology: Arc<CpuTopology>,
    softirq: Arc<SoftirqTable>,
    timers: Arc<TimerService>,
    calls: Arc<CallQueues>,
    registry: Arc<SchedulerRegistry>,
    domains: Arc<DomainList>,
    sched: Arc<SchedCore>,
    pools: Arc<CpuPoolManager>,
}

impl Machine {
    /// Sobe o núcleo com a CPU 0 e o domínio de sistema
    pub fn boot(platform: Arc<dyn Platform>, params: &BootParams) -> SysResult<Self> {
        // Tudo por CPU é dimensionado pela topologia, que já limita o valor.
        let topology = Arc::new(CpuTopology::new(params.nr_cpus));
        let nr_cpus = topology.nr_cpu_ids();
        crate::kinfo!("(Boot) Iniciando núcleo de escalonamento, cpus=", nr_cpus);
        let softirq = Arc::new(SoftirqTable::new(platform.clone(), nr_cpus));
        let timers = Arc::new(TimerService::new(
            platform.clone(),
            topology.clone(),
            softirq.clone(),
            params.timer_slop,
        ));
        let calls = Arc::new(CallQueues::new(softirq.clone(), nr_cpus));

        let registry = Arc::new(SchedulerRegistry::with_builtin());
        if registry.set_default(&params.sched).is_err() {
            crate::kwarn!("(Boot) Scheduler desconhecido em sched=, usando o padrão");
        }

        let domains = Arc::new(DomainList::new());
        let sched = Arc::new(SchedCore::new(
            platform.clone(),
            topology.clone(),
            softirq.clone(),
            timers.clone(),
            calls.clone(),
            domains.clone(),
        ));
        let pools = Arc::new(CpuPoolManager::new(
            registry.clone(),
            sched.clone(),
            topology.clone(),
            calls.clone(),
            platform.clone(),
        ));

        let machine = Self {
            platform,
            topology,
            softirq,
            timers,
            calls,
            registry,
            domains,
            sched,
            pools,
        };

        machine.cpu_up_prepare(0);
        // Pool 0 fica só com a referência do registro.
        let pool0 = machine.pools.create(Some(PoolId::DEFAULT), 0)?;
        drop(pool0);
        machine.pools.cpu_callback(CpuAction::Online, 0)?;

        let dom0 = machine.domain_create(
            DomId::SYSTEM,
            DomainHandle::SYSTEM,
            DEFAULT_DOM0_VCPUS,
            Some(PoolId::DEFAULT),
        )?;
        for v in dom0.vcpus() {
            machine.sched.vcpu_wake(v);
        }

        crate::kinfo!("(Boot) Núcleo pronto");
        Ok(machine)
    }

    // =========================================================================
    // ACESSO AOS SERVIÇOS
    // =========================================================================

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn topology(&self) -> &Arc<CpuTopology> {
        &self.topology
    }

    pub fn softirq(&self) -> &Arc<SoftirqTable> {
        &self.softirq
    }

    pub fn timers(&self) -> &Arc<TimerService> {
        &self.timers
    }

    pub fn calls(&self) -> &Arc<CallQueues> {
        &self.calls
    }

    pub fn registry(&self) -> &Arc<SchedulerRegistry> {
        &self.registry
    }

    pub fn domains(&self) -> &Arc<DomainList> {
        &self.domains
    }

    pub fn sched(&self) -> &Arc<SchedCore> {
        &self.sched
    }

    pub fn pools(&self) -> &Arc<CpuPoolManager> {
        &self.pools
    }

    // =========================================================================
    // HOT-PLUG
    // =========================================================================

    fn cpu_up_prepare(&self, cpu: CpuId) {
        self.topology.set_online(cpu, true);
        self.timers.cpu_up_prepare(cpu);
        self.sched.cpu_up_prepare(cpu);
    }

    /// Liga `cpu` e a põe no pool 0
    pub fn cpu_up(&self, cpu: CpuId) -> SysResult<()> {
        if !self.topology.is_valid(cpu) {
            return Err(Errno::EINVAL);
        }
        if self.topology.is_online(cpu) {
            return Err(Errno::EEXIST);
        }

        self.cpu_up_prepare(cpu);
        self.pools.cpu_callback(CpuAction::Online, cpu)?;
        crate::kinfo!("(SMP) CPU online, cpu=", cpu);
        Ok(())
    }

    /// Desliga `cpu`. Só CPUs do pool 0, e nunca a última online.
    pub fn cpu_down(&self, cpu: CpuId) -> SysResult<()> {
        if !self.topology.is_online(cpu) {
            return Err(Errno::EINVAL);
        }
        if self.topology.any_online_except(cpu).is_none() {
            return Err(Errno::EBUSY);
        }

        self.pools.cpu_callback(CpuAction::DownPrepare, cpu)?;

        self.topology.set_online(cpu, false);
        self.pools.cpu_callback(CpuAction::Dead, cpu)?;
        self.sched.cpu_dead(cpu);
        self.timers.migrate_timers_from_cpu(cpu);
        self.calls.migrate_from_cpu(cpu, &self.topology.online_mask());
        // O CALL_FUNCTION já foi levantado no destino; o resto morre com a CPU.
        let _ = self.softirq.take(cpu);

        crate::kinfo!("(SMP) CPU offline, cpu=", cpu);
        Ok(())
    }

    // =========================================================================
    // SOFTIRQ
    // =========================================================================

    /// Uma passada pelas softirqs pendentes de `cpu`: timers, continuações
    /// e por último o dispatch. Retorna o que foi processado e, se houve
    /// dispatch, a decisão.
    pub fn do_softirq(&self, cpu: CpuId) -> (Softirq, Option<TaskSlice>) {
        let pending = self.softirq.take(cpu);

        if pending.contains(Softirq::TIMER) {
            self.timers.softirq_action(cpu);
        }
        if pending.contains(Softirq::CALL_FUNCTION) {
            self.calls.run_pending(cpu);
        }
        let slice = if pending.contains(Softirq::SCHEDULE) {
            Some(self.sched.schedule(cpu))
        } else {
            None
        };

        (pending, slice)
    }

    // =========================================================================
    // DOMÍNIOS
    // =========================================================================

    /// Cria um domínio com `nr_vcpus` VCPUs paradas, ligado a `poolid`
    pub fn domain_create(
        &self,
        domid: DomId,
        handle: DomainHandle,
        nr_vcpus: u32,
        poolid: Option<PoolId>,
    ) -> SysResult<Arc<Domain>> {
        if domid == DomId::IDLE || nr_vcpus == 0 || nr_vcpus > MAX_VIRT_CPUS {
            return Err(Errno::EINVAL);
        }

        let d = Domain::new(domid, handle, nr_vcpus);
        self.domains.insert(d.clone())?;

        if let Err(e) = self.pools.add_domain(&d, poolid) {
            self.domains.remove(domid);
            return Err(e);
        }
        if let Err(e) = self.sched.sched_init_domain(&d) {
            self.pools.rm_domain(&d);
            self.domains.remove(domid);
            return Err(e);
        }

        crate::kinfo!("(Domain) Domínio criado, id=", domid.as_u16());
        Ok(d)
    }

    /// Marca o domínio como morrendo e tira suas VCPUs de execução
    pub fn domain_kill(&self, domid: DomId) -> SysResult<()> {
        let d = self.domains.get(domid).ok_or(Errno::ESRCH)?;
        d.set_dying();
        for v in d.vcpus() {
            self.sched.vcpu_sleep(v);
        }
        Ok(())
    }

    /// Remove de vez um domínio morrendo
    pub fn domain_destroy(&self, domid: DomId) -> SysResult<()> {
        let d = self.domains.get(domid).ok_or(Errno::ESRCH)?;
        if !d.is_dying() {
            return Err(Errno::EBUSY);
        }

        self.sched.sched_destroy_domain(&d);
        self.pools.rm_domain(&d);
        self.domains.remove(domid);
        crate::kinfo!("(Domain) Domínio destruído, id=", domid.as_u16());
        Ok(())
    }

    fn find_vcpu(&self, domid: DomId, vcpu_id: u32) -> SysResult<Arc<Vcpu>> {
        let d = self.domains.get(domid).ok_or(Errno::ESRCH)?;
        d.vcpu(vcpu_id).cloned().ok_or(Errno::ENOENT)
    }

    pub fn vcpu_wake(&self, domid: DomId, vcpu_id: u32) -> SysResult<()> {
        let v = self.find_vcpu(domid, vcpu_id)?;
        self.sched.vcpu_wake(&v);
        Ok(())
    }

    pub fn vcpu_sleep(&self, domid: DomId, vcpu_id: u32) -> SysResult<()> {
        let v = self.find_vcpu(domid, vcpu_id)?;
        self.sched.vcpu_sleep(&v);
        Ok(())
    }

    // =========================================================================
    // CONTROLE
    // =========================================================================

    pub fn sysctl(&self, op: CpupoolOp) -> SysResult<CpupoolReply> {
        self.pools.do_sysctl(op)
    }

    pub fn scheduler_op(
        &self,
        poolid: PoolId,
        sched_id: u32,
        op: SchedulerOp<GlobalParams>,
    ) -> SysResult<Option<GlobalParams>> {
        self.pools.scheduler_op(poolid, sched_id, op)
    }

    /// Executa o dump associado a `key`
    pub fn handle_key(&self, key: char, out: &mut dyn fmt::Write) -> fmt::Result {
        let Some(handler) = keyhandler::lookup(key) else {
            return writeln!(out, "'{}' pressed -> unknown key", key);
        };

        writeln!(out, "'{}' pressed -> {}", key, handler.desc)?;
        match handler.action {
            KeyAction::DumpTimerQueues => self.timers.dump(out),
            KeyAction::DumpRunQueues => self.pools.dump_runq(out),
        }
    }
}
