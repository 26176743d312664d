//! Interface de plugin de scheduler
//!
//! Todo scheduler concreto implementa [`Scheduler`]. O gerenciador de pools e
//! o dispatch chamam apenas estes pontos de entrada; dados privados por CPU,
//! VCPU e domínio são [`SchedPriv`] opacos que só o scheduler dono sabe
//! interpretar (`downcast`).
//!
//! Os métodos recebem `&mut self`: quem chama segura o lock do scheduler do
//! pool. Hooks opcionais têm corpo padrão que não faz nada e retorna sucesso.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;

use super::domain::{Domain, Vcpu};
use crate::sys::{CpuId, DomainHandle, STime, SysResult};

/// Dado privado de scheduler (por CPU, VCPU ou domínio)
pub type SchedPriv = Box<dyn Any + Send + Sync>;

/// Decisão de dispatch
#[derive(Clone)]
pub struct TaskSlice {
    /// VCPU escolhida; `None` é a VCPU idle da CPU
    pub task: Option<Arc<Vcpu>>,
    /// Quanto tempo até a próxima decisão (sempre > 0)
    pub time: STime,
    /// A VCPU veio de outra CPU
    pub migrated: bool,
}

impl TaskSlice {
    pub fn idle(time: STime) -> Self {
        Self {
            task: None,
            time,
            migrated: false,
        }
    }
}

impl fmt::Debug for TaskSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSlice")
            .field("task", &self.task.as_ref().map(|v| (v.dom_id(), v.vcpu_id())))
            .field("time", &self.time)
            .field("migrated", &self.migrated)
            .finish()
    }
}

/// Operação get/put de parâmetros
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerOp<T> {
    PutInfo(T),
    GetInfo,
}

/// Entrada da tabela do executivo cíclico
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub dom_handle: DomainHandle,
    pub vcpu_id: u32,
    /// Tempo de execução em ns
    pub runtime: STime,
}

/// Tabela completa do executivo cíclico
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arinc653Schedule {
    pub major_frame: STime,
    pub entries: Vec<ScheduleEntry>,
}

/// Parâmetros globais de um scheduler (por pool)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalParams {
    Arinc653(Arinc653Schedule),
}

/// Parâmetros por domínio. O ARINC 653 não tem nenhum: a tabela é global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainParams {
    Empty,
}

pub trait Scheduler: Send {
    /// Nome legível
    fn name(&self) -> &'static str;
    /// Nome curto usado na linha de comando (`sched=`)
    fn opt_name(&self) -> &'static str;
    /// Id numérico no canal de controle
    fn sched_id(&self) -> u32;

    fn init(&mut self) -> SysResult<()> {
        Ok(())
    }

    fn deinit(&mut self) {}

    fn alloc_pdata(&mut self, _cpu: CpuId) -> SysResult<Option<SchedPriv>> {
        Ok(None)
    }

    fn free_pdata(&mut self, _pdata: Option<SchedPriv>, _cpu: CpuId) {}

    /// Aloca o dado da VCPU. `dom_priv` é o dado do domínio neste scheduler.
    fn alloc_vdata(
        &mut self,
        vcpu: &Arc<Vcpu>,
        dom_priv: Option<&SchedPriv>,
    ) -> SysResult<Option<SchedPriv>>;

    fn free_vdata(&mut self, vdata: Option<SchedPriv>);

    fn alloc_domdata(&mut self, _dom: &Arc<Domain>) -> SysResult<Option<SchedPriv>> {
        Ok(None)
    }

    fn free_domdata(&mut self, _ddata: Option<SchedPriv>) {}

    fn sleep(&mut self, vcpu: &Vcpu);

    fn wake(&mut self, vcpu: &Vcpu);

    /// Escolhe o que roda em `cpu` agora
    fn do_schedule(&mut self, cpu: CpuId, now: STime, tasklet_work_scheduled: bool) -> TaskSlice;

    fn pick_cpu(&mut self, vcpu: &Vcpu) -> CpuId;

    fn adjust(
        &mut self,
        _dom: &Domain,
        _op: SchedulerOp<DomainParams>,
    ) -> SysResult<Option<DomainParams>> {
        Ok(None)
    }

    fn adjust_global(
        &mut self,
        _op: SchedulerOp<GlobalParams>,
        _now: STime,
    ) -> SysResult<Option<GlobalParams>> {
        Ok(None)
    }

    fn dump_settings(&self, _out: &mut dyn fmt::Write) -> fmt::Result {
        Ok(())
    }

    fn dump_cpu_state(&self, _out: &mut dyn fmt::Write, _cpu: CpuId) -> fmt::Result {
        Ok(())
    }

    fn tick_suspend(&mut self, _cpu: CpuId) {}

    fn tick_resume(&mut self, _cpu: CpuId) {}
}
