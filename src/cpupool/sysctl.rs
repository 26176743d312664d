/// Arquivo: cpupool/sysctl.rs
///
/// Propósito: Canal de controle dos pools e dos schedulers.
///
/// Detalhes de Implementação:
/// - Cada operação é uma variante de `CpupoolOp`; o resultado volta como
///   `CpupoolReply` ou `Errno`.
/// - `RmCpu` não espera a CPU de trabalho: devolve o `Completion` pendente.
use alloc::sync::Arc;

use super::CpuPoolManager;
use crate::core::smp::Completion;
use crate::klib::CpuMask;
use crate::sched::{GlobalParams, SchedulerOp};
use crate::sys::{CpuId, DomId, Errno, PoolId, SysResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpupoolOp {
    /// `poolid = None`: próximo id livre
    Create { poolid: Option<PoolId>, sched_id: u32 },
    Destroy { poolid: PoolId },
    /// Primeiro pool com id >= `poolid`
    Info { poolid: PoolId },
    /// `cpu = None`: primeira CPU livre
    AddCpu { poolid: PoolId, cpu: Option<CpuId> },
    /// `cpu = None`: última CPU do pool
    RmCpu { poolid: PoolId, cpu: Option<CpuId> },
    MoveDomain { domid: DomId, poolid: PoolId },
    FreeInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolInfo {
    pub poolid: PoolId,
    pub sched_id: u32,
    pub n_dom: u32,
    pub cpu_valid: CpuMask,
}

pub enum CpupoolReply {
    Created(PoolId),
    Done,
    Info(PoolInfo),
    CpuAdded(CpuId),
    RmCpuPending(Completion),
    FreeCpus(CpuMask),
}

impl CpuPoolManager {
    /// Informação do primeiro pool com id >= `poolid`
    pub fn info(&self, poolid: PoolId) -> SysResult<PoolInfo> {
        let pool = self.get_next_by_id(poolid).ok_or(Errno::ENOENT)?;
        Ok(PoolInfo {
            poolid: pool.id(),
            sched_id: pool.sched_id(),
            n_dom: pool.n_dom(),
            cpu_valid: pool.cpu_valid(),
        })
    }

    pub fn do_sysctl(self: &Arc<Self>, op: CpupoolOp) -> SysResult<CpupoolReply> {
        crate::ktrace!("(Cpupool) sysctl");
        match op {
            CpupoolOp::Create { poolid, sched_id } => {
                let pool = self.create(poolid, sched_id)?;
                Ok(CpupoolReply::Created(pool.id()))
            }

            CpupoolOp::Destroy { poolid } => {
                let pool = self.get_by_id(poolid).ok_or(Errno::ENOENT)?;
                self.destroy(&pool)?;
                Ok(CpupoolReply::Done)
            }

            CpupoolOp::Info { poolid } => Ok(CpupoolReply::Info(self.info(poolid)?)),

            CpupoolOp::AddCpu { poolid, cpu } => {
                let cpu = self.add_cpu(poolid, cpu)?;
                Ok(CpupoolReply::CpuAdded(cpu))
            }

            CpupoolOp::RmCpu { poolid, cpu } => {
                let pool = self.get_by_id(poolid).ok_or(Errno::ENOENT)?;
                let cpu = cpu
                    .or_else(|| pool.cpu_valid().last())
                    .filter(|&c| self.topology.is_valid(c))
                    .ok_or(Errno::EINVAL)?;
                let completion = self.unassign_cpu(&pool, cpu)?;
                Ok(CpupoolReply::RmCpuPending(completion))
            }

            CpupoolOp::MoveDomain { domid, poolid } => {
                if domid == DomId::SYSTEM {
                    return Err(Errno::EINVAL);
                }
                let d = self.domains.get(domid).ok_or(Errno::ESRCH)?;
                let current = d.cpupool_id().ok_or(Errno::EINVAL)?;
                if current == poolid {
                    return Ok(CpupoolReply::Done);
                }
                self.move_domain(&d, poolid)?;
                Ok(CpupoolReply::Done)
            }

            CpupoolOp::FreeInfo => Ok(CpupoolReply::FreeCpus(self.free_cpus())),
        }
    }

    /// Operação global no scheduler do pool `poolid`.
    ///
    /// `ESRCH` para pool inexistente, `EINVAL` se `sched_id` não é o do pool.
    pub fn scheduler_op(
        &self,
        poolid: PoolId,
        sched_id: u32,
        op: SchedulerOp<GlobalParams>,
    ) -> SysResult<Option<GlobalParams>> {
        let pool = self.get_by_id(poolid).ok_or(Errno::ESRCH)?;
        let now = self.platform.now();

        let mut sched = pool.sched.lock();
        if sched.sched_id() != sched_id {
            return Err(Errno::EINVAL);
        }
        sched.adjust_global(op, now)
    }
}
