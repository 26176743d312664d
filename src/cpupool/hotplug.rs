/// Arquivo: cpupool/hotplug.rs
///
/// Propósito: Pools diante de CPUs entrando e saindo do ar.
///
/// Detalhes de Implementação:
/// - CPU que sobe (ou cujo desligamento falhou) entra no pool 0.
/// - Só CPUs do pool 0 podem ser desligadas. A CPU fica travada desde o
///   pedido de desligamento até voltar (`cpu_add`), e nenhuma remoção de
///   pool a toca nesse meio tempo.
use super::CpuPoolManager;
use crate::sys::{CpuId, Errno, SysResult};

/// Notificação de hot-plug
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuAction {
    Online,
    DownFailed,
    DownPrepare,
    Dead,
}

impl CpuPoolManager {
    /// CPU disponível: destrava, marca livre e põe no pool 0
    pub fn cpu_add(&self, cpu: CpuId) {
        let mut st = self.state.lock();
        st.locked_cpus.clear(cpu);
        st.free_cpus.set(cpu);

        let Some(pool0) = st.pool0() else {
            crate::kwarn!("(Cpupool) CPU livre sem pool 0, cpu=", cpu);
            return;
        };
        if self.assign_cpu_locked(&mut st, &pool0, cpu).is_err() {
            crate::kerror!("(Cpupool) Falha ao pôr CPU no pool 0, cpu=", cpu);
        }
    }

    /// Pedido de desligamento. `EBUSY` se a CPU não está no pool 0.
    pub fn cpu_remove(&self, cpu: CpuId) -> SysResult<()> {
        let mut st = self.state.lock();
        let in_pool0 = st.pool0().is_some_and(|c| c.cpu_valid().test(cpu));
        if !in_pool0 {
            return Err(Errno::EBUSY);
        }
        st.locked_cpus.set(cpu);
        crate::kdebug!("(Cpupool) CPU travada para desligar, cpu=", cpu);
        Ok(())
    }

    /// CPU já fora do ar: sai do pool 0 sem passar por CPU livre.
    /// Continua travada até um `cpu_add`.
    pub fn cpu_dead(&self, cpu: CpuId) {
        let mut st = self.state.lock();
        let Some(pool0) = st.pool0().filter(|c| c.cpu_valid().test(cpu)) else {
            return;
        };

        pool0.set_cpu(cpu, false);
        if let Err(e) = self.sched.cpu_disable_scheduler(cpu, &pool0) {
            crate::kwarn!("(Cpupool) VCPUs sem destino ao desligar, erro=", e.as_usize());
        }
        // Trocar para "nenhum scheduler" não aloca, não falha.
        let _ = self.sched.schedule_cpu_switch(cpu, None);

        st.cpu_pool[cpu as usize] = None;
        st.free_cpus.clear(cpu);

        let cpus = pool0.cpu_valid();
        for d in self.sched.domains().in_pool(&pool0) {
            d.update_node_affinity(&cpus, &self.topology);
        }
        crate::kinfo!("(Cpupool) CPU removida do pool 0, cpu=", cpu);
    }

    /// Despacha uma notificação de hot-plug
    pub fn cpu_callback(&self, action: CpuAction, cpu: CpuId) -> SysResult<()> {
        match action {
            CpuAction::Online | CpuAction::DownFailed => {
                self.cpu_add(cpu);
                Ok(())
            }
            CpuAction::DownPrepare => self.cpu_remove(cpu),
            CpuAction::Dead => {
                self.cpu_dead(cpu);
                Ok(())
            }
        }
    }
}
