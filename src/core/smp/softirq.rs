//! SoftIRQs - trabalho adiado por CPU
//!
//! Cada CPU tem uma máscara de softirqs pendentes. `raise` marca o bit e, se a
//! CPU alvo não for a corrente, envia um "event check" para que ela processe
//! a máscara no próximo ponto seguro. `take` drena a máscara atomicamente.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use super::PerCpu;
use crate::hal::Platform;
use crate::sys::CpuId;

bitflags! {
    /// Softirqs conhecidas, em ordem de processamento
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Softirq: u32 {
        /// Processar timers vencidos e reprogramar o hardware
        const TIMER = 1 << 0;
        /// Continuações cross-CPU pendentes
        const CALL_FUNCTION = 1 << 1;
        /// Rodar o scheduler desta CPU
        const SCHEDULE = 1 << 2;
    }
}

pub struct SoftirqTable {
    platform: Arc<dyn Platform>,
    pending: PerCpu<AtomicU32>,
}

impl SoftirqTable {
    pub fn new(platform: Arc<dyn Platform>, nr_cpus: usize) -> Self {
        Self {
            platform,
            pending: PerCpu::new(nr_cpus, |_| AtomicU32::new(0)),
        }
    }

    /// Marca `bits` como pendentes em `cpu`
    pub fn raise(&self, cpu: CpuId, bits: Softirq) {
        let old = self.pending.get(cpu).fetch_or(bits.bits(), Ordering::AcqRel);
        let already = Softirq::from_bits_truncate(old).contains(bits);
        if !already && cpu != self.platform.current_cpu() {
            self.platform.send_event_check(cpu);
        }
    }

    /// Drena as softirqs pendentes de `cpu`
    pub fn take(&self, cpu: CpuId) -> Softirq {
        Softirq::from_bits_truncate(self.pending.get(cpu).swap(0, Ordering::AcqRel))
    }

    /// Consulta sem drenar
    pub fn pending(&self, cpu: CpuId) -> Softirq {
        Softirq::from_bits_truncate(self.pending.get(cpu).load(Ordering::Acquire))
    }
}
