/// Arquivo: hal/sim.rs
///
/// Propósito: Plataforma simulada para testes de host.
///
/// Detalhes de Implementação:
/// - Relógio manual (`set_now`/`advance`), nunca anda sozinho.
/// - A "CPU corrente" é por thread: `enter_cpu` troca e restaura ao sair do escopo.
/// - Guarda o último deadline programado e conta IPIs por CPU para asserções.

use std::cell::Cell;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::vec::Vec;

use super::Platform;
use crate::klib::MAX_CPUS;
use crate::sys::{CpuId, STime};

std::thread_local! {
    static CURRENT_CPU: Cell<CpuId> = const { Cell::new(0) };
}

pub struct SimPlatform {
    clock: AtomicI64,
    deadlines: Vec<AtomicI64>,
    ipis: Vec<AtomicU64>,
}

/// Restaura a CPU corrente anterior ao sair do escopo
pub struct CpuGuard {
    prev: CpuId,
}

impl Drop for CpuGuard {
    fn drop(&mut self) {
        CURRENT_CPU.with(|c| c.set(self.prev));
    }
}

impl SimPlatform {
    pub fn new() -> Self {
        Self {
            clock: AtomicI64::new(0),
            deadlines: (0..MAX_CPUS).map(|_| AtomicI64::new(0)).collect(),
            ipis: (0..MAX_CPUS).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn set_now(&self, now: STime) {
        self.clock.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: STime) {
        self.clock.fetch_add(delta, Ordering::SeqCst);
    }

    /// Faz a thread atual se comportar como `cpu` até o guard ser solto
    pub fn enter_cpu(cpu: CpuId) -> CpuGuard {
        let prev = CURRENT_CPU.with(|c| c.replace(cpu));
        CpuGuard { prev }
    }

    /// Último deadline programado em `cpu` (0 = desarmado)
    pub fn programmed_deadline(&self, cpu: CpuId) -> STime {
        self.deadlines[cpu as usize].load(Ordering::SeqCst)
    }

    /// Quantas IPIs `cpu` recebeu
    pub fn ipi_count(&self, cpu: CpuId) -> u64 {
        self.ipis[cpu as usize].load(Ordering::SeqCst)
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SimPlatform {
    fn now(&self) -> STime {
        self.clock.load(Ordering::SeqCst)
    }

    fn current_cpu(&self) -> CpuId {
        CURRENT_CPU.with(|c| c.get())
    }

    fn reprogram_timer(&self, cpu: CpuId, deadline: STime) -> bool {
        self.deadlines[cpu as usize].store(deadline, Ordering::SeqCst);
        deadline == 0 || deadline > self.now()
    }

    fn send_event_check(&self, cpu: CpuId) {
        self.ipis[cpu as usize].fetch_add(1, Ordering::SeqCst);
    }

    fn cpu_relax(&self) {
        std::thread::yield_now();
    }
}
