/// Arquivo: core/smp/topology.rs
///
/// Propósito: Topologia de processadores.
/// Quantas CPUs podem existir (`nr_cpu_ids`), quais estão online e a qual nó
/// NUMA cada uma pertence.
///
/// Detalhes de Implementação:
/// - O mapa online é um `CpuMask` atrás de um spinlock folha; leitores recebem cópia.
/// - O mapa CPU → nó é fixo após o boot.

use alloc::vec::Vec;

use crate::klib::{CpuMask, MAX_CPUS};
use crate::sync::Spinlock;
use crate::sys::CpuId;

pub struct CpuTopology {
    nr_cpu_ids: usize,
    online: Spinlock<CpuMask>,
    node_of: Vec<u32>,
}

impl CpuTopology {
    /// Topologia plana: todas as CPUs no nó 0
    pub fn new(nr_cpu_ids: usize) -> Self {
        Self::with_nodes(nr_cpu_ids, &[])
    }

    /// `nodes[cpu]` é o nó da CPU; CPUs sem entrada ficam no nó 0
    pub fn with_nodes(nr_cpu_ids: usize, nodes: &[u32]) -> Self {
        let nr_cpu_ids = nr_cpu_ids.clamp(1, MAX_CPUS);
        let node_of = (0..nr_cpu_ids)
            .map(|cpu| nodes.get(cpu).copied().unwrap_or(0))
            .collect();
        Self {
            nr_cpu_ids,
            online: Spinlock::new(CpuMask::new()),
            node_of,
        }
    }

    /// Retorna o número de CPUs possíveis
    pub fn nr_cpu_ids(&self) -> usize {
        self.nr_cpu_ids
    }

    pub fn is_valid(&self, cpu: CpuId) -> bool {
        (cpu as usize) < self.nr_cpu_ids
    }

    pub fn set_online(&self, cpu: CpuId, online: bool) {
        let mut mask = self.online.lock();
        if online {
            mask.set(cpu);
        } else {
            mask.clear(cpu);
        }
    }

    pub fn is_online(&self, cpu: CpuId) -> bool {
        self.online.lock().test(cpu)
    }

    /// Cópia do mapa online
    pub fn online_mask(&self) -> CpuMask {
        *self.online.lock()
    }

    /// Alguma CPU online diferente de `cpu`
    pub fn any_online_except(&self, cpu: CpuId) -> Option<CpuId> {
        self.online.lock().any_except(cpu)
    }

    pub fn cpu_to_node(&self, cpu: CpuId) -> u32 {
        self.node_of.get(cpu as usize).copied().unwrap_or(0)
    }
}
