/// Arquivo: core/smp/percpu.rs
///
/// Propósito: Dados replicados por CPU.
/// Cada CPU possível tem seu próprio slot; o slot nunca é liberado enquanto
/// o dono existir, então referências a ele são estáveis.
///
/// Detalhes de Implementação:
/// - Abordagem baseada em slice: `PerCpu<T>` mantém `Box<[T]>` com `nr_cpu_ids` slots.
/// - O acesso é indexado por `CpuId` explícito; a sincronização fica a cargo de `T`
///   (locks ou atomics dentro do slot).

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::sys::CpuId;

pub struct PerCpu<T> {
    slots: Box<[T]>,
}

impl<T> PerCpu<T> {
    /// Cria `nr_cpus` slots, cada um inicializado por `init(cpu)`
    pub fn new(nr_cpus: usize, mut init: impl FnMut(CpuId) -> T) -> Self {
        let slots: Vec<T> = (0..nr_cpus).map(|cpu| init(cpu as CpuId)).collect();
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    /// Slot da CPU `cpu`. Índice fora do intervalo é bug do chamador.
    #[inline]
    pub fn get(&self, cpu: CpuId) -> &T {
        &self.slots[cpu as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Itera `(cpu, slot)`
    pub fn iter(&self) -> impl Iterator<Item = (CpuId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(cpu, slot)| (cpu as CpuId, slot))
    }
}
