//! Trait de plataforma

use crate::sys::{CpuId, STime};

/// Serviços de hardware usados pelo núcleo.
///
/// Todos os métodos podem ser chamados de qualquer CPU e com locks do núcleo
/// segurados. Nenhum deles pode dormir.
pub trait Platform: Send + Sync {
    /// Tempo monotônico em nanossegundos (`NOW()`)
    fn now(&self) -> STime;

    /// CPU que está executando o chamador
    fn current_cpu(&self) -> CpuId;

    /// Programa o deadline one-shot do timer de `cpu` (`0` desarma).
    ///
    /// Retorna `false` se o deadline já passou; o chamador deve então
    /// processar os timers sem esperar pela interrupção.
    fn reprogram_timer(&self, cpu: CpuId, deadline: STime) -> bool;

    /// Envia IPI de "event check" para que `cpu` processe suas softirqs
    fn send_event_check(&self, cpu: CpuId);

    /// Hint de spin-loop
    #[inline]
    fn cpu_relax(&self) {
        core::hint::spin_loop();
    }
}
