//! Continuações cross-CPU
//!
//! Algumas operações não podem rodar na CPU que elas afetam (remover uma CPU
//! de um pool, por exemplo). Elas são postadas como [`RemoteCall`] na fila de
//! outra CPU, que as executa ao processar `CALL_FUNCTION`.
//!
//! O destino é um [`OtherCpu`]: só é construído por `OtherCpu::pick`, que
//! garante `destino != excluída`. Uma continuação que recebe um `OtherCpu`
//! nunca roda na CPU excluída.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;

use super::{PerCpu, Softirq, SoftirqTable};
use crate::hal::Platform;
use crate::klib::CpuMask;
use crate::sync::Spinlock;
use crate::sys::{CpuId, Errno, SysResult};

/// CPU de trabalho comprovadamente diferente da CPU excluída
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtherCpu {
    target: CpuId,
    excluded: CpuId,
}

impl OtherCpu {
    /// Usa `preferred` se ela não for a excluída; senão a menor CPU de
    /// `candidates` diferente de `excluded`.
    pub fn pick(preferred: CpuId, candidates: &CpuMask, excluded: CpuId) -> Option<OtherCpu> {
        let target = if preferred != excluded {
            preferred
        } else {
            candidates.any_except(excluded)?
        };
        Some(OtherCpu { target, excluded })
    }

    pub fn target(&self) -> CpuId {
        self.target
    }

    pub fn excluded(&self) -> CpuId {
        self.excluded
    }
}

/// Trabalho executado em outra CPU
pub trait RemoteCall: Send {
    /// Executa na CPU `cpu` (o alvo escolhido por `OtherCpu`)
    fn run(self: Box<Self>, cpu: CpuId) -> SysResult<()>;
}

/// Sinal de conclusão de uma continuação
#[derive(Clone)]
pub struct Completion {
    slot: Arc<spin::Once<SysResult<()>>>,
}

impl Completion {
    fn new() -> Self {
        Self {
            slot: Arc::new(spin::Once::new()),
        }
    }

    /// Já concluída (sucesso)
    pub fn done(result: SysResult<()>) -> Self {
        let c = Self::new();
        c.complete(result);
        c
    }

    fn complete(&self, result: SysResult<()>) {
        self.slot.call_once(|| result);
    }

    /// Resultado, se já disponível
    pub fn poll(&self) -> Option<SysResult<()>> {
        self.slot.get().copied()
    }

    /// Gira até a CPU remota concluir. Não segura lock algum.
    pub fn wait(&self, platform: &dyn Platform) -> SysResult<()> {
        loop {
            if let Some(result) = self.poll() {
                return result;
            }
            platform.cpu_relax();
        }
    }
}

struct Queued {
    target: OtherCpu,
    call: Box<dyn RemoteCall>,
    completion: Completion,
}

pub struct CallQueues {
    softirq: Arc<SoftirqTable>,
    queues: PerCpu<Spinlock<VecDeque<Queued>>>,
}

impl CallQueues {
    pub fn new(softirq: Arc<SoftirqTable>, nr_cpus: usize) -> Self {
        Self {
            softirq,
            queues: PerCpu::new(nr_cpus, |_| Spinlock::new(VecDeque::new())),
        }
    }

    /// Enfileira `call` na CPU alvo e levanta `CALL_FUNCTION` lá
    pub fn post(&self, target: OtherCpu, call: Box<dyn RemoteCall>) -> Completion {
        let completion = Completion::new();
        self.queues
            .get(target.target())
            .lock()
            .push_back(Queued {
                target,
                call,
                completion: completion.clone(),
            });
        crate::ktrace!("(Call) Continuação postada na CPU ", target.target());
        self.softirq.raise(target.target(), Softirq::CALL_FUNCTION);
        completion
    }

    /// Executa o que estiver na fila de `cpu`. Retorna quantas rodaram.
    pub fn run_pending(&self, cpu: CpuId) -> usize {
        let mut ran = 0;
        loop {
            // Lock solto antes de rodar: a continuação pode postar outra.
            let next = self.queues.get(cpu).lock().pop_front();
            let Some(queued) = next else {
                break;
            };
            queued.completion.complete(queued.call.run(cpu));
            ran += 1;
        }
        ran
    }

    /// Há trabalho não-scheduler pendente em `cpu`
    pub fn has_pending(&self, cpu: CpuId) -> bool {
        !self.queues.get(cpu).lock().is_empty()
    }

    /// Move as continuações da CPU `old` (já offline) para CPUs de `online`.
    ///
    /// Cada continuação é re-escolhida com `OtherCpu::pick`, então continua
    /// longe da CPU que ela exclui. Retorna quantas foram movidas.
    pub fn migrate_from_cpu(&self, old: CpuId, online: &CpuMask) -> usize {
        let drained = core::mem::take(&mut *self.queues.get(old).lock());
        let mut raised = CpuMask::new();
        let mut moved = 0;

        for mut queued in drained {
            let excluded = queued.target.excluded();
            let target = online
                .first()
                .and_then(|preferred| OtherCpu::pick(preferred, online, excluded));
            let Some(target) = target else {
                // Nenhuma CPU online serve: a única restante é a excluída.
                crate::kerror!("(Call) Continuação sem CPU de destino, excluída=", excluded);
                queued.completion.complete(Err(Errno::EBUSY));
                continue;
            };
            let dest = target.target();
            queued.target = target;
            self.queues.get(dest).lock().push_back(queued);
            raised.set(dest);
            moved += 1;
        }

        for dest in raised.iter() {
            self.softirq.raise(dest, Softirq::CALL_FUNCTION);
        }
        if moved > 0 {
            crate::kdebug!("(Call) Continuações migradas da CPU ", old);
        }
        moved
    }
}
