/// Arquivo: core/time/timer.rs
///
/// Propósito: Serviço global de timers one-shot por CPU.
/// Qualquer parte do núcleo registra um callback com deadline numa CPU
/// específica; a softirq TIMER daquela CPU executa os vencidos exatamente uma vez.
///
/// Detalhes de Implementação:
/// - Por CPU: heap limitado + lista de overflow ordenada + conjunto de inativos,
///   tudo sob um spinlock próprio.
/// - O dono (`cpu`) de um timer muda com migração; quem quer travar o timer lê
///   o dono com Acquire, trava aquela CPU e confere se o dono não mudou.
/// - O timer em execução em cada CPU é publicado num atomic lido sem lock por
///   `kill_timer`, que gira até nenhuma CPU estar executando o timer morto.
/// - Locks de duas CPUs são SEMPRE adquiridos em ordem crescente (`lock_pair`).

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use super::heap::{HeapEntry, TimerHeap};
use crate::core::smp::{CpuTopology, PerCpu, Softirq, SoftirqTable};
use crate::hal::Platform;
use crate::sync::{lock_pair, Spinlock, SpinlockGuard};
use crate::sys::{CpuId, STime};

/// Callback de timer
pub type TimerFn = Arc<dyn Fn() + Send + Sync>;

/// Valor de `cpu` de um timer morto
const CPU_KILLED: u32 = u32::MAX;

/// Nenhum timer em execução
const NOT_RUNNING: u64 = 0;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Estado de um timer
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    /// Em transição (fora de qualquer estrutura), ou nunca inicializado
    Invalid = 0,
    /// Registrado, não armado
    Inactive = 1,
    /// Armado, no heap
    InHeap = 2,
    /// Armado, na lista de overflow
    InList = 3,
    /// Morto; toda operação vira no-op
    Killed = 4,
}

impl TimerStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Inactive,
            2 => Self::InHeap,
            3 => Self::InList,
            4 => Self::Killed,
            _ => Self::Invalid,
        }
    }
}

/// Estado compartilhado de um timer.
///
/// Os campos são atomics para que o `Arc` seja `Sync`, mas só mudam com o
/// lock da CPU dona segurado (exceto `cpu`, lido sem lock).
pub(crate) struct TimerEntry {
    id: u64,
    cpu: AtomicU32,
    expires: AtomicI64,
    status: AtomicU8,
    heap_offset: AtomicUsize,
    callback: Spinlock<Option<TimerFn>>,
}

impl TimerEntry {
    fn status(&self) -> TimerStatus {
        TimerStatus::from_u8(self.status.load(Ordering::Relaxed))
    }

    fn set_status(&self, status: TimerStatus) {
        self.status.store(status as u8, Ordering::Relaxed);
    }

    fn is_active(&self) -> bool {
        matches!(self.status(), TimerStatus::InHeap | TimerStatus::InList)
    }
}

impl HeapEntry for Arc<TimerEntry> {
    #[inline]
    fn expires(&self) -> STime {
        self.expires.load(Ordering::Relaxed)
    }

    #[inline]
    fn heap_offset(&self) -> usize {
        self.heap_offset.load(Ordering::Relaxed)
    }

    #[inline]
    fn set_heap_offset(&self, pos: usize) {
        self.heap_offset.store(pos, Ordering::Relaxed);
    }
}

/// Timer de propriedade do chamador.
///
/// Criar o handle não registra nada; use `TimerService::init_timer`. Um timer
/// inicializado deve ser morto com `kill_timer` antes de ser descartado.
pub struct Timer {
    entry: Arc<TimerEntry>,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            entry: Arc::new(TimerEntry {
                id: NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed),
                cpu: AtomicU32::new(CPU_KILLED),
                expires: AtomicI64::new(0),
                status: AtomicU8::new(TimerStatus::Invalid as u8),
                heap_offset: AtomicUsize::new(0),
                callback: Spinlock::new(None),
            }),
        }
    }

    /// Identificador único (diagnóstico)
    pub fn id(&self) -> u64 {
        self.entry.id
    }

    pub fn status(&self) -> TimerStatus {
        self.entry.status()
    }

    /// Armado (no heap ou na lista)
    pub fn is_active(&self) -> bool {
        self.entry.is_active()
    }

    pub fn expires(&self) -> STime {
        self.entry.expires()
    }

    /// CPU dona, `None` se morto
    pub fn cpu(&self) -> Option<CpuId> {
        match self.entry.cpu.load(Ordering::Acquire) {
            CPU_KILLED => None,
            cpu => Some(cpu),
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Estruturas de timers de uma CPU
struct Timers {
    heap: TimerHeap<Arc<TimerEntry>>,
    /// Overflow, ordenada por `expires` (estável para empates)
    list: Vec<Arc<TimerEntry>>,
    inactive: BTreeMap<u64, Arc<TimerEntry>>,
}

impl Timers {
    const fn new() -> Self {
        Self {
            heap: TimerHeap::dummy(),
            list: Vec::new(),
            inactive: BTreeMap::new(),
        }
    }

    /// Insere na lista após todos com `expires` menor ou igual.
    /// Retorna `true` se virou a cabeça.
    fn add_to_list(&mut self, t: Arc<TimerEntry>) -> bool {
        let expires = t.expires();
        let pos = self.list.partition_point(|c| c.expires() <= expires);
        self.list.insert(pos, t);
        pos == 0
    }

    fn remove_from_list(&mut self, t: &TimerEntry) -> bool {
        let pos = self.list.iter().position(|c| c.id == t.id);
        let Some(pos) = pos else {
            crate::bug_on!(true, "(Timer) timer InList ausente da lista");
            return false;
        };
        self.list.remove(pos);
        pos == 0
    }

    /// Tenta o heap, cai na lista se cheio. Retorna `true` se o deadline
    /// mais próximo desta CPU mudou.
    fn add_entry(&mut self, t: Arc<TimerEntry>) -> bool {
        crate::bug_on!(
            t.status() != TimerStatus::Invalid,
            "(Timer) add_entry com timer em estado inesperado"
        );
        t.set_heap_offset(0);
        t.set_status(TimerStatus::InHeap);
        match self.heap.add(t) {
            Ok(new_top) => new_top,
            Err(t) => {
                t.set_status(TimerStatus::InList);
                self.add_to_list(t)
            }
        }
    }

    fn remove_entry(&mut self, t: &Arc<TimerEntry>) -> bool {
        let rc = match t.status() {
            TimerStatus::InHeap => self.heap.remove(t),
            TimerStatus::InList => self.remove_from_list(t),
            _ => {
                crate::bug_on!(true, "(Timer) remove_entry de timer não armado");
                false
            }
        };
        t.set_status(TimerStatus::Invalid);
        rc
    }

    /// Deadline bruto mais próximo (heap ou lista)
    fn nearest(&self) -> Option<STime> {
        let heap = self.heap.top().map(|t| t.expires());
        let list = self.list.first().map(|t| t.expires());
        match (heap, list) {
            (Some(h), Some(l)) => Some(h.min(l)),
            (h, l) => h.or(l),
        }
    }
}

/// Slot por CPU
struct CpuTimers {
    lock: Spinlock<Timers>,
    /// Id do timer em execução (lido sem lock)
    running: AtomicU64,
    /// Deadline programado (+ slop), 0 se nenhum
    deadline: AtomicI64,
}

pub struct TimerService {
    platform: Arc<dyn Platform>,
    topology: Arc<CpuTopology>,
    softirq: Arc<SoftirqTable>,
    cpus: PerCpu<CpuTimers>,
    slop: STime,
}

impl TimerService {
    pub fn new(
        platform: Arc<dyn Platform>,
        topology: Arc<CpuTopology>,
        softirq: Arc<SoftirqTable>,
        slop: STime,
    ) -> Self {
        let cpus = PerCpu::new(topology.nr_cpu_ids(), |_| CpuTimers {
            lock: Spinlock::new(Timers::new()),
            running: AtomicU64::new(NOT_RUNNING),
            deadline: AtomicI64::new(0),
        });
        crate::kinfo!("(Timer) Serviço de timers iniciado, slop(ns)=", slop);
        Self {
            platform,
            topology,
            softirq,
            cpus,
            slop,
        }
    }

    // =========================================================================
    // LOCKING
    // =========================================================================

    /// Trava a CPU dona de `t`. `None` se o timer está morto.
    fn timer_lock(&self, t: &TimerEntry) -> Option<(CpuId, SpinlockGuard<'_, Timers>)> {
        loop {
            let cpu = t.cpu.load(Ordering::Acquire);
            if cpu == CPU_KILLED {
                return None;
            }
            let guard = self.cpus.get(cpu).lock.lock();
            if t.cpu.load(Ordering::Relaxed) == cpu {
                return Some((cpu, guard));
            }
        }
    }

    fn activate(&self, ts: &mut Timers, cpu: CpuId, t: &Arc<TimerEntry>) {
        crate::bug_on!(
            t.status() != TimerStatus::Inactive,
            "(Timer) ativando timer que não está inativo"
        );
        t.set_status(TimerStatus::Invalid);
        ts.inactive.remove(&t.id);
        if ts.add_entry(t.clone()) {
            self.softirq.raise(cpu, Softirq::TIMER);
        }
    }

    fn deactivate(&self, ts: &mut Timers, cpu: CpuId, t: &Arc<TimerEntry>) {
        if ts.remove_entry(t) {
            self.softirq.raise(cpu, Softirq::TIMER);
        }
        t.set_status(TimerStatus::Inactive);
        ts.inactive.insert(t.id, t.clone());
    }

    // =========================================================================
    // API PÚBLICA
    // =========================================================================

    /// Registra `timer` como inativo em `cpu`
    pub fn init_timer(&self, timer: &Timer, callback: TimerFn, cpu: CpuId) {
        let t = &timer.entry;
        *t.callback.lock() = Some(callback);
        t.expires.store(0, Ordering::Relaxed);
        t.set_heap_offset(0);
        t.set_status(TimerStatus::Inactive);
        t.cpu.store(cpu, Ordering::Release);

        let Some((_, mut ts)) = self.timer_lock(t) else {
            crate::bug_on!(true, "(Timer) init_timer perdeu o timer");
            return;
        };
        ts.inactive.insert(t.id, t.clone());
    }

    /// (Re)arma `timer` para `expires`
    pub fn set_timer(&self, timer: &Timer, expires: STime) {
        let t = &timer.entry;
        let Some((cpu, mut ts)) = self.timer_lock(t) else {
            return;
        };
        if t.is_active() {
            self.deactivate(&mut ts, cpu, t);
        }
        t.expires.store(expires, Ordering::Relaxed);
        self.activate(&mut ts, cpu, t);
    }

    /// Desarma `timer`; idempotente
    pub fn stop_timer(&self, timer: &Timer) {
        let t = &timer.entry;
        let Some((cpu, mut ts)) = self.timer_lock(t) else {
            return;
        };
        if t.is_active() {
            self.deactivate(&mut ts, cpu, t);
        }
    }

    /// Move `timer` para `new_cpu`, preservando se está armado
    pub fn migrate_timer(&self, timer: &Timer, new_cpu: CpuId) {
        let t = &timer.entry;
        let (old_cpu, mut old_ts, mut new_ts) = loop {
            let old_cpu = t.cpu.load(Ordering::Acquire);
            if old_cpu == new_cpu || old_cpu == CPU_KILLED {
                return;
            }
            let (old_ts, new_ts) = lock_pair(
                (old_cpu, &self.cpus.get(old_cpu).lock),
                (new_cpu, &self.cpus.get(new_cpu).lock),
            );
            if t.cpu.load(Ordering::Relaxed) == old_cpu {
                break (old_cpu, old_ts, new_ts);
            }
        };

        let active = t.is_active();
        if active {
            self.deactivate(&mut old_ts, old_cpu, t);
        }

        old_ts.inactive.remove(&t.id);
        t.cpu.store(new_cpu, Ordering::Release);
        new_ts.inactive.insert(t.id, t.clone());

        if active {
            self.activate(&mut new_ts, new_cpu, t);
        }
        crate::ktrace!("(Timer) Timer migrado para CPU ", new_cpu);
    }

    /// Mata `timer`: desarma, desliga do dono e espera qualquer execução em
    /// andamento terminar. Depois do retorno o callback nunca mais roda.
    pub fn kill_timer(&self, timer: &Timer) {
        let t = &timer.entry;
        let here = self.platform.current_cpu();
        crate::bug_on!(
            self.topology.is_valid(here)
                && self.cpus.get(here).running.load(Ordering::Acquire) == t.id,
            "(Timer) kill_timer chamado de dentro do próprio callback"
        );

        {
            let Some((cpu, mut ts)) = self.timer_lock(t) else {
                return;
            };
            if t.is_active() {
                self.deactivate(&mut ts, cpu, t);
            }
            ts.inactive.remove(&t.id);
            t.set_status(TimerStatus::Killed);
            t.cpu.store(CPU_KILLED, Ordering::Release);
        }

        // Sem lock algum daqui em diante.
        for cpu in self.topology.online_mask().iter() {
            while self.cpus.get(cpu).running.load(Ordering::Acquire) == t.id {
                self.platform.cpu_relax();
            }
        }
    }

    // =========================================================================
    // SOFTIRQ
    // =========================================================================

    /// Processa os timers de `cpu`. Retorna o deadline bruto mais próximo
    /// que restou, se algum.
    pub fn softirq_action(&self, cpu: CpuId) -> Option<STime> {
        let slot = self.cpus.get(cpu);

        self.try_grow_heap(slot);

        let mut ts = slot.lock.lock();
        let now = self.platform.now();

        // Vencidos do heap
        loop {
            let due = match ts.heap.top() {
                Some(t) if t.expires() < now => t.clone(),
                _ => break,
            };
            ts.heap.remove(&due);
            due.set_status(TimerStatus::Invalid);
            ts = self.execute_timer(slot, ts, due);
        }

        // Vencidos da lista
        loop {
            if !matches!(ts.list.first(), Some(t) if t.expires() < now) {
                break;
            }
            let due = ts.list.remove(0);
            due.set_status(TimerStatus::Invalid);
            ts = self.execute_timer(slot, ts, due);
        }

        // Lista de volta para o heap, se couber
        let pending = core::mem::take(&mut ts.list);
        for t in pending {
            t.set_status(TimerStatus::Invalid);
            ts.add_entry(t);
        }

        let nearest = ts.nearest();
        let deadline = match nearest {
            Some(d) => d.saturating_add(self.slop),
            None => 0,
        };
        slot.deadline.store(deadline, Ordering::Release);

        if !self.platform.reprogram_timer(cpu, deadline) {
            self.softirq.raise(cpu, Softirq::TIMER);
        }

        nearest
    }

    /// Cresce o heap se houve overflow. Alocação fora do lock; falha mantém
    /// os timers na lista.
    fn try_grow_heap(&self, slot: &CpuTimers) {
        let limit = {
            let ts = slot.lock.lock();
            if ts.list.is_empty() {
                return;
            }
            ts.heap.limit()
        };

        let Some(new_limit) = TimerHeap::<Arc<TimerEntry>>::next_limit(limit) else {
            return;
        };

        let mut spare: Vec<Arc<TimerEntry>> = Vec::new();
        if spare.try_reserve_exact(new_limit as usize).is_err() {
            crate::kwarn!("(Timer) Sem memória para crescer heap, limite=", new_limit);
            return;
        }

        let mut ts = slot.lock.lock();
        if ts.heap.limit() == limit {
            ts.heap.grow_into(spare, new_limit);
            crate::kdebug!("(Timer) Heap cresceu para ", new_limit);
        }
    }

    /// Executa `t` com o lock da CPU solto em volta do callback
    fn execute_timer<'a>(
        &self,
        slot: &'a CpuTimers,
        mut ts: SpinlockGuard<'a, Timers>,
        t: Arc<TimerEntry>,
    ) -> SpinlockGuard<'a, Timers> {
        t.set_status(TimerStatus::Inactive);
        ts.inactive.insert(t.id, t.clone());

        let callback = t.callback.lock().clone();
        slot.running.store(t.id, Ordering::Release);
        drop(ts);

        if let Some(callback) = callback {
            callback();
        }

        let ts = slot.lock.lock();
        slot.running.store(NOT_RUNNING, Ordering::Release);
        ts
    }

    // =========================================================================
    // HOT-PLUG
    // =========================================================================

    /// CPU vai subir: volta ao heap dummy
    pub fn cpu_up_prepare(&self, cpu: CpuId) {
        let mut ts = self.cpus.get(cpu).lock.lock();
        crate::bug_on!(
            !ts.heap.is_empty() || !ts.list.is_empty(),
            "(Timer) CPU subindo com timers armados"
        );
        ts.heap = TimerHeap::dummy();
        self.cpus.get(cpu).deadline.store(0, Ordering::Release);
    }

    /// Move todos os timers de `old_cpu` (já offline) para uma CPU online
    pub fn migrate_timers_from_cpu(&self, old_cpu: CpuId) {
        let Some(new_cpu) = self.topology.any_online_except(old_cpu) else {
            crate::bug_on!(true, "(Timer) nenhuma CPU online para receber timers");
            return;
        };

        let mut notify = false;
        let mut moved = 0usize;
        {
            let (mut old_ts, mut new_ts) = lock_pair(
                (old_cpu, &self.cpus.get(old_cpu).lock),
                (new_cpu, &self.cpus.get(new_cpu).lock),
            );

            loop {
                let next = old_ts.heap.top().or(old_ts.list.first()).cloned();
                let Some(t) = next else {
                    break;
                };
                old_ts.remove_entry(&t);
                t.cpu.store(new_cpu, Ordering::Release);
                notify |= new_ts.add_entry(t);
                moved += 1;
            }

            let inactive = core::mem::take(&mut old_ts.inactive);
            for (id, t) in inactive {
                t.cpu.store(new_cpu, Ordering::Release);
                new_ts.inactive.insert(id, t);
                moved += 1;
            }
        }

        if notify {
            self.softirq.raise(new_cpu, Softirq::TIMER);
        }
        crate::kdebug!("(Timer) Timers migrados de CPU offline, total=", moved);
    }

    // =========================================================================
    // DIAGNÓSTICO
    // =========================================================================

    /// Deadline programado em `cpu` (com slop), 0 se nenhum
    pub fn timer_deadline(&self, cpu: CpuId) -> STime {
        self.cpus.get(cpu).deadline.load(Ordering::Acquire)
    }

    /// `(heap, lista, inativos)` de `cpu`
    pub fn queue_lengths(&self, cpu: CpuId) -> (usize, usize, usize) {
        let ts = self.cpus.get(cpu).lock.lock();
        (ts.heap.size(), ts.list.len(), ts.inactive.len())
    }

    /// Limite atual do heap de `cpu`
    pub fn heap_limit(&self, cpu: CpuId) -> usize {
        self.cpus.get(cpu).lock.lock().heap.limit()
    }

    /// Tecla 'a': filas de timers de cada CPU online
    pub fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let now = self.platform.now();
        writeln!(out, "Dumping timer queues:")?;
        for cpu in self.topology.online_mask().iter() {
            writeln!(out, "CPU{:02}:", cpu)?;
            let ts = self.cpus.get(cpu).lock.lock();
            for t in ts.heap.iter().chain(ts.list.iter()) {
                let delta = t.expires().saturating_sub(now) / 1000;
                writeln!(out, "  ex={:8}us timer=#{}", delta, t.id)?;
            }
        }
        Ok(())
    }
}

/// Arredonda `firsttick` para cima até o próximo múltiplo de `period`
pub fn align_timer(firsttick: STime, period: u64) -> STime {
    if period == 0 {
        return firsttick;
    }
    let period = period as i64;
    firsttick + (period - 1) - (firsttick - 1).rem_euclid(period)
}

impl fmt::Debug for TimerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("nr_cpus", &self.cpus.len())
            .field("slop", &self.slop)
            .finish()
    }
}
