/// Arquivo: core/smp/mod.rs
///
/// Propósito: Módulo de Multiprocessamento Simétrico (SMP).
/// Estado por-CPU, mapa de CPUs online e a comunicação entre CPUs.
///
/// Módulos contidos:
/// - `percpu`: Slots indexados por CPU.
/// - `topology`: CPUs possíveis, online e nó NUMA de cada uma.
/// - `softirq`: Trabalho adiado por CPU (TIMER, SCHEDULE, CALL_FUNCTION).
/// - `call`: Continuações cross-CPU com sinal de conclusão.

pub mod call;
pub mod percpu;
pub mod softirq;
pub mod topology;

pub use call::{CallQueues, Completion, OtherCpu, RemoteCall};
pub use percpu::PerCpu;
pub use softirq::{Softirq, SoftirqTable};
pub use topology::CpuTopology;
