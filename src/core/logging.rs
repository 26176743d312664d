// =============================================================================
// SCHEDULING CORE LOGGING SYSTEM - ZERO OVERHEAD
// =============================================================================
//
// Sistema de logging do núcleo de escalonamento com custo ZERO em release.
//
// ARQUITETURA:
// - Usa features do Cargo para compile-time filtering
// - Com feature "no_logs", TODOS os macros viram expressões vazias
// - SEM alocação - Apenas strings literais + um valor hexadecimal opcional
// - Escreve num `LogSink` registrado pelo integrador (console serial, buffer
//   de anel, stdout no simulador). Sem sink, as linhas são descartadas.
// - Cada linha é emitida sob um lock próprio: linhas de CPUs diferentes
//   nunca se misturam.
//
// NÍVEIS DE LOG (do mais crítico ao menos):
// - ERROR: Erros fatais ou críticos
// - WARN:  Situações suspeitas mas recuperáveis
// - INFO:  Fluxo normal de execução
// - DEBUG: Informações de debugging
// - TRACE: Detalhes extremos (cada operação)
//
// COMO USAR:
//   kinfo!("(Pool) Criando pool...");           // Apenas string
//   kinfo!("(Pool) Criado id=", id);            // String + hex
//
// =============================================================================

use crate::sync::Spinlock;

// =============================================================================
// PREFIXOS COM CORES ANSI
// =============================================================================

pub const P_ERROR: &str = "\x1b[1;31m[ERRO]\x1b[0m ";
pub const P_WARN: &str = "\x1b[1;33m[WARN]\x1b[0m ";
pub const P_INFO: &str = "\x1b[32m[INFO]\x1b[0m ";
pub const P_DEBUG: &str = "\x1b[36m[DEBG]\x1b[0m ";
pub const P_TRACE: &str = "\x1b[35m[TRAC]\x1b[0m ";

// =============================================================================
// SINK
// =============================================================================

/// Destino das linhas de log
pub trait LogSink: Sync {
    fn write_str(&self, s: &str);
}

static SINK: spin::Once<&'static dyn LogSink> = spin::Once::new();
static LINE_LOCK: Spinlock<()> = Spinlock::new(());

/// Registra o sink global. Apenas a primeira chamada tem efeito.
pub fn set_sink(sink: &'static dyn LogSink) {
    SINK.call_once(|| sink);
}

/// Emite uma linha completa: prefixo + mensagem + valor hex opcional.
pub fn emit_line(prefix: &str, msg: &str, val: Option<u64>) {
    let Some(sink) = SINK.get() else {
        return;
    };

    let _line = LINE_LOCK.lock();
    sink.write_str(prefix);
    sink.write_str(msg);
    if let Some(v) = val {
        let mut buf = [0u8; 18];
        sink.write_str(format_hex(v, &mut buf));
    }
    sink.write_str("\n");
}

/// Formata `0x...` sem core::fmt
fn format_hex(mut v: u64, buf: &mut [u8; 18]) -> &str {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = DIGITS[(v & 0xf) as usize];
        v >>= 4;
        if v == 0 {
            break;
        }
    }
    pos -= 1;
    buf[pos] = b'x';
    pos -= 1;
    buf[pos] = b'0';
    core::str::from_utf8(&buf[pos..]).unwrap_or("0x?")
}

// =============================================================================
// MACROS DE LOG - NÍVEL ERROR
// =============================================================================
//
// kerror! - Sempre ativo (exceto com no_logs)
//

#[cfg(not(feature = "no_logs"))]
#[macro_export]
macro_rules! kerror {
    ($msg:expr) => {{
        $crate::core::logging::emit_line($crate::core::logging::P_ERROR, $msg, None);
    }};
    ($msg:expr, $val:expr) => {{
        $crate::core::logging::emit_line($crate::core::logging::P_ERROR, $msg, Some($val as u64));
    }};
}

#[cfg(feature = "no_logs")]
#[macro_export]
macro_rules! kerror {
    ($($t:tt)*) => {{}};
}

// =============================================================================
// MACROS DE LOG - NÍVEL WARN
// =============================================================================

#[cfg(not(feature = "no_logs"))]
#[macro_export]
macro_rules! kwarn {
    ($msg:expr) => {{
        $crate::core::logging::emit_line($crate::core::logging::P_WARN, $msg, None);
    }};
    ($msg:expr, $val:expr) => {{
        $crate::core::logging::emit_line($crate::core::logging::P_WARN, $msg, Some($val as u64));
    }};
}

#[cfg(feature = "no_logs")]
#[macro_export]
macro_rules! kwarn {
    ($($t:tt)*) => {{}};
}

// =============================================================================
// MACROS DE LOG - NÍVEL INFO
// =============================================================================

#[cfg(all(
    not(feature = "no_logs"),
    any(feature = "log_info", feature = "log_debug", feature = "log_trace")
))]
#[macro_export]
macro_rules! kinfo {
    ($msg:expr) => {{
        $crate::core::logging::emit_line($crate::core::logging::P_INFO, $msg, None);
    }};
    ($msg:expr, $val:expr) => {{
        $crate::core::logging::emit_line($crate::core::logging::P_INFO, $msg, Some($val as u64));
    }};
}

#[cfg(not(all(
    not(feature = "no_logs"),
    any(feature = "log_info", feature = "log_debug", feature = "log_trace")
)))]
#[macro_export]
macro_rules! kinfo {
    ($($t:tt)*) => {{}};
}

// =============================================================================
// MACROS DE LOG - NÍVEL DEBUG
// =============================================================================

#[cfg(all(
    not(feature = "no_logs"),
    any(feature = "log_debug", feature = "log_trace")
))]
#[macro_export]
macro_rules! kdebug {
    ($msg:expr) => {{
        $crate::core::logging::emit_line($crate::core::logging::P_DEBUG, $msg, None);
    }};
    ($msg:expr, $val:expr) => {{
        $crate::core::logging::emit_line($crate::core::logging::P_DEBUG, $msg, Some($val as u64));
    }};
}

#[cfg(not(all(
    not(feature = "no_logs"),
    any(feature = "log_debug", feature = "log_trace")
)))]
#[macro_export]
macro_rules! kdebug {
    ($($t:tt)*) => {{}};
}

// =============================================================================
// MACROS DE LOG - NÍVEL TRACE
// =============================================================================

#[cfg(all(not(feature = "no_logs"), feature = "log_trace"))]
#[macro_export]
macro_rules! ktrace {
    ($msg:expr) => {{
        $crate::core::logging::emit_line($crate::core::logging::P_TRACE, $msg, None);
    }};
    ($msg:expr, $val:expr) => {{
        $crate::core::logging::emit_line($crate::core::logging::P_TRACE, $msg, Some($val as u64));
    }};
}

#[cfg(not(all(not(feature = "no_logs"), feature = "log_trace")))]
#[macro_export]
macro_rules! ktrace {
    ($($t:tt)*) => {{}};
}

#[cfg(test)]
mod tests {
    use super::format_hex;

    #[test]
    fn hex_formatting() {
        let mut buf = [0u8; 18];
        assert_eq!(format_hex(0, &mut buf), "0x0");
        let mut buf = [0u8; 18];
        assert_eq!(format_hex(0xdead_beef, &mut buf), "0xdeadbeef");
        let mut buf = [0u8; 18];
        assert_eq!(format_hex(u64::MAX, &mut buf), "0xffffffffffffffff");
    }
}
