/// Arquivo: core/boot/cmdline.rs
///
/// Propósito: Parser da linha de comando de boot.
/// Traduz tokens `chave=valor` separados por espaço para `BootParams`.
///
/// Detalhes de Implementação:
/// - Chaves conhecidas: `timer_slop=<ns>`, `sched=<opt_name>`, `nr_cpus=<n>`.
/// - Chave desconhecida gera `kwarn!` e é ignorada.
/// - Valor malformado é `EINVAL`; nada é aplicado parcialmente.

use alloc::string::{String, ToString};

use crate::core::time::DEFAULT_TIMER_SLOP;
use crate::klib::MAX_CPUS;
use crate::sched::config::DEFAULT_SCHEDULER;
use crate::sys::{Errno, STime, SysResult};

/// CPUs possíveis se a linha de comando não disser
pub const DEFAULT_NR_CPUS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootParams {
    /// Atraso entre o deadline mais próximo e a interrupção programada
    pub timer_slop: STime,
    /// `opt_name` do scheduler padrão (pool 0)
    pub sched: String,
    /// CPUs possíveis (`nr_cpu_ids`)
    pub nr_cpus: usize,
}

impl Default for BootParams {
    fn default() -> Self {
        Self {
            timer_slop: DEFAULT_TIMER_SLOP,
            sched: DEFAULT_SCHEDULER.to_string(),
            nr_cpus: DEFAULT_NR_CPUS,
        }
    }
}

impl BootParams {
    /// Interpreta a linha de comando inteira
    pub fn parse(cmdline: &str) -> SysResult<Self> {
        let mut params = Self::default();

        for token in cmdline.split_ascii_whitespace() {
            let (key, value) = match token.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (token, None),
            };

            match key {
                "timer_slop" => {
                    let ns: u32 = parse_value(value)?;
                    params.timer_slop = ns as STime;
                }
                "sched" => {
                    let name = value.ok_or(Errno::EINVAL)?;
                    if name.is_empty() {
                        return Err(Errno::EINVAL);
                    }
                    params.sched = name.to_string();
                }
                "nr_cpus" => {
                    let n: usize = parse_value(value)?;
                    if n == 0 || n > MAX_CPUS {
                        return Err(Errno::EINVAL);
                    }
                    params.nr_cpus = n;
                }
                _ => crate::kwarn!("(Boot) Parâmetro desconhecido ignorado"),
            }
        }

        Ok(params)
    }
}

fn parse_value<T: core::str::FromStr>(value: Option<&str>) -> SysResult<T> {
    value
        .ok_or(Errno::EINVAL)?
        .parse()
        .map_err(|_| Errno::EINVAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::microsecs;

    #[test]
    fn empty_line_gives_defaults() {
        let p = BootParams::parse("").unwrap();
        assert_eq!(p, BootParams::default());
        assert_eq!(p.timer_slop, microsecs(50));
        assert_eq!(p.sched, "arinc653");
    }

    #[test]
    fn known_keys_are_applied() {
        let p = BootParams::parse("  timer_slop=1000 sched=arinc653   nr_cpus=8 quiet").unwrap();
        assert_eq!(p.timer_slop, 1000);
        assert_eq!(p.nr_cpus, 8);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert_eq!(BootParams::parse("timer_slop=abc"), Err(Errno::EINVAL));
        assert_eq!(BootParams::parse("timer_slop"), Err(Errno::EINVAL));
        assert_eq!(BootParams::parse("nr_cpus=0"), Err(Errno::EINVAL));
        assert_eq!(BootParams::parse("nr_cpus=100000"), Err(Errno::EINVAL));
        assert_eq!(BootParams::parse("sched="), Err(Errno::EINVAL));
    }
}
