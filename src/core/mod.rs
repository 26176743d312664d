//! Core Module
//!
//! Serviços centrais do núcleo de escalonamento, independentes de política:
//! logging, asserções, parâmetros de boot, plumbing SMP, timers e a
//! `Machine` que amarra tudo.

pub mod boot;
pub mod debug;
pub mod logging;
pub mod machine;
pub mod smp;
pub mod time;
