/// Arquivo: core/debug/mod.rs
///
/// Propósito: Módulo de diagnóstico e depuração.
///
/// Módulos contidos:
/// - `bug`: Asserções fatais (`bug_on!`) para violações de invariante.
/// - `keyhandler`: Teclas de diagnóstico do console (dump de timers e run queues).

pub mod bug;
pub mod keyhandler;

pub use keyhandler::{KeyAction, KeyHandler};
