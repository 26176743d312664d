//! Teclas de diagnóstico
//!
//! O console de depuração despacha uma tecla para um dump. A tabela é fixa;
//! a execução fica com `Machine::handle_key`.

/// O que uma tecla faz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Filas de timers de cada CPU online
    DumpTimerQueues,
    /// Pools, schedulers e estado por CPU
    DumpRunQueues,
}

#[derive(Debug, Clone, Copy)]
pub struct KeyHandler {
    pub key: char,
    pub action: KeyAction,
    pub desc: &'static str,
    /// Só leitura de estado; seguro a qualquer momento
    pub diagnostic: bool,
}

static KEY_HANDLERS: &[KeyHandler] = &[
    KeyHandler {
        key: 'a',
        action: KeyAction::DumpTimerQueues,
        desc: "dump timer queues",
        diagnostic: true,
    },
    KeyHandler {
        key: 'r',
        action: KeyAction::DumpRunQueues,
        desc: "dump run queues",
        diagnostic: true,
    },
];

/// Handler registrado para `key`
pub fn lookup(key: char) -> Option<&'static KeyHandler> {
    KEY_HANDLERS.iter().find(|h| h.key == key)
}

/// Todos os handlers, em ordem de tecla
pub fn handlers() -> &'static [KeyHandler] {
    KEY_HANDLERS
}
