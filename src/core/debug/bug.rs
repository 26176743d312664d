//! Asserções fatais
//!
//! Violação de invariante não é erro de runtime: é bug de lógica. `bug_on!`
//! registra a mensagem com `kerror!` e aborta via `panic!`.

/// Aborta se `cond` for verdadeira.
///
/// ```ignore
/// crate::bug_on!(slice <= 0, "(A653) fatia de tempo não positiva");
/// ```
#[macro_export]
macro_rules! bug_on {
    ($cond:expr, $msg:expr) => {{
        if $cond {
            $crate::kerror!("BUG: condição fatal violada");
            $crate::kerror!($msg);
            panic!("{}", $msg);
        }
    }};
}
