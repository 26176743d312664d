//! # Standard Error Codes (Errno)
//!
//! Define os códigos de erro retornados pelo núcleo de escalonamento.
//! Baseado no padrão POSIX para compatibilidade com o toolstack de controle.
//!
//! ## 🎯 Propósito e Responsabilidade
//! - **Uniformidade:** Todas as operações de controle (pools, tabela ARINC, timers)
//!   retornam códigos padronizados.
//! - **Conversion:** `as_isize` facilita o retorno negativo pelo canal de controle.
//!
//! ## Taxonomia
//! - *Admissão* (`EINVAL`, `ESRCH`, `ENOENT`): parâmetro ruim, nenhum estado muda.
//! - *Conflito* (`EBUSY`, `EEXIST`, `ENODEV`): recurso ocupado, nenhum estado muda.
//! - *Recurso* (`ENOMEM`): alocação falhou, propagado ao chamador.
//!
//! Violações de invariante NÃO são `Errno`: são `bug_on!` (fatal).

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    ENOENT = 2,  // No such entry
    ESRCH = 3,   // No such domain / pool
    EAGAIN = 11, // Try again
    ENOMEM = 12, // Out of memory
    EBUSY = 16,  // Device or resource busy
    EEXIST = 17, // Entry exists
    ENODEV = 19, // No such device (pool without CPUs)
    EINVAL = 22, // Invalid argument
    ENOSYS = 38, // Function not implemented
}

impl Errno {
    pub fn as_usize(self) -> usize {
        self as usize
    }

    pub fn as_isize(self) -> isize {
        -(self as i32) as isize
    }

    /// Retorna descrição legível do erro
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ENOENT => "entrada não encontrada",
            Self::ESRCH => "domínio ou pool inexistente",
            Self::EAGAIN => "tente novamente",
            Self::ENOMEM => "sem memória",
            Self::EBUSY => "recurso ocupado",
            Self::EEXIST => "entrada já existe",
            Self::ENODEV => "pool sem CPUs",
            Self::EINVAL => "argumento inválido",
            Self::ENOSYS => "operação não implementada",
        }
    }
}

impl core::fmt::Display for Errno {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?} ({})", self, self.as_str())
    }
}

/// Tipo Result das operações do núcleo
pub type SysResult<T> = Result<T, Errno>;

impl From<alloc::collections::TryReserveError> for Errno {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        Errno::ENOMEM
    }
}
