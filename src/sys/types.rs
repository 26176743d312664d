//! Tipos fundamentais do sistema

/// Identificador lógico de CPU física (0 a N-1)
pub type CpuId = u32;

/// Tempo do sistema em nanossegundos (monotônico, desde o boot)
pub type STime = i64;

/// Maior tempo representável
pub const STIME_MAX: STime = i64::MAX;

/// Converte milissegundos em `STime`
#[inline]
pub const fn millisecs(ms: i64) -> STime {
    ms * 1_000_000
}

/// Converte microssegundos em `STime`
#[inline]
pub const fn microsecs(us: i64) -> STime {
    us * 1_000
}

/// Domain ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DomId(pub u16);

impl DomId {
    /// Domínio privilegiado de gerenciamento
    pub const SYSTEM: DomId = DomId(0);
    /// Dono das VCPUs idle
    pub const IDLE: DomId = DomId(0x7fff);

    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

/// CPU pool ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PoolId(pub u32);

impl PoolId {
    /// Pool inicial, sempre existe e contém o domínio de sistema
    pub const DEFAULT: PoolId = PoolId(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Handle estável ("UUID") de um domínio.
///
/// Diferente do `DomId`, sobrevive a save/restore e é o que a tabela ARINC referencia.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct DomainHandle(pub [u8; 16]);

impl DomainHandle {
    /// O domínio de sistema sempre tem o handle nulo
    pub const SYSTEM: DomainHandle = DomainHandle([0; 16]);

    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn is_system(&self) -> bool {
        *self == Self::SYSTEM
    }
}
