//! System Definitions.
//!
//! Contém as constantes e tipos que definem a interface entre o núcleo de
//! escalonamento e o canal de controle.

pub mod error;
pub mod types;

pub use error::{Errno, SysResult};
pub use types::{microsecs, millisecs, CpuId, DomId, DomainHandle, PoolId, STime, STIME_MAX};
