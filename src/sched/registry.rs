//! Registro de schedulers
//!
//! Tabela de fábricas `(opt_name, sched_id)`. Os pools pedem instâncias por
//! id; o pool 0 sempre usa o scheduler padrão escolhido no boot.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use super::arinc653::Arinc653;
use super::config::SCHED_ID_ARINC653;
use super::plugin::Scheduler;
use crate::sync::Spinlock;
use crate::sys::{Errno, SysResult};

/// Constrói uma instância ainda não inicializada
pub type SchedulerFactory = Arc<dyn Fn() -> Box<dyn Scheduler> + Send + Sync>;

#[derive(Clone)]
struct RegistryEntry {
    opt_name: &'static str,
    sched_id: u32,
    factory: SchedulerFactory,
}

pub struct SchedulerRegistry {
    entries: Spinlock<Vec<RegistryEntry>>,
    default_id: AtomicU32,
}

impl SchedulerRegistry {
    /// Registro vazio; o padrão aponta para o ARINC 653 mesmo sem registrá-lo
    pub fn empty() -> Self {
        Self {
            entries: Spinlock::new(Vec::new()),
            default_id: AtomicU32::new(SCHED_ID_ARINC653),
        }
    }

    /// Registro com os schedulers embutidos
    pub fn with_builtin() -> Self {
        let registry = Self::empty();
        let factory: SchedulerFactory = Arc::new(|| -> Box<dyn Scheduler> { Box::new(Arinc653::new()) });
        // Registro vazio: não há id duplicado possível.
        let _ = registry.register("arinc653", SCHED_ID_ARINC653, factory);
        registry
    }

    /// Adiciona uma fábrica. `EEXIST` se o id ou o nome já existem.
    pub fn register(
        &self,
        opt_name: &'static str,
        sched_id: u32,
        factory: SchedulerFactory,
    ) -> SysResult<()> {
        let mut entries = self.entries.lock();
        if entries
            .iter()
            .any(|e| e.sched_id == sched_id || e.opt_name == opt_name)
        {
            return Err(Errno::EEXIST);
        }
        entries.try_reserve(1)?;
        entries.push(RegistryEntry {
            opt_name,
            sched_id,
            factory,
        });
        Ok(())
    }

    /// Id do scheduler com `opt_name`
    pub fn find_by_name(&self, opt_name: &str) -> Option<u32> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.opt_name == opt_name)
            .map(|e| e.sched_id)
    }

    pub fn contains(&self, sched_id: u32) -> bool {
        self.entries.lock().iter().any(|e| e.sched_id == sched_id)
    }

    /// Escolhe o padrão pelo nome (`sched=` na linha de comando)
    pub fn set_default(&self, opt_name: &str) -> SysResult<()> {
        let id = self.find_by_name(opt_name).ok_or(Errno::EINVAL)?;
        self.default_id.store(id, Ordering::Release);
        Ok(())
    }

    pub fn default_id(&self) -> u32 {
        self.default_id.load(Ordering::Acquire)
    }

    /// Constrói e inicializa uma instância. `ENOENT` para id desconhecido.
    pub fn alloc(&self, sched_id: u32) -> SysResult<Box<dyn Scheduler>> {
        let factory = self
            .entries
            .lock()
            .iter()
            .find(|e| e.sched_id == sched_id)
            .map(|e| e.factory.clone())
            .ok_or(Errno::ENOENT)?;

        // Fábrica roda sem o lock do registro.
        let mut sched = factory();
        sched.init()?;
        crate::kdebug!("(Sched) Instância de scheduler criada, id=", sched_id);
        Ok(sched)
    }

    pub fn alloc_default(&self) -> SysResult<Box<dyn Scheduler>> {
        self.alloc(self.default_id())
    }
}
