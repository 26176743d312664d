//! Spinlock - bloqueio com busy-wait

use crate::sys::CpuId;

/// Spinlock - usa busy-wait, NÃO pode dormir
///
/// # Quando usar
///
/// - Seções críticas MUITO curtas (estrutura de timers de uma CPU, lista de pools)
/// - Dentro de SoftIRQs
/// - Quando não pode chamar o scheduler
///
/// # Quando NÃO usar
///
/// - Em volta de callbacks de timer (o callback pode chamar `set_timer`)
/// - Em volta de esperas cross-CPU (`kill_timer`, remoção de CPU de pool)
pub struct Spinlock<T> {
    inner: spin::Mutex<T>,
}

/// Guard do spinlock - libera ao sair do escopo
pub type SpinlockGuard<'a, T> = spin::MutexGuard<'a, T>;

impl<T> Spinlock<T> {
    /// Cria novo spinlock
    pub const fn new(data: T) -> Self {
        Self {
            inner: spin::Mutex::new(data),
        }
    }

    /// Adquire o lock
    #[inline]
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        self.inner.lock()
    }

    /// Tenta adquirir sem bloquear
    #[inline]
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        self.inner.try_lock()
    }

    /// Acesso exclusivo sem travar (o `&mut` já garante exclusão)
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Verifica se alguém segura o lock (apenas para asserções)
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<T: Default> Default for Spinlock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Adquire dois locks indexados por CPU, SEMPRE em ordem crescente de id.
///
/// Retorna os guards na ordem dos argumentos (`a`, `b`), não na ordem de aquisição.
/// Os dois locks nunca podem ser o mesmo: isso é um bug do chamador.
pub fn lock_pair<'a, T>(
    a: (CpuId, &'a Spinlock<T>),
    b: (CpuId, &'a Spinlock<T>),
) -> (SpinlockGuard<'a, T>, SpinlockGuard<'a, T>) {
    crate::bug_on!(a.0 == b.0, "(Sync) lock_pair com a mesma CPU duas vezes");

    if a.0 < b.0 {
        let ga = a.1.lock();
        let gb = b.1.lock();
        (ga, gb)
    } else {
        let gb = b.1.lock();
        let ga = a.1.lock();
        (ga, gb)
    }
}
