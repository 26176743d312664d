//! Heap mínimo limitado de timers
//!
//! Heap binário em array, posições 1-based (posição 0 significa "fora do
//! heap"). Cada entrada guarda sua própria posição, o que permite remover um
//! elemento arbitrário em O(log n): o último elemento ocupa o buraco e
//! afunda ou sobe conforme o caso.
//!
//! O heap tem um limite (`u16`). Quando cheio, `add` devolve a entrada e o
//! chamador usa a lista de overflow. O limite começa em 0 ("heap dummy") e
//! cresce como `(limite + 1) * 16 - 1`: 0, 15, 255, 4095, 65535.

use alloc::vec::Vec;

use crate::sys::STime;

use super::HEAP_GROWTH_FACTOR;

/// Entrada que sabe sua chave e sua posição no heap
pub trait HeapEntry {
    fn expires(&self) -> STime;
    fn heap_offset(&self) -> usize;
    fn set_heap_offset(&self, pos: usize);
}

pub struct TimerHeap<T> {
    slots: Vec<T>,
    limit: u16,
}

impl<T: HeapEntry> TimerHeap<T> {
    /// Heap vazio de limite 0
    pub const fn dummy() -> Self {
        Self {
            slots: Vec::new(),
            limit: 0,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Próximo a vencer
    #[inline]
    pub fn top(&self) -> Option<&T> {
        self.slots.first()
    }

    /// Próximo limite após `limit`, ou `None` se não cabe em `u16`
    pub fn next_limit(limit: usize) -> Option<u16> {
        let next = (limit + 1) * HEAP_GROWTH_FACTOR - 1;
        u16::try_from(next).ok()
    }

    /// Troca o array por `spare` (já com capacidade para `new_limit`)
    pub fn grow_into(&mut self, mut spare: Vec<T>, new_limit: u16) {
        crate::bug_on!(
            (new_limit as usize) < self.slots.len() || spare.capacity() < new_limit as usize,
            "(Timer) crescimento de heap com capacidade insuficiente"
        );
        spare.clear();
        spare.append(&mut self.slots);
        self.slots = spare;
        self.limit = new_limit;
    }

    /// Insere. `Ok(true)` se virou o topo; `Err(entry)` se o heap está cheio.
    pub fn add(&mut self, entry: T) -> Result<bool, T> {
        if self.slots.len() >= self.limit as usize {
            return Err(entry);
        }
        self.slots.push(entry);
        let pos = self.slots.len();
        self.slots[pos - 1].set_heap_offset(pos);
        let pos = self.up(pos);
        Ok(pos == 1)
    }

    /// Remove a entrada na posição `entry.heap_offset()`. Retorna `true` se
    /// o topo mudou.
    pub fn remove(&mut self, entry: &T) -> bool {
        let pos = entry.heap_offset();
        let sz = self.slots.len();
        crate::bug_on!(pos == 0 || pos > sz, "(Timer) posição de heap inválida");

        let removed = self.slots.swap_remove(pos - 1);
        removed.set_heap_offset(0);

        if pos <= self.slots.len() {
            self.slots[pos - 1].set_heap_offset(pos);
            if pos > 1 && self.key(pos) < self.key(pos >> 1) {
                self.up(pos);
            } else {
                self.down(pos);
            }
        }

        pos == 1
    }

    /// Remove e retorna o topo
    pub fn pop(&mut self) -> Option<T> {
        if self.slots.is_empty() {
            return None;
        }
        let last = self.slots.len() - 1;
        self.swap(1, last + 1);
        let top = self.slots.pop()?;
        top.set_heap_offset(0);
        if !self.slots.is_empty() {
            self.down(1);
        }
        Some(top)
    }

    pub fn iter(&self) -> core::slice::Iter<'_, T> {
        self.slots.iter()
    }

    #[inline]
    fn key(&self, pos: usize) -> STime {
        self.slots[pos - 1].expires()
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.slots.swap(a - 1, b - 1);
        self.slots[a - 1].set_heap_offset(a);
        self.slots[b - 1].set_heap_offset(b);
    }

    /// Afunda `pos`
    fn down(&mut self, mut pos: usize) -> usize {
        let sz = self.slots.len();
        loop {
            let mut nxt = pos << 1;
            if nxt > sz {
                break;
            }
            if nxt + 1 <= sz && self.key(nxt + 1) < self.key(nxt) {
                nxt += 1;
            }
            if self.key(nxt) > self.key(pos) {
                break;
            }
            self.swap(pos, nxt);
            pos = nxt;
        }
        pos
    }

    /// Sobe `pos`
    fn up(&mut self, mut pos: usize) -> usize {
        while pos > 1 && self.key(pos) < self.key(pos >> 1) {
            self.swap(pos, pos >> 1);
            pos >>= 1;
        }
        pos
    }
}
