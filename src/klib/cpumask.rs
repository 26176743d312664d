//! Máscara de CPUs (bitmap de tamanho fixo)
//!
//! Usada para o conjunto de CPUs online, as CPUs de cada pool, as CPUs livres
//! e as afinidades de VCPU. Cópia barata (`Copy`), sem alocação.

use crate::sys::CpuId;

/// Número máximo de CPUs suportadas.
pub const MAX_CPUS: usize = 256;

const WORDS: usize = MAX_CPUS / 64;

/// Bitmap de CPUs
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuMask {
    bits: [u64; WORDS],
}

impl CpuMask {
    /// Máscara vazia
    pub const fn new() -> Self {
        Self { bits: [0; WORDS] }
    }

    /// Máscara com as CPUs `0..n`
    pub fn first_n(n: usize) -> Self {
        let mut mask = Self::new();
        for cpu in 0..n.min(MAX_CPUS) {
            mask.set(cpu as CpuId);
        }
        mask
    }

    /// Máscara com as CPUs listadas
    pub fn from_cpus(cpus: &[CpuId]) -> Self {
        let mut mask = Self::new();
        for &cpu in cpus {
            mask.set(cpu);
        }
        mask
    }

    /// Define um bit
    pub fn set(&mut self, cpu: CpuId) {
        let index = cpu as usize;
        debug_assert!(index < MAX_CPUS);
        self.bits[index / 64] |= 1u64 << (index % 64);
    }

    /// Limpa um bit
    pub fn clear(&mut self, cpu: CpuId) {
        let index = cpu as usize;
        debug_assert!(index < MAX_CPUS);
        self.bits[index / 64] &= !(1u64 << (index % 64));
    }

    /// Testa um bit
    pub fn test(&self, cpu: CpuId) -> bool {
        let index = cpu as usize;
        if index >= MAX_CPUS {
            return false;
        }
        (self.bits[index / 64] & (1u64 << (index % 64))) != 0
    }

    /// Número de CPUs na máscara
    pub fn weight(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }

    /// Menor CPU presente
    pub fn first(&self) -> Option<CpuId> {
        self.next_from(0)
    }

    /// Maior CPU presente
    pub fn last(&self) -> Option<CpuId> {
        for (i, &word) in self.bits.iter().enumerate().rev() {
            if word != 0 {
                let bit = 63 - word.leading_zeros() as usize;
                return Some((i * 64 + bit) as CpuId);
            }
        }
        None
    }

    /// Próxima CPU estritamente maior que `cpu`
    pub fn next(&self, cpu: CpuId) -> Option<CpuId> {
        self.next_from(cpu as usize + 1)
    }

    fn next_from(&self, start: usize) -> Option<CpuId> {
        if start >= MAX_CPUS {
            return None;
        }
        let mut word_idx = start / 64;
        let mut word = self.bits[word_idx] & (u64::MAX << (start % 64));
        loop {
            if word != 0 {
                return Some((word_idx * 64 + word.trailing_zeros() as usize) as CpuId);
            }
            word_idx += 1;
            if word_idx >= WORDS {
                return None;
            }
            word = self.bits[word_idx];
        }
    }

    /// Primeira CPU presente diferente de `excluded`
    pub fn any_except(&self, excluded: CpuId) -> Option<CpuId> {
        self.iter().find(|&cpu| cpu != excluded)
    }

    /// Interseção
    pub fn and(&self, other: &CpuMask) -> CpuMask {
        let mut out = *self;
        for (w, o) in out.bits.iter_mut().zip(other.bits.iter()) {
            *w &= *o;
        }
        out
    }

    /// União
    pub fn or(&self, other: &CpuMask) -> CpuMask {
        let mut out = *self;
        for (w, o) in out.bits.iter_mut().zip(other.bits.iter()) {
            *w |= *o;
        }
        out
    }

    /// Verifica se as máscaras têm alguma CPU em comum
    pub fn intersects(&self, other: &CpuMask) -> bool {
        self.bits.iter().zip(other.bits.iter()).any(|(a, b)| a & b != 0)
    }

    /// Itera sobre as CPUs presentes, em ordem crescente
    pub fn iter(&self) -> CpuMaskIter<'_> {
        CpuMaskIter { mask: self, next: 0 }
    }
}

pub struct CpuMaskIter<'a> {
    mask: &'a CpuMask,
    next: usize,
}

impl Iterator for CpuMaskIter<'_> {
    type Item = CpuId;

    fn next(&mut self) -> Option<CpuId> {
        let cpu = self.mask.next_from(self.next)?;
        self.next = cpu as usize + 1;
        Some(cpu)
    }
}

/// Formato de lista de faixas, ex.: `0-3,6`
impl core::fmt::Display for CpuMask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut first = true;
        let mut iter = self.iter().peekable();
        while let Some(start) = iter.next() {
            let mut end = start;
            while iter.peek() == Some(&(end + 1)) {
                end += 1;
                iter.next();
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }
        Ok(())
    }
}

impl core::fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "CpuMask({})", self)
    }
}
