use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::{Error, Result};

/// Tracks how much device memory is in use against a fixed limit.
#[derive(Clone, Debug)]
pub(crate) struct MemoryBudget(Arc<BudgetInner>);

#[derive(Debug)]
struct BudgetInner {
    limit: usize,
    used: AtomicUsize,
}

impl MemoryBudget {
    pub fn new(limit: usize) -> Self {
        Self(Arc::new(BudgetInner {
            limit,
            used: AtomicUsize::new(0),
        }))
    }

    /// Reserves `size` bytes. The reservation is returned when
    /// the [`Allocation`] drops.
    pub fn allocate(&self, size: usize) -> Result<Allocation> {
        let mut used = self.0.used.load(Ordering::Relaxed);
        loop {
            let available = self.0.limit.saturating_sub(used);
            if size > available {
                return Err(Error::OutOfDeviceMemory {
                    requested: size,
                    available,
                });
            }
            match self.0.used.compare_exchange_weak(
                used,
                used + size,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => used = actual,
            }
        }
        Ok(Allocation {
            budget: self.clone(),
            size,
        })
    }

    pub fn used(&self) -> usize {
        self.0.used.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub(crate) struct Allocation {
    budget: MemoryBudget,
    size: usize,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.budget.0.used.fetch_sub(self.size, Ordering::AcqRel);
    }
}
