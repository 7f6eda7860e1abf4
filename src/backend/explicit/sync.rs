use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

use crate::Result;

/// Signaled by the queue once a submission finished executing.
#[derive(Clone, Debug, Default)]
pub struct Fence(Arc<FenceInner>);

#[derive(Debug, Default)]
struct FenceInner {
    status: Mutex<Option<Result<()>>>,
    signaled: Condvar,
}

impl Fence {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn signal(&self, status: Result<()>) {
        let mut guard = self.0.status.lock();
        debug_assert!(guard.is_none(), "fence signaled twice");
        *guard = Some(status);
        self.0.signaled.notify_all();
    }

    pub fn is_signaled(&self) -> bool {
        self.0.status.lock().is_some()
    }

    /// Blocks until signaled and returns the status of the submission.
    pub fn wait(&self) -> Result<()> {
        let mut guard = self.0.status.lock();
        loop {
            if let Some(status) = &*guard {
                return status.clone();
            }
            self.0.signaled.wait(&mut guard);
        }
    }
}

/// A binary semaphore.
///
/// Waiting consumes the signal.
#[derive(Clone, Debug, Default)]
pub struct Semaphore(Arc<SemaphoreInner>);

#[derive(Debug, Default)]
struct SemaphoreInner {
    signaled: Mutex<bool>,
    changed: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut signaled = self.0.signaled.lock();
        *signaled = true;
        self.0.changed.notify_all();
    }

    pub fn is_signaled(&self) -> bool {
        *self.0.signaled.lock()
    }

    pub(crate) fn wait(&self) {
        let mut signaled = self.0.signaled.lock();
        while !*signaled {
            self.0.changed.wait(&mut signaled);
        }
        *signaled = false;
    }

    pub fn ptr_eq(&self, other: &Semaphore) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Semaphores a submission waits on before starting and signals
/// after finishing.
#[derive(Debug, Default)]
pub struct Semaphores {
    waits: SmallVec<[Semaphore; 2]>,
    signals: SmallVec<[Semaphore; 2]>,
}

impl Semaphores {
    pub fn add_wait(&mut self, semaphore: Semaphore) {
        if !self.waits.iter().any(|s| s.ptr_eq(&semaphore)) {
            self.waits.push(semaphore);
        }
    }

    pub fn add_signal(&mut self, semaphore: Semaphore) {
        if !self.signals.iter().any(|s| s.ptr_eq(&semaphore)) {
            self.signals.push(semaphore);
        }
    }

    pub fn waits(&self) -> &[Semaphore] {
        &self.waits
    }

    pub fn signals(&self) -> &[Semaphore] {
        &self.signals
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;
    use crate::Error;

    #[test]
    fn fence_carries_status() {
        let fence = Fence::new();
        assert!(!fence.is_signaled());
        let signaler = fence.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signaler.signal(Err(Error::DeviceLost));
        });
        assert_eq!(fence.wait(), Err(Error::DeviceLost));
        assert!(fence.is_signaled());
        handle.join().unwrap();
    }

    #[test]
    fn semaphore_wait_consumes_signal() {
        let semaphore = Semaphore::new();
        semaphore.signal();
        semaphore.wait();
        assert!(!semaphore.is_signaled());
    }

    #[test]
    fn semaphores_deduplicate() {
        let semaphore = Semaphore::new();
        let mut set = Semaphores::default();
        set.add_wait(semaphore.clone());
        set.add_wait(semaphore);
        assert_eq!(set.waits().len(), 1);
        assert!(set.signals().is_empty());
    }
}
