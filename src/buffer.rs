use std::{fmt, sync::Arc};

use bytemuck::Pod;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::memory::Allocation;

/// What a [`Buffer`] is bound as during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Per-instance data of draw operations.
    Vertex,
    /// Per-draw [`Globals`](crate::Globals) values.
    Globals,
    /// Arbitrary data read by shaders, e.g. gradient stops.
    Storage,
    /// Source of an upload.
    Staging,
    /// Destination of a download.
    Readback,
}

/// A fixed-size region of host-visible device memory.
///
/// The size never changes after creation. Cloning creates another
/// reference; the memory is released with the last one.
#[derive(Clone)]
pub struct Buffer(Arc<Inner>);

struct Inner {
    usage: BufferUsage,
    data: RwLock<Box<[u8]>>,
    _allocation: Allocation,
}

impl Buffer {
    pub(crate) fn new(usage: BufferUsage, size: usize, allocation: Allocation) -> Self {
        Self(Arc::new(Inner {
            usage,
            data: RwLock::new(vec![0; size].into_boxed_slice()),
            _allocation: allocation,
        }))
    }

    pub fn usage(&self) -> BufferUsage {
        self.0.usage
    }

    pub fn size(&self) -> usize {
        self.0.data.read().len()
    }

    /// Maps the buffer for writing.
    pub fn map(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.0.data.write()
    }

    /// Maps the buffer for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.0.data.read()
    }

    /// Copies `data` into the buffer at `offset`.
    ///
    /// # Panics
    /// Panics if the write does not fit.
    pub fn write(&self, offset: usize, data: &[u8]) {
        let mut mapped = self.map();
        assert!(
            offset + data.len() <= mapped.len(),
            "write of {} bytes at offset {} overflows {} byte buffer",
            data.len(),
            offset,
            mapped.len()
        );
        mapped[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Reads `count` values of `T` starting at `offset`.
    ///
    /// Offsets need not be aligned.
    pub fn read_pod<T: Pod>(&self, offset: usize, count: usize) -> Vec<T> {
        let data = self.read();
        let size = std::mem::size_of::<T>();
        (0..count)
            .map(|i| {
                let start = offset + i * size;
                bytemuck::pod_read_unaligned(&data[start..start + size])
            })
            .collect()
    }

    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("usage", &self.0.usage)
            .field("size", &self.size())
            .finish()
    }
}
