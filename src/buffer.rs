use std::{
    fmt::Debug,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicUsize, Ordering},
        LazyLock, Mutex,
    },
};

use crate::exif::TagQueue;

// Set a reasonable value to avoid holding too much idle memory
const MAX_POOLED: usize = 16;

/// Size of the read buffer owned by every [`Source`](crate::Source).
pub(crate) const SOURCE_BUF_SIZE: usize = 64 * 1024;

/// Size of the scratch area used to read deferred tag values.
pub(crate) const SCRATCH_SIZE: usize = 1024;

/// Objects that can be recycled through a [`Pool`].
pub(crate) trait Recycle {
    fn create() -> Self;

    /// Reset the object before it goes back into the pool.
    fn reset(&mut self);
}

/// A process-wide free list. Safe for concurrent acquire/release from
/// independent scans.
pub(crate) struct Pool<T> {
    free: Mutex<Vec<T>>,
    acquired: AtomicUsize,
}

impl<T: Recycle + 'static> Pool<T> {
    const fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            acquired: AtomicUsize::new(0),
        }
    }

    #[tracing::instrument(skip_all)]
    pub fn acquire(&'static self) -> Pooled<T> {
        let recycled = self.free.lock().ok().and_then(|mut free| free.pop());
        let obj = match recycled {
            Some(obj) => {
                tracing::trace!("acquired: pooled");
                obj
            }
            None => {
                tracing::trace!("acquired: created");
                T::create()
            }
        };

        self.acquired.fetch_add(1, Ordering::Relaxed);
        Pooled {
            pool: self,
            obj: Some(obj),
        }
    }

    fn release(&self, mut obj: T) {
        let prev = self.acquired.fetch_sub(1, Ordering::Relaxed);
        if prev == 0 {
            tracing::error!("released wrong object");
        }

        let Ok(mut free) = self.free.lock() else {
            // poisoned; obj dropped
            return;
        };
        if free.len() < MAX_POOLED {
            obj.reset();
            free.push(obj);
        }
    }

    #[allow(unused)]
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Relaxed)
    }
}

/// RAII guard returning the object to its pool on drop.
pub(crate) struct Pooled<T: Recycle + 'static> {
    pool: &'static Pool<T>,
    obj: Option<T>,
}

impl<T: Recycle + 'static> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // `obj` is only taken in `drop`
        self.obj.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Recycle + 'static> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.obj.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Recycle + 'static> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(obj) = self.obj.take() {
            self.pool.release(obj);
        }
    }
}

impl<T: Recycle + Debug + 'static> Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled").field("obj", &self.obj).finish()
    }
}

/// Read buffer of a [`Source`](crate::Source).
impl Recycle for Vec<u8> {
    fn create() -> Self {
        vec![0; SOURCE_BUF_SIZE]
    }

    fn reset(&mut self) {
        self.resize(SOURCE_BUF_SIZE, 0);
    }
}

/// Per-scan working memory of the IFD reader: the deferred tag queue plus a
/// scratch area for tag values.
pub(crate) struct IfdBuffer {
    pub scratch: [u8; SCRATCH_SIZE],
    pub queue: TagQueue,
}

impl Recycle for IfdBuffer {
    fn create() -> Self {
        Self {
            scratch: [0; SCRATCH_SIZE],
            queue: TagQueue::new(),
        }
    }

    fn reset(&mut self) {
        self.queue.clear();
    }
}

impl Debug for IfdBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IfdBuffer")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

pub(crate) static SOURCE_BUFFERS: LazyLock<Pool<Vec<u8>>> = LazyLock::new(Pool::new);
pub(crate) static IFD_BUFFERS: LazyLock<Pool<IfdBuffer>> = LazyLock::new(Pool::new);
