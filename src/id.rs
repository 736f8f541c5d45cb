use crate::alloc::{AllocError, Allocator, Global};
use crate::sync::{AtomicU8, Backoff, Ordering, fence};
use std::alloc::Layout;
use std::ptr::NonNull;

/// Hands out small integer IDs that stay unique until recycled.
///
/// 分配在回收前保持唯一的小整数 ID。
pub trait IdGenerator {
    /// Take a free ID, or `None` if every ID is currently assigned.
    /// Never blocks.
    ///
    /// 取得一个空闲 ID；若所有 ID 都已分配则返回 `None`。从不阻塞。
    fn try_assign(&self) -> Option<usize>;

    /// Return an ID obtained from this generator.
    ///
    /// # Panics
    /// If `id` was not assigned by this generator or was already recycled.
    fn recycle(&self, id: usize);

    /// One past the largest ID this generator can hand out.
    fn max_id(&self) -> usize;

    /// Take a free ID, spinning until one is recycled if necessary.
    ///
    /// 取得一个空闲 ID，必要时自旋等待其他线程回收。
    fn assign(&self) -> usize {
        let backoff = Backoff::new();
        loop {
            if let Some(id) = self.try_assign() {
                return id;
            }
            backoff.snooze();
        }
    }
}

/// A lock-free generator for the consecutive IDs `0..count`.
///
/// Each ID is backed by one atomic flag; assigning scans for a clear flag and
/// sets it, recycling clears it. Lower IDs are preferred, so IDs stay dense
/// when callers recycle promptly. Suited to a small, known number of
/// accessors (for example an index into a per-thread table).
///
/// - `try_assign` is lock-free, `O(count)` in the worst case.
/// - `recycle` is wait-free.
///
/// 为连续 ID `0..count` 提供的无锁生成器。
/// 每个 ID 对应一个原子标志；分配时扫描并设置空闲标志，回收时清除。
///
/// # Example
/// ```
/// use concurrent_exchange::{IdGenerator, IdPool};
///
/// let pool = IdPool::new(2);
/// let a = pool.assign();
/// let b = pool.try_assign().unwrap();
/// assert_ne!(a, b);
/// assert_eq!(pool.try_assign(), None);
///
/// pool.recycle(a);
/// assert_eq!(pool.try_assign(), Some(a));
/// ```
pub struct IdPool<A: Allocator = Global> {
    flags: NonNull<AtomicU8>,
    count: usize,
    alloc: A,
}

// SAFETY: the flag array is only accessed through atomics and is owned by the
// pool; the allocator itself is `Send + Sync`.
unsafe impl<A: Allocator> Send for IdPool<A> {}
unsafe impl<A: Allocator> Sync for IdPool<A> {}

impl IdPool<Global> {
    /// Create a pool of `count` IDs on the global allocator.
    ///
    /// # Panics
    /// If `count` is zero. Aborts through [`std::alloc::handle_alloc_error`]
    /// if the flags cannot be allocated.
    pub fn new(count: usize) -> Self {
        match Self::try_new_in(count, Global) {
            Ok(pool) => pool,
            Err(_) => std::alloc::handle_alloc_error(flags_layout(count)),
        }
    }
}

impl<A: Allocator> IdPool<A> {
    /// Create a pool of `count` IDs whose flags are allocated from `alloc`.
    ///
    /// 使用 `alloc` 分配标志数组，创建包含 `count` 个 ID 的池。
    ///
    /// # Panics
    /// If `count` is zero or the flag array would overflow `isize::MAX` bytes.
    pub fn try_new_in(count: usize, alloc: A) -> Result<Self, AllocError> {
        assert!(count > 0, "an ID pool needs at least one ID");

        let layout = flags_layout(count);
        let flags = match alloc.allocate(layout) {
            Ok(ptr) => ptr.cast::<AtomicU8>(),
            Err(err) => {
                log::error!("failed to allocate an ID pool of {count} IDs: {err}");
                return Err(err);
            }
        };

        for id in 0..count {
            // SAFETY: `flags` was allocated for `count` elements.
            unsafe { flags.as_ptr().add(id).write(AtomicU8::new(0)) };
        }

        Ok(Self {
            flags,
            count,
            alloc,
        })
    }

    #[inline]
    fn flag(&self, id: usize) -> &AtomicU8 {
        debug_assert!(id < self.count);
        // SAFETY: every flag below `count` was initialised in `try_new_in`.
        unsafe { &*self.flags.as_ptr().add(id) }
    }
}

fn flags_layout(count: usize) -> Layout {
    match Layout::array::<AtomicU8>(count) {
        Ok(layout) => layout,
        Err(_) => panic!("capacity overflow"),
    }
}

impl<A: Allocator> IdGenerator for IdPool<A> {
    fn try_assign(&self) -> Option<usize> {
        for id in 0..self.count {
            let flag = self.flag(id);
            // The relaxed probe keeps the scan from writing to busy flags.
            if flag.load(Ordering::Relaxed) == 0 && flag.swap(1, Ordering::Relaxed) == 0 {
                // Pairs with the release store in `recycle`.
                fence(Ordering::Acquire);
                return Some(id);
            }
        }
        None
    }

    fn recycle(&self, id: usize) {
        assert!(
            id < self.count,
            "ID {id} was not assigned from this pool (max {})",
            self.count
        );
        let flag = self.flag(id);
        assert!(
            flag.load(Ordering::Relaxed) != 0,
            "ID {id} is not currently assigned"
        );
        flag.store(0, Ordering::Release);
    }

    #[inline]
    fn max_id(&self) -> usize {
        self.count
    }
}

impl<A: Allocator> Drop for IdPool<A> {
    fn drop(&mut self) {
        let layout = flags_layout(self.count);
        // SAFETY: the flags were initialised and allocated with this layout.
        unsafe {
            std::ptr::drop_in_place(std::ptr::slice_from_raw_parts_mut(
                self.flags.as_ptr(),
                self.count,
            ));
            self.alloc.deallocate(self.flags.cast(), layout);
        }
    }
}

impl<A: Allocator> std::fmt::Debug for IdPool<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdPool")
            .field("count", &self.count)
            .finish_non_exhaustive()
    }
}
