use std::alloc::Layout;
use std::ptr::NonNull;

/// Returned when an [`Allocator`] cannot satisfy a request.
/// 当 [`Allocator`] 无法满足请求时返回。
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("memory allocation of {size} bytes failed")]
pub struct AllocError {
    /// Size of the request that failed.
    pub size: usize,
}

impl AllocError {
    #[inline]
    pub(crate) fn of(layout: Layout) -> Self {
        Self {
            size: layout.size(),
        }
    }
}

/// The allocation capability consumed by the collectors and ID pools.
///
/// Structures that need memory beyond their own fixed footprint take an
/// allocator explicitly (the `*_in` constructors) and route every internal
/// allocation through it. Implementations are cloned into each structure
/// that needs one, so cheap handles (`Arc`-backed or zero-sized) are expected.
///
/// 集合器和 ID 池使用的分配能力。
/// 需要额外内存的结构显式接收分配器（`*_in` 构造函数），并通过它完成所有内部分配。
///
/// # Safety
///
/// `allocate` must return memory valid for `layout` (or an error), and
/// `deallocate` must accept any pointer previously returned by `allocate`
/// on this allocator or one of its clones, with the same layout.
pub unsafe trait Allocator: Clone + Send + Sync {
    /// Allocate a block for `layout`. `layout.size()` is never zero.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Return a block obtained from [`Allocator::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator (or a clone) with
    /// the same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The process allocator (`std::alloc`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Global;

unsafe impl Allocator for Global {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        debug_assert!(layout.size() != 0, "zero-sized allocation requested");
        // SAFETY: callers never request zero-sized layouts.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or(AllocError::of(layout))
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}
