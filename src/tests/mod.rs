mod circular_buffer_tests;
mod id_tests;
mod swap_buffer_tests;

use crate::alloc::{AllocError, Allocator, Global};
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 在 drop 时递增共享计数器的值
#[derive(Debug)]
pub(crate) struct DropCounter {
    drops: Arc<AtomicUsize>,
}

impl DropCounter {
    pub(crate) fn new(drops: &Arc<AtomicUsize>) -> Self {
        Self {
            drops: Arc::clone(drops),
        }
    }
}

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub(crate) struct AllocStats {
    pub(crate) allocations: AtomicUsize,
    pub(crate) deallocations: AtomicUsize,
}

/// 统计分配与释放次数的分配器
#[derive(Debug, Clone, Default)]
pub(crate) struct CountingAllocator {
    pub(crate) stats: Arc<AllocStats>,
}

impl CountingAllocator {
    pub(crate) fn allocations(&self) -> usize {
        self.stats.allocations.load(Ordering::SeqCst)
    }

    pub(crate) fn deallocations(&self) -> usize {
        self.stats.deallocations.load(Ordering::SeqCst)
    }
}

unsafe impl Allocator for CountingAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let ptr = Global.allocate(layout)?;
        self.stats.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.stats.deallocations.fetch_add(1, Ordering::SeqCst);
        unsafe { Global.deallocate(ptr, layout) }
    }
}

/// 总是分配失败的分配器
#[derive(Debug, Clone, Copy)]
pub(crate) struct FailingAllocator;

unsafe impl Allocator for FailingAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        Err(AllocError::of(layout))
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
        unreachable!("nothing was allocated");
    }
}
