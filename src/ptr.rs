use crate::collector::{Guard, Participant};
use crate::retired::drop_box;
use crate::sync::{AtomicPtr, Ordering};

/// A collector-protected shared pointer.
///
/// `GcPtr<T>` is an atomic pointer that any thread can read under a
/// [`Guard`] and any thread can replace. Replaced values are handed to the
/// guard's collector and dropped once no bracket can still observe them.
///
/// The pointer binds to the collector of the first guard it is used with.
/// Using it afterwards with a guard from any other collector panics, since
/// that collector knows nothing of the brackets protecting earlier reads.
/// The lifetime of a reference returned by `load()` is bound to the guard.
///
/// # Example
/// ```
/// use concurrent_exchange::{Collector, EpochCollector, GcPtr, Participant};
///
/// let collector = EpochCollector::new();
/// let shared = GcPtr::new(42i32);
///
/// let participant = collector.register();
/// let guard = participant.pin();
/// assert_eq!(*shared.load(&guard), 42);
///
/// shared.store(100, &guard);
/// assert_eq!(*shared.load(&guard), 100);
/// drop(guard);
///
/// collector.collect();
/// ```
///
/// 一个受回收器保护的共享指针。
/// 任何线程都可以在 [`Guard`] 下读取它，也可以替换它。被替换的值交给守卫所属的回收器，
/// 在没有括号可能观察到它们后被 drop。
/// 指针绑定到第一次使用的守卫所属的回收器；之后使用其他回收器的守卫会 panic。
/// `load()` 返回的引用的生命周期被绑定到守卫。
pub struct GcPtr<T> {
    ptr: AtomicPtr<T>,
    /// The collector this pointer is bound to, null until first use.
    domain: AtomicPtr<()>,
}

// SAFETY: values are shared by reference between threads and dropped on
// whichever thread reclaims them.
unsafe impl<T: Send + Sync> Send for GcPtr<T> {}
unsafe impl<T: Send + Sync> Sync for GcPtr<T> {}

impl<T: Send + 'static> GcPtr<T> {
    /// Create a new pointer, initialized with the given value.
    /// 创建一个新的指针，初始化为给定的值。
    #[inline]
    pub fn new(data: T) -> Self {
        Self {
            ptr: AtomicPtr::new(Box::into_raw(Box::new(data))),
            domain: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Bind to `guard`'s collector on first use, and check it afterwards.
    ///
    /// # Panics
    /// If the pointer is already bound to a different collector.
    #[inline]
    fn bind<P: Participant>(&self, guard: &Guard<'_, P>) {
        let domain = guard.participant().domain().cast_mut();
        let bound = self.domain.load(Ordering::Relaxed);
        if bound == domain {
            return;
        }

        if let Err(bound) = self.domain.compare_exchange(
            std::ptr::null_mut(),
            domain,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            assert!(
                bound == domain,
                "GcPtr used with guards from two different collectors"
            );
        }
    }

    /// Read the current value.
    ///
    /// The returned reference cannot outlive `guard`, and the value it points
    /// to is not reclaimed while the guard's bracket is open.
    ///
    /// 读取当前值。返回的引用不能比 `guard` 活得更久。
    #[inline]
    pub fn load<'g, P: Participant>(&self, guard: &'g Guard<'_, P>) -> &'g T {
        self.bind(guard);
        let ptr = self.ptr.load(Ordering::Acquire);
        // SAFETY: the pointer is never null, and the value is retired only
        // after it was swapped out, through the collector `bind` checked, so
        // it stays alive for the open bracket.
        unsafe { &*ptr }
    }

    /// Replace the value and retire the old one through `guard`.
    ///
    /// 替换当前值，并通过 `guard` 退休旧值。
    #[inline]
    pub fn store<P: Participant>(&self, data: T, guard: &Guard<'_, P>) {
        self.swap(data, guard);
    }

    /// Replace the value and return the old one, which stays readable for as
    /// long as `guard` is held.
    ///
    /// 替换当前值并返回旧值；只要 `guard` 仍被持有，旧值就保持可读。
    #[inline]
    pub fn swap<'g, P: Participant>(&self, data: T, guard: &'g Guard<'_, P>) -> &'g T {
        self.bind(guard);
        let new_ptr = Box::into_raw(Box::new(data));
        let old_ptr = self.ptr.swap(new_ptr, Ordering::AcqRel);

        // SAFETY: `old_ptr` came from `Box::into_raw` and is unreachable
        // through `self` from now on; the guard's open bracket keeps it alive
        // for the returned reference.
        unsafe {
            guard.manage(old_ptr.cast(), drop_box::<T>);
            &*old_ptr
        }
    }
}

impl<T> std::fmt::Debug for GcPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ptr = self.ptr.load(Ordering::Relaxed);
        f.debug_tuple("GcPtr").field(&ptr).finish()
    }
}

impl<T> Drop for GcPtr<T> {
    /// Drops the current value.
    ///
    /// Values retired earlier belong to their collector and are not touched.
    ///
    /// drop 当前值。之前退休的值属于其回收器，不受影响。
    #[inline]
    fn drop(&mut self) {
        let ptr = self.ptr.load(Ordering::Relaxed);
        if !ptr.is_null() {
            unsafe {
                drop(Box::from_raw(ptr));
            }
        }
    }
}
