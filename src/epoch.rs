use crate::alloc::{Allocator, Global};
use crate::collector::{Collector, Participant};
use crate::retired::{Reclaimer, RetiredList};
use crate::sync::{Arc, AtomicUsize, Cell, Mutex, Ordering, fence};
use crossbeam_utils::CachePadded;
use std::cell::RefCell;
use std::collections::VecDeque;

/// Default threshold for automatic garbage reclamation (count of retired items).
/// 自动垃圾回收的默认阈值（已退休对象的数量）。
pub(crate) const AUTO_RECLAIM_THRESHOLD: usize = 64;

/// Default interval for cleaning up dead participant slots (in collection cycles).
/// 清理死参与者槽的默认间隔（以回收周期为单位）。
pub(crate) const DEFAULT_CLEANUP_INTERVAL: usize = 16;

/// Represents a participant that is not inside any bracket.
/// 表示当前不在任何括号内的参与者。
pub(crate) const INACTIVE_EPOCH: usize = usize::MAX;

/// A slot allocated for a participant to record its active epoch.
///
/// Cache-aligned to prevent false sharing between participants.
///
/// 为参与者分配的槽，用于记录其活跃纪元。缓存对齐以防止伪共享。
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct ParticipantSlot {
    /// The epoch observed by the outermost open bracket, or `INACTIVE_EPOCH`.
    pub(crate) active_epoch: AtomicUsize,
}

/// Retired items waiting for every bracket that could see them to close.
///
/// Bags are kept in epoch order; each holds what was flushed while the
/// global epoch had its tag.
///
/// 等待所有可能看到它们的括号关闭的已退休对象。袋子按纪元排序。
pub(crate) struct GarbageSet<A: Allocator> {
    queue: VecDeque<(usize, RetiredList<A>)>,
    count: usize,
}

impl<A: Allocator> GarbageSet<A> {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            count: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count
    }

    /// Move `items` into the bag for `epoch`.
    ///
    /// Appends to the last bag when it carries the same tag.
    fn add(&mut self, items: &mut RetiredList<A>, epoch: usize) {
        self.count += items.len();

        match self.queue.back_mut() {
            Some((last_epoch, bag)) if *last_epoch == epoch => bag.append(items),
            _ => self.queue.push_back((epoch, items.take())),
        }
    }

    /// Detach every bag tagged below `min_active_epoch` into `reclaimable`.
    ///
    /// The caller runs the reclaimers once its locks are released.
    ///
    /// 将标记低于 `min_active_epoch` 的所有袋子取出到 `reclaimable`。
    fn collect(&mut self, min_active_epoch: usize, reclaimable: &mut RetiredList<A>) {
        while let Some((epoch, _)) = self.queue.front() {
            if *epoch >= min_active_epoch {
                break;
            }
            if let Some((_, mut bag)) = self.queue.pop_front() {
                self.count -= bag.len();
                reclaimable.append(&mut bag);
            }
        }
    }
}

/// State shared by every clone of an [`EpochCollector`] and its participants.
struct EpochShared<A: Allocator> {
    /// The global monotonic epoch counter.
    /// 全局单调纪元计数器。
    global_epoch: CachePadded<AtomicUsize>,
    /// All registered participant slots.
    /// 所有注册参与者槽的列表。
    participants: Mutex<Vec<Arc<ParticipantSlot>>>,
    garbage: Mutex<GarbageSet<A>>,
    collection_counter: AtomicUsize,
    auto_reclaim_threshold: Option<usize>,
    cleanup_interval: usize,
    alloc: A,
}

impl<A: Allocator> EpochShared<A> {
    /// Move a participant's local list into the shared garbage set.
    fn flush(&self, local: &mut RetiredList<A>) {
        if local.is_empty() {
            return;
        }

        // Orders the removal of the items before reading the tag epoch, against
        // the fence in `begin`.
        fence(Ordering::SeqCst);

        let pending = {
            let mut garbage = self.garbage.lock();
            // Read under the lock so bags are pushed in epoch order.
            let epoch = self.global_epoch.load(Ordering::Relaxed);
            garbage.add(local, epoch);
            garbage.len()
        };

        if let Some(threshold) = self.auto_reclaim_threshold {
            if pending > threshold {
                self.collect();
            }
        }
    }

    fn collect(&self) -> usize {
        let new_epoch = self.global_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        fence(Ordering::SeqCst);

        let mut min_active_epoch = new_epoch;
        let counter = self.collection_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let should_cleanup = self.cleanup_interval > 0 && counter % self.cleanup_interval == 0;

        {
            let mut participants = self.participants.lock();
            let mut dead_count = 0;

            for slot in participants.iter() {
                let epoch = slot.active_epoch.load(Ordering::Acquire);
                if epoch != INACTIVE_EPOCH {
                    min_active_epoch = min_active_epoch.min(epoch);
                } else if should_cleanup && Arc::strong_count(slot) == 1 {
                    // Only this list holds the slot, its participant was dropped.
                    dead_count += 1;
                }
            }

            if dead_count > 0 {
                participants.retain(|slot| Arc::strong_count(slot) > 1);
                log::debug!("pruned {dead_count} dead participant slots");
            }
        }

        let mut reclaimable = RetiredList::new_in(self.alloc.clone());
        let pending = {
            let mut garbage = self.garbage.lock();
            garbage.collect(min_active_epoch, &mut reclaimable);
            garbage.len()
        };

        let reclaimed = reclaimable.reclaim();
        log::trace!(
            "epoch collection {new_epoch}: min active {min_active_epoch}, reclaimed {reclaimed}, pending {pending}"
        );
        reclaimed
    }
}

/// Builder for configuring an [`EpochCollector`].
///
/// # Example
/// ```
/// use concurrent_exchange::EpochCollector;
///
/// let collector = EpochCollector::builder()
///     .auto_reclaim_threshold(128)
///     .cleanup_interval(32)
///     .build();
/// ```
///
/// 用于配置 [`EpochCollector`] 的构建器。
pub struct EpochCollectorBuilder<A: Allocator = Global> {
    auto_reclaim_threshold: Option<usize>,
    cleanup_interval: usize,
    alloc: A,
}

impl EpochCollectorBuilder<Global> {
    /// Create a new builder with default settings.
    /// 创建一个带有默认设置的新构建器。
    #[inline]
    pub fn new() -> Self {
        Self {
            auto_reclaim_threshold: Some(AUTO_RECLAIM_THRESHOLD),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            alloc: Global,
        }
    }
}

impl Default for EpochCollectorBuilder<Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocator> EpochCollectorBuilder<A> {
    /// Set the automatic reclamation threshold.
    ///
    /// When the shared garbage count exceeds this threshold after a bracket
    /// closes, a collection runs on that thread.
    /// Pass `None` to disable automatic reclamation.
    ///
    /// Default: `Some(64)`
    ///
    /// 设置自动回收阈值。
    /// 当括号关闭后共享垃圾计数超过此阈值时，会在该线程上执行一次回收。
    /// 传递 `None` 可禁用自动回收。
    #[inline]
    pub fn auto_reclaim_threshold(mut self, threshold: impl Into<Option<usize>>) -> Self {
        self.auto_reclaim_threshold = threshold.into();
        self
    }

    /// Set the cleanup interval for dead participant slots.
    ///
    /// Dead slots are pruned every N collection cycles.
    /// Set to `0` to disable periodic cleanup.
    ///
    /// Default: `16`
    ///
    /// 设置死参与者槽的清理间隔。设置为 `0` 可禁用定期清理。
    #[inline]
    pub fn cleanup_interval(mut self, interval: usize) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Allocate retirement records from `alloc`.
    ///
    /// Default: [`Global`]
    #[inline]
    pub fn allocator<B: Allocator>(self, alloc: B) -> EpochCollectorBuilder<B> {
        EpochCollectorBuilder {
            auto_reclaim_threshold: self.auto_reclaim_threshold,
            cleanup_interval: self.cleanup_interval,
            alloc,
        }
    }

    /// Build the [`EpochCollector`] with the configured settings.
    /// 使用配置的设置构建 [`EpochCollector`]。
    #[inline]
    pub fn build(self) -> EpochCollector<A> {
        EpochCollector {
            shared: Arc::new(EpochShared {
                global_epoch: CachePadded::new(AtomicUsize::new(0)),
                participants: Mutex::new(Vec::new()),
                garbage: Mutex::new(GarbageSet::new()),
                collection_counter: AtomicUsize::new(0),
                auto_reclaim_threshold: self.auto_reclaim_threshold,
                cleanup_interval: self.cleanup_interval,
                alloc: self.alloc,
            }),
        }
    }
}

/// An epoch-based garbage collector.
///
/// Every participant publishes the global epoch it observed when its
/// outermost bracket opened. Retired items are tagged with the global epoch
/// at the time they are flushed, and a bag is reclaimed once every open
/// bracket observed a later epoch.
///
/// - [`collect`](Self::collect) advances the global epoch, scans participant
///   slots for the minimum active epoch, and reclaims every bag tagged below
///   it (everything when no bracket is open).
/// - Collections run automatically when a closing bracket pushes the shared
///   garbage count over the threshold, and can be run by hand at any time
///   from any thread.
/// - Reclaimers run after the internal locks are released, on whichever
///   thread ran the collection.
///
/// `EpochCollector` is `Clone` and can be shared across threads.
///
/// 基于纪元的垃圾回收器。
/// 每个参与者在最外层括号打开时发布它观察到的全局纪元。已退休对象在刷新时以全局纪元标记，
/// 当所有打开的括号都观察到更新的纪元后，该袋子被回收。
///
/// # Example
/// ```
/// use concurrent_exchange::{EpochCollector, Collector, Participant};
///
/// let collector = EpochCollector::new();
/// let participant = collector.register();
///
/// {
///     let guard = participant.pin();
///     guard.defer_drop(Box::new(String::from("retired")));
/// }
/// collector.collect();
/// ```
pub struct EpochCollector<A: Allocator = Global> {
    shared: Arc<EpochShared<A>>,
}

impl<A: Allocator> Clone for EpochCollector<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl EpochCollector<Global> {
    /// Create a new epoch collector with default settings.
    /// 创建一个带有默认设置的 epoch 回收器。
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for configuring the collector.
    /// 创建一个用于配置回收器的构建器。
    #[inline]
    pub fn builder() -> EpochCollectorBuilder<Global> {
        EpochCollectorBuilder::new()
    }
}

impl Default for EpochCollector<Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocator> EpochCollector<A> {
    /// Create a collector with default settings whose retirement records are
    /// allocated from `alloc`.
    #[inline]
    pub fn new_in(alloc: A) -> Self {
        EpochCollectorBuilder::new().allocator(alloc).build()
    }

    /// Perform a garbage collection cycle.
    ///
    /// Returns the number of items reclaimed. Safe to call even if there is
    /// no garbage, and from inside a bracket (items the caller could still
    /// observe are kept).
    ///
    /// 执行一个垃圾回收周期，返回被回收的对象数量。
    pub fn collect(&self) -> usize {
        self.shared.collect()
    }

    /// The global epoch.
    #[inline]
    pub fn epoch(&self) -> usize {
        self.shared.global_epoch.load(Ordering::Relaxed)
    }

    /// Number of retired items waiting in the shared garbage set.
    #[inline]
    pub fn pending(&self) -> usize {
        self.shared.garbage.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn participant_slots(&self) -> usize {
        self.shared.participants.lock().len()
    }
}

impl<A: Allocator> Collector for EpochCollector<A> {
    type Participant = EpochParticipant<A>;

    fn register(&self) -> EpochParticipant<A> {
        EpochParticipant::new(Arc::clone(&self.shared))
    }
}

impl<A: Allocator> std::fmt::Debug for EpochCollector<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochCollector")
            .field("epoch", &self.epoch())
            .field("auto_reclaim_threshold", &self.shared.auto_reclaim_threshold)
            .field("cleanup_interval", &self.shared.cleanup_interval)
            .finish_non_exhaustive()
    }
}

/// A thread's participation in an [`EpochCollector`].
///
/// Each thread should register its own participant. It is `!Sync` and must be
/// used by only one thread at a time.
///
/// 线程在 [`EpochCollector`] 中的参与者。每个线程应注册自己的参与者。
/// 它是 `!Sync` 的，同一时间只能由一个线程使用。
pub struct EpochParticipant<A: Allocator = Global> {
    slot: Arc<ParticipantSlot>,
    shared: Arc<EpochShared<A>>,
    depth: Cell<usize>,
    local: RefCell<RetiredList<A>>,
}

impl<A: Allocator> EpochParticipant<A> {
    fn new(shared: Arc<EpochShared<A>>) -> Self {
        let slot = Arc::new(ParticipantSlot {
            active_epoch: AtomicUsize::new(INACTIVE_EPOCH),
        });

        shared.participants.lock().push(Arc::clone(&slot));

        EpochParticipant {
            slot,
            local: RefCell::new(RetiredList::new_in(shared.alloc.clone())),
            shared,
            depth: Cell::new(0),
        }
    }

    /// Whether a bracket is open on this participant.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.depth.get() > 0
    }

    fn flush(&self) {
        let mut local = self.local.borrow_mut().take();
        self.shared.flush(&mut local);
    }
}

impl<A: Allocator> Participant for EpochParticipant<A> {
    #[inline]
    fn begin(&self) {
        let depth = self.depth.get();

        if depth == 0 {
            let epoch = self.shared.global_epoch.load(Ordering::Relaxed);
            self.slot.active_epoch.store(epoch, Ordering::Relaxed);
            // Publishes the slot before any managed data is read, against the
            // fence in `collect`.
            fence(Ordering::SeqCst);
        }

        self.depth.set(depth + 1);
    }

    #[inline]
    fn end(&self) {
        let depth = self.depth.get();

        assert!(
            depth > 0,
            "BUG: closing a bracket on a participant with no open bracket"
        );

        self.depth.set(depth - 1);

        if depth == 1 {
            self.slot
                .active_epoch
                .store(INACTIVE_EPOCH, Ordering::Release);
            self.flush();
        }
    }

    unsafe fn manage(&self, item: *mut (), reclaimer: Reclaimer) {
        self.local.borrow_mut().push(item, reclaimer);

        if self.depth.get() == 0 {
            self.flush();
        }
    }

    #[inline]
    fn domain(&self) -> *const () {
        std::ptr::from_ref::<EpochShared<A>>(&*self.shared).cast()
    }
}

impl<A: Allocator> Drop for EpochParticipant<A> {
    fn drop(&mut self) {
        self.slot
            .active_epoch
            .store(INACTIVE_EPOCH, Ordering::Release);
        self.flush();
    }
}

impl<A: Allocator> std::fmt::Debug for EpochParticipant<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochParticipant")
            .field("depth", &self.depth.get())
            .field("local", &self.local.borrow().len())
            .finish_non_exhaustive()
    }
}
