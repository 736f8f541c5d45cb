use crate::alloc::{Allocator, Global};
use crate::collector::{Collector, Participant};
use crate::retired::{Reclaimer, RetiredList};
use crate::sync::{Arc, Cell, Mutex};
use std::cell::RefCell;

struct LazyState<A: Allocator> {
    /// Number of participants inside a bracket.
    active: usize,
    managed: RetiredList<A>,
}

struct LazyShared<A: Allocator> {
    state: Mutex<LazyState<A>>,
    alloc: A,
}

impl<A: Allocator> LazyShared<A> {
    /// Hand `local` over and close one outermost bracket (if `closing`).
    ///
    /// When no bracket remains open, everything managed so far is reclaimed
    /// on this thread once the lock is released.
    fn settle(&self, local: &mut RetiredList<A>, closing: bool) {
        let mut reclaimable = {
            let mut state = self.state.lock();
            state.managed.append(local);
            if closing {
                state.active -= 1;
            }

            if state.active == 0 {
                state.managed.take()
            } else {
                return;
            }
        };

        let reclaimed = reclaimable.reclaim();
        if reclaimed > 0 {
            log::trace!("lazy collection reclaimed {reclaimed}");
        }
    }
}

/// A collector that reclaims only when every bracket is closed.
///
/// All retired items go to a single shared list. The thread whose closing
/// bracket brings the number of open brackets to zero reclaims the whole list.
/// Cheaper than [`EpochCollector`](crate::EpochCollector) per bracket, but a
/// participant that keeps a bracket open (or brackets that always overlap)
/// delays every reclamation.
///
/// 仅在所有括号都关闭时回收的回收器。
/// 所有已退休对象进入同一个共享列表，使打开括号数量归零的线程回收整个列表。
///
/// # Example
/// ```
/// use concurrent_exchange::{Collector, LazyCollector, Participant};
///
/// let collector = LazyCollector::new();
/// let participant = collector.register();
///
/// let guard = participant.pin();
/// guard.defer_drop(Box::new(vec![1, 2, 3]));
/// assert_eq!(collector.pending(), 0);
/// drop(guard);
/// assert_eq!(collector.pending(), 0);
/// ```
pub struct LazyCollector<A: Allocator = Global> {
    shared: Arc<LazyShared<A>>,
}

impl<A: Allocator> Clone for LazyCollector<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl LazyCollector<Global> {
    #[inline]
    pub fn new() -> Self {
        Self::new_in(Global)
    }
}

impl Default for LazyCollector<Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocator> LazyCollector<A> {
    /// Create a collector whose retirement records are allocated from `alloc`.
    pub fn new_in(alloc: A) -> Self {
        Self {
            shared: Arc::new(LazyShared {
                state: Mutex::new(LazyState {
                    active: 0,
                    managed: RetiredList::new_in(alloc.clone()),
                }),
                alloc,
            }),
        }
    }

    /// Number of retired items in the shared list.
    ///
    /// Items still in a participant's open bracket are not counted.
    #[inline]
    pub fn pending(&self) -> usize {
        self.shared.state.lock().managed.len()
    }

    /// Number of participants currently inside a bracket.
    #[inline]
    pub fn active(&self) -> usize {
        self.shared.state.lock().active
    }
}

impl<A: Allocator> Collector for LazyCollector<A> {
    type Participant = LazyParticipant<A>;

    fn register(&self) -> LazyParticipant<A> {
        LazyParticipant {
            local: RefCell::new(RetiredList::new_in(self.shared.alloc.clone())),
            shared: Arc::clone(&self.shared),
            depth: Cell::new(0),
        }
    }
}

impl<A: Allocator> std::fmt::Debug for LazyCollector<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("LazyCollector")
            .field("active", &state.active)
            .field("pending", &state.managed.len())
            .finish()
    }
}

/// A thread's participation in a [`LazyCollector`].
///
/// 线程在 [`LazyCollector`] 中的参与者。
pub struct LazyParticipant<A: Allocator = Global> {
    shared: Arc<LazyShared<A>>,
    depth: Cell<usize>,
    local: RefCell<RetiredList<A>>,
}

impl<A: Allocator> LazyParticipant<A> {
    /// Whether a bracket is open on this participant.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.depth.get() > 0
    }

    fn settle(&self, closing: bool) {
        let mut local = self.local.borrow_mut().take();
        self.shared.settle(&mut local, closing);
    }
}

impl<A: Allocator> Participant for LazyParticipant<A> {
    #[inline]
    fn begin(&self) {
        let depth = self.depth.get();
        if depth == 0 {
            self.shared.state.lock().active += 1;
        }
        self.depth.set(depth + 1);
    }

    fn end(&self) {
        let depth = self.depth.get();

        assert!(
            depth > 0,
            "BUG: closing a bracket on a participant with no open bracket"
        );

        self.depth.set(depth - 1);

        if depth == 1 {
            self.settle(true);
        }
    }

    unsafe fn manage(&self, item: *mut (), reclaimer: Reclaimer) {
        self.local.borrow_mut().push(item, reclaimer);

        if self.depth.get() == 0 {
            self.settle(false);
        }
    }

    #[inline]
    fn domain(&self) -> *const () {
        std::ptr::from_ref::<LazyShared<A>>(&*self.shared).cast()
    }
}

impl<A: Allocator> Drop for LazyParticipant<A> {
    fn drop(&mut self) {
        let closing = self.depth.get() > 0;
        self.depth.set(0);
        self.settle(closing);
    }
}

impl<A: Allocator> std::fmt::Debug for LazyParticipant<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyParticipant")
            .field("depth", &self.depth.get())
            .field("local", &self.local.borrow().len())
            .finish_non_exhaustive()
    }
}
