use crate::alloc::Allocator;
use std::alloc::Layout;
use std::ptr::{self, NonNull};

/// Type-erased reclaimer for a retired item.
/// 已退休对象的类型擦除回收函数。
pub type Reclaimer = unsafe fn(*mut ());

/// Reclaimer for items that came out of a `Box<T>`.
/// 用于来自 `Box<T>` 的对象的回收函数。
pub(crate) unsafe fn drop_box<T>(item: *mut ()) {
    unsafe { drop(Box::from_raw(item.cast::<T>())) }
}

struct RetiredNode {
    item: *mut (),
    reclaimer: Reclaimer,
    next: *mut RetiredNode,
}

/// A singly linked list of retired items whose nodes come from `A`.
///
/// Appending a whole list is `O(1)`, which is how participants hand their
/// local garbage to the shared set. Dropping the list runs every reclaimer in
/// retirement order and frees the nodes.
///
/// 节点由 `A` 分配的已退休对象单链表。
/// 整表追加是 `O(1)` 的；drop 时按退休顺序执行所有回收函数并释放节点。
pub(crate) struct RetiredList<A: Allocator> {
    head: *mut RetiredNode,
    tail: *mut RetiredNode,
    len: usize,
    alloc: A,
}

// SAFETY: retired items are handed over to whichever thread reclaims them;
// `Participant::manage` requires them to be safe to reclaim anywhere.
unsafe impl<A: Allocator> Send for RetiredList<A> {}

impl<A: Allocator> RetiredList<A> {
    #[inline]
    pub(crate) fn new_in(alloc: A) -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            len: 0,
            alloc,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record `item` for later reclamation.
    ///
    /// Aborts through [`std::alloc::handle_alloc_error`] when no node can be
    /// allocated, since the item could otherwise never be reclaimed.
    pub(crate) fn push(&mut self, item: *mut (), reclaimer: Reclaimer) {
        let layout = Layout::new::<RetiredNode>();
        let node = match self.alloc.allocate(layout) {
            Ok(node) => node.cast::<RetiredNode>(),
            Err(err) => {
                log::error!("failed to record a retired item: {err}");
                std::alloc::handle_alloc_error(layout)
            }
        };

        let node = node.as_ptr();
        // SAFETY: `node` is freshly allocated for a `RetiredNode`.
        unsafe {
            node.write(RetiredNode {
                item,
                reclaimer,
                next: ptr::null_mut(),
            });
        }

        if self.tail.is_null() {
            self.head = node;
        } else {
            // SAFETY: `tail` points at the last live node of this list.
            unsafe { (*self.tail).next = node };
        }
        self.tail = node;
        self.len += 1;
    }

    /// Move every item of `other` to the end of `self`.
    ///
    /// Both lists must draw from the same allocator (or clones of it).
    pub(crate) fn append(&mut self, other: &mut RetiredList<A>) {
        if other.is_empty() {
            return;
        }

        if self.tail.is_null() {
            self.head = other.head;
        } else {
            // SAFETY: `tail` points at the last live node of this list.
            unsafe { (*self.tail).next = other.head };
        }
        self.tail = other.tail;
        self.len += other.len;

        other.head = ptr::null_mut();
        other.tail = ptr::null_mut();
        other.len = 0;
    }

    /// Take all items out, leaving `self` empty.
    #[inline]
    pub(crate) fn take(&mut self) -> RetiredList<A> {
        let mut taken = RetiredList::new_in(self.alloc.clone());
        taken.append(self);
        taken
    }

    /// Run every reclaimer now. Returns how many items were reclaimed.
    pub(crate) fn reclaim(&mut self) -> usize {
        let reclaimed = self.len;
        let layout = Layout::new::<RetiredNode>();
        let mut cursor = self.head;

        self.head = ptr::null_mut();
        self.tail = ptr::null_mut();
        self.len = 0;

        while let Some(node) = NonNull::new(cursor) {
            // SAFETY: every node in the list was written by `push` and is
            // visited exactly once; the item was retired with this reclaimer.
            unsafe {
                let RetiredNode {
                    item,
                    reclaimer,
                    next,
                } = node.as_ptr().read();
                self.alloc.deallocate(node.cast(), layout);
                reclaimer(item);
                cursor = next;
            }
        }

        reclaimed
    }
}

impl<A: Allocator> Drop for RetiredList<A> {
    fn drop(&mut self) {
        self.reclaim();
    }
}

impl<A: Allocator> std::fmt::Debug for RetiredList<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetiredList")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}
