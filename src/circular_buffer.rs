use crate::sync::{AtomicUsize, Ordering, UnsafeCell, fence};
use crossbeam_utils::CachePadded;
use std::iter::FusedIterator;
use std::mem::MaybeUninit;

/// A wait-free, bounded, single-producer single-consumer FIFO.
///
/// `N` slots hold at most `N - 1` items: one slot always stays empty so that
/// `head == tail` means empty and `tail + 1 == head` means full.
///
/// The producer appends with [`Producer::add_item`] / [`Producer::add_items`].
/// The consumer takes a snapshot of everything pending with
/// [`Consumer::get_enumerable`], walks it as often as it likes and then hands
/// the whole window back with [`Enumerable::release`]. The buffer is meant for
/// consumers that periodically drain many items in one go.
///
/// 无等待、有界的单生产者单消费者 FIFO。
///
/// `N` 个槽最多容纳 `N - 1` 个元素：始终保留一个空槽，以区分空与满。
/// 生产者通过 `add_item`/`add_items` 追加；消费者通过 `get_enumerable` 获取所有待处理元素的快照，
/// 可以反复遍历，最后用 `release` 一次性归还整个窗口。
///
/// # Example
/// ```
/// use concurrent_exchange::CircularBuffer;
///
/// let mut buffer = CircularBuffer::<u32, 4>::new();
/// let (mut producer, mut consumer) = buffer.split();
///
/// assert!(producer.add_item(1).is_ok());
/// assert_eq!(producer.add_items(&[2, 3, 4]), 2);
///
/// let window = consumer.get_enumerable();
/// assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
/// window.release();
/// ```
///
/// A window can only be released once:
/// ```compile_fail
/// use concurrent_exchange::CircularBuffer;
///
/// let mut buffer = CircularBuffer::<u32, 4>::new();
/// let (mut producer, mut consumer) = buffer.split();
/// producer.add_item(1).unwrap();
///
/// let window = consumer.get_enumerable();
/// window.release();
/// window.release();
/// ```
///
/// and must be released before the next one is taken:
/// ```compile_fail
/// use concurrent_exchange::CircularBuffer;
///
/// let mut buffer = CircularBuffer::<u32, 4>::new();
/// let (_producer, mut consumer) = buffer.split();
///
/// let first = consumer.get_enumerable();
/// let second = consumer.get_enumerable();
/// first.release();
/// second.release();
/// ```
pub struct CircularBuffer<T, const N: usize> {
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    /// Consumer cursor, read by the producer.
    head: CachePadded<AtomicUsize>,
    /// Producer cursor, read by the consumer.
    tail: CachePadded<AtomicUsize>,
}

// SAFETY: a slot is written only by the producer while outside `[head, tail)`
// and read or dropped only by the consumer while inside it.
unsafe impl<T: Send, const N: usize> Sync for CircularBuffer<T, N> {}

/// Number of pending items between `head` and `tail`.
#[inline(always)]
const fn pending<const N: usize>(head: usize, tail: usize) -> usize {
    if head <= tail { tail - head } else { N - (head - tail) }
}

impl<T, const N: usize> CircularBuffer<T, N> {
    /// Create an empty buffer.
    ///
    /// `N` must be at least 2; this is checked at compile time.
    #[inline]
    pub fn new() -> Self {
        const { assert!(N >= 2, "a circular buffer needs at least two slots") };

        Self {
            slots: std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())),
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// The number of items the buffer can hold at once (`N - 1`).
    /// 缓冲区一次最多可容纳的元素数量（`N - 1`）。
    #[inline]
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Hand out the producer and consumer roles.
    ///
    /// 分发生产者和消费者角色。
    #[inline]
    pub fn split(&mut self) -> (Producer<'_, T, N>, Consumer<'_, T, N>) {
        let buffer: &CircularBuffer<T, N> = self;
        (Producer { buffer }, Consumer { buffer })
    }

    #[inline(always)]
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        pending::<N>(head, tail)
    }
}

impl<T, const N: usize> Default for CircularBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> std::fmt::Debug for CircularBuffer<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircularBuffer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

impl<T, const N: usize> Drop for CircularBuffer<T, N> {
    fn drop(&mut self) {
        let mut head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);

        while head != tail {
            // SAFETY: every slot in `[head, tail)` holds an initialised item.
            self.slots[head].with_mut(|slot| unsafe { (*slot).assume_init_drop() });
            head = (head + 1) % N;
        }
    }
}

/// The producer side of a [`CircularBuffer`].
#[derive(Debug)]
pub struct Producer<'a, T, const N: usize> {
    buffer: &'a CircularBuffer<T, N>,
}

impl<'a, T, const N: usize> Producer<'a, T, N> {
    /// Append one item.
    ///
    /// Returns the item back if the buffer is full; nothing changes in that case.
    ///
    /// 追加一个元素。缓冲区已满时原样返回该元素，且不做任何修改。
    #[inline]
    pub fn add_item(&mut self, item: T) -> Result<(), T> {
        let buffer = self.buffer;
        // Pairs with the consumer's release so its reads of released slots
        // finish before they are overwritten.
        let head = buffer.head.load(Ordering::Acquire);
        let tail = buffer.tail.load(Ordering::Relaxed);
        let next = (tail + 1) % N;

        if next == head {
            return Err(item);
        }

        buffer.slots[tail].with_mut(|slot| unsafe { (*slot).write(item) });
        buffer.tail.store(next, Ordering::Release);

        Ok(())
    }

    /// Append as many of `items` as fit, in order, publishing them together.
    ///
    /// Returns how many were added; the rest did not fit because the buffer is
    /// full.
    ///
    /// 按顺序追加尽可能多的 `items` 并一次性发布。返回实际追加的数量。
    #[inline]
    pub fn add_items(&mut self, items: &[T]) -> usize
    where
        T: Clone,
    {
        let buffer = self.buffer;
        let head = buffer.head.load(Ordering::Acquire);
        let mut tail = buffer.tail.load(Ordering::Relaxed);
        let available = N - pending::<N>(head, tail) - 1;
        let count = available.min(items.len());

        if count != 0 {
            for item in &items[..count] {
                buffer.slots[tail].with_mut(|slot| unsafe { (*slot).write(item.clone()) });
                tail = (tail + 1) % N;
            }

            buffer.tail.store(tail, Ordering::Release);
        }

        count
    }

    /// Items currently waiting for the consumer.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == N - 1
    }
}

/// The consumer side of a [`CircularBuffer`].
#[derive(Debug)]
pub struct Consumer<'a, T, const N: usize> {
    buffer: &'a CircularBuffer<T, N>,
}

impl<'a, T, const N: usize> Consumer<'a, T, N> {
    /// Take a window over every item published so far.
    ///
    /// The window keeps the consumer borrowed until it is released (or
    /// dropped, in which case nothing is freed and the same items show up in
    /// the next window).
    ///
    /// 获取当前已发布的所有元素的窗口。
    /// 窗口在被释放（或被 drop）之前会一直借用消费者；若只是 drop，元素不会被释放，
    /// 下一个窗口中仍会出现这些元素。
    #[inline]
    pub fn get_enumerable(&mut self) -> Enumerable<'_, T, N> {
        let buffer = self.buffer;
        let head = buffer.head.load(Ordering::Relaxed);
        let tail = buffer.tail.load(Ordering::Acquire);

        Enumerable::new(buffer, head, pending::<N>(head, tail))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fixed window of items taken from a [`CircularBuffer`].
///
/// The window can be walked any number of times with [`iter`](Self::iter);
/// every walk starts again at the oldest item. [`release`](Self::release)
/// drops the items and returns their slots to the producer.
#[must_use = "items stay in the buffer until the window is released"]
pub struct Enumerable<'c, T, const N: usize> {
    buffer: &'c CircularBuffer<T, N>,
    start: usize,
    count: usize,
}

impl<'c, T, const N: usize> Enumerable<'c, T, N> {
    #[inline]
    fn new(buffer: &'c CircularBuffer<T, N>, start: usize, count: usize) -> Self {
        debug_assert!(start < N, "window start {start} is outside the buffer");
        debug_assert!(count < N, "window count {count} exceeds the buffer capacity");

        Self {
            buffer,
            start,
            count,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The `index`-th oldest item of the window.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index < self.count {
            Some(self.slot((self.start + index) % N))
        } else {
            None
        }
    }

    /// Walk the window from its oldest item.
    #[inline]
    pub fn iter(&self) -> Iter<'_, T, N> {
        Iter {
            window: self,
            position: self.start,
            remaining: self.count,
        }
    }

    /// Drop every item in the window and hand the slots back to the producer.
    ///
    /// 释放窗口中的所有元素，并将槽归还给生产者。
    #[inline]
    pub fn release(self) {
        let buffer = self.buffer;
        debug_assert_eq!(
            buffer.head.load(Ordering::Relaxed),
            self.start,
            "enumerable should be the circular buffer's current window"
        );

        let mut release = Release {
            buffer,
            position: self.start,
            remaining: self.count,
        };
        release.drop_items();
    }

    #[inline(always)]
    fn slot(&self, position: usize) -> &T {
        // SAFETY: callers only pass positions inside the window, which the
        // producer published before `get_enumerable` read `tail`.
        self.buffer.slots[position].with(|slot| unsafe { (*slot).assume_init_ref() })
    }
}

/// Drops the items of a released window and moves `head` past them.
///
/// `head` is stored from `Drop`, so a panicking item destructor still leaves
/// every touched slot outside `[head, tail)`.
struct Release<'c, T, const N: usize> {
    buffer: &'c CircularBuffer<T, N>,
    position: usize,
    remaining: usize,
}

impl<'c, T, const N: usize> Release<'c, T, N> {
    fn drop_items(&mut self) {
        while self.remaining > 0 {
            let position = self.position;
            self.position = (position + 1) % N;
            self.remaining -= 1;
            // SAFETY: the slot is inside the window, owned by the consumer and
            // already skipped by `self.position`, so it is dropped only here.
            self.buffer.slots[position].with_mut(|slot| unsafe { (*slot).assume_init_drop() });
        }
    }
}

impl<'c, T, const N: usize> Drop for Release<'c, T, N> {
    fn drop(&mut self) {
        // Only non-empty after an item destructor panicked.
        self.drop_items();

        fence(Ordering::Release);
        self.buffer.head.store(self.position, Ordering::Relaxed);
    }
}

impl<'c, T: std::fmt::Debug, const N: usize> std::fmt::Debug for Enumerable<'c, T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'e, 'c, T, const N: usize> IntoIterator for &'e Enumerable<'c, T, N> {
    type Item = &'e T;
    type IntoIter = Iter<'e, T, N>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the items of an [`Enumerable`], oldest first.
pub struct Iter<'e, T, const N: usize> {
    window: &'e Enumerable<'e, T, N>,
    position: usize,
    remaining: usize,
}

impl<'e, T, const N: usize> Iterator for Iter<'e, T, N> {
    type Item = &'e T;

    #[inline]
    fn next(&mut self) -> Option<&'e T> {
        if self.remaining == 0 {
            return None;
        }

        let item = self.window.slot(self.position);
        self.position = (self.position + 1) % N;
        self.remaining -= 1;

        Some(item)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'e, T, const N: usize> ExactSizeIterator for Iter<'e, T, N> {}

impl<'e, T, const N: usize> FusedIterator for Iter<'e, T, N> {}
