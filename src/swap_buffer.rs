use crate::sync::{AtomicUsize, Ordering, UnsafeCell};

/// Set in the shared index word while a published slot is waiting for the reader.
/// 当已发布的槽等待读者取走时，在共享索引字中设置此标志。
const MODIFIED_FLAG: usize = 0x80;

/// A wait-free single-producer single-consumer swap buffer.
///
/// Three slots rotate between the roles: one is owned by the writer (the
/// "future" slot), one is pending publication, one is owned by the reader.
/// The only shared mutable state is the `index` word, which packs the pending
/// slot index together with [`MODIFIED_FLAG`].
///
/// Publishing is latest-wins: if the writer applies several times before the
/// reader looks, only the last applied value is ever observed.
///
/// The writer and reader roles are obtained through [`SwapBuffer::split`].
///
/// 无等待的单生产者单消费者交换缓冲区。
///
/// 三个槽在角色之间轮换：一个属于写入者（"future" 槽），一个等待发布，一个属于读者。
/// 唯一的共享可变状态是 `index` 字，它打包了待发布槽的索引和 [`MODIFIED_FLAG`]。
///
/// 发布是"最新值获胜"：若写入者在读者读取前多次 apply，只有最后一次的值可见。
///
/// # Example
/// ```
/// use concurrent_exchange::SwapBuffer;
///
/// let mut buffer = SwapBuffer::new(0u32);
/// let (mut writer, mut reader) = buffer.split();
///
/// *writer.get_future() = 7;
/// writer.apply();
/// assert_eq!(*reader.read(), 7);
/// ```
pub struct SwapBuffer<T> {
    slots: [UnsafeCell<T>; 3],
    index: AtomicUsize,
    /// Writer-owned.
    write: UnsafeCell<usize>,
    /// Reader-owned.
    read: UnsafeCell<usize>,
}

// SAFETY: each slot is accessed by at most one role at a time; ownership of a
// slot moves between the writer and the reader through `index`.
unsafe impl<T: Send> Sync for SwapBuffer<T> {}

impl<T> SwapBuffer<T> {
    /// Create a swap buffer from its three initial slot values.
    ///
    /// Slot `2` is what the reader sees before anything is applied, slot `1`
    /// is the writer's first future slot.
    #[inline]
    pub fn from_slots(slots: [T; 3]) -> Self {
        let [pending, write, read] = slots;
        Self {
            slots: [
                UnsafeCell::new(pending),
                UnsafeCell::new(write),
                UnsafeCell::new(read),
            ],
            index: AtomicUsize::new(0),
            write: UnsafeCell::new(1),
            read: UnsafeCell::new(2),
        }
    }

    /// Create a swap buffer with every slot holding a copy of `value`.
    /// 创建一个每个槽都持有 `value` 副本的交换缓冲区。
    #[inline]
    pub fn new(value: T) -> Self
    where
        T: Clone,
    {
        Self::from_slots([value.clone(), value.clone(), value])
    }

    /// Hand out the writer and reader roles.
    ///
    /// Each handle may be sent to its own thread. Borrowing `self` mutably
    /// guarantees there is exactly one writer and one reader at a time.
    ///
    /// 分发写入者和读者角色。每个句柄可以被发送到各自的线程。
    #[inline]
    pub fn split(&mut self) -> (SwapWriter<'_, T>, SwapReader<'_, T>) {
        let buffer: &SwapBuffer<T> = self;
        (SwapWriter { buffer }, SwapReader { buffer })
    }
}

impl<T> std::fmt::Debug for SwapBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapBuffer")
            .field("index", &self.index.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: Default> Default for SwapBuffer<T> {
    fn default() -> Self {
        Self::from_slots([T::default(), T::default(), T::default()])
    }
}

/// The producer side of a [`SwapBuffer`].
#[derive(Debug)]
pub struct SwapWriter<'a, T> {
    buffer: &'a SwapBuffer<T>,
}

impl<'a, T> SwapWriter<'a, T> {
    /// The slot the next [`apply`](Self::apply) will publish.
    ///
    /// The slot keeps whatever it last held (a value published earlier or a
    /// value the reader handed back), so it has to be fully overwritten.
    ///
    /// 下一次 [`apply`](Self::apply) 将发布的槽。
    /// 该槽保留其上一次持有的内容，因此必须完全覆盖。
    #[inline]
    pub fn get_future(&mut self) -> &mut T {
        let write = self.buffer.write.with(|w| unsafe { *w });
        // SAFETY: the writer exclusively owns the slot at `write` until `apply`,
        // and `&mut self` keeps the returned reference from outliving that.
        self.buffer.slots[write].with_mut(|slot| unsafe { &mut *slot })
    }

    /// Publish the future slot and take a free slot for the next write.
    ///
    /// If the previous publication was never picked up by the reader, that
    /// slot comes straight back to the writer and its value is lost.
    ///
    /// 发布 future 槽，并取得下一次写入使用的空闲槽。
    /// 若上一次发布未被读者取走，该槽会直接回到写入者手中，其值被丢弃。
    #[inline]
    pub fn apply(&mut self) {
        let buffer = self.buffer;
        let write = buffer.write.with(|w| unsafe { *w });
        let published = write | MODIFIED_FLAG;

        let current = buffer.index.load(Ordering::Acquire);
        let next = if current & MODIFIED_FLAG != 0 {
            // The reader may be swapping concurrently; the exchange settles who
            // gets which slot.
            buffer.index.swap(published, Ordering::AcqRel)
        } else {
            // Without the flag the reader never writes `index`.
            buffer.index.store(published, Ordering::Release);
            current
        };

        buffer
            .write
            .with_mut(|w| unsafe { *w = next & !MODIFIED_FLAG });
    }

    /// Write `value` into the future slot and publish it.
    #[inline]
    pub fn publish(&mut self, value: T) {
        *self.get_future() = value;
        self.apply();
    }
}

/// The consumer side of a [`SwapBuffer`].
#[derive(Debug)]
pub struct SwapReader<'a, T> {
    buffer: &'a SwapBuffer<T>,
}

impl<'a, T> SwapReader<'a, T> {
    /// Read the most recently applied slot.
    ///
    /// When nothing new was applied since the last call the same slot is
    /// returned again.
    ///
    /// 读取最近一次 apply 的槽。若自上次调用后没有新的发布，则再次返回同一个槽。
    #[inline]
    pub fn read(&mut self) -> &T {
        let buffer = self.buffer;
        let mut read = buffer.read.with(|r| unsafe { *r });

        if buffer.index.load(Ordering::Relaxed) & MODIFIED_FLAG != 0 {
            // Only the reader clears the flag, so it is still set here.
            read = buffer.index.swap(read, Ordering::AcqRel) ^ MODIFIED_FLAG;
            buffer.read.with_mut(|r| unsafe { *r = read });
        }

        // SAFETY: the slot at `read` belongs to the reader until its next
        // exchange, which needs `&mut self`.
        buffer.slots[read].with(|slot| unsafe { &*slot })
    }

    /// Whether a publication is waiting to be picked up by [`read`](Self::read).
    #[inline]
    pub fn has_update(&self) -> bool {
        self.buffer.index.load(Ordering::Relaxed) & MODIFIED_FLAG != 0
    }
}
