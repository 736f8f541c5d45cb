use crate::sync::{AtomicUsize, Backoff, Ordering, UnsafeCell};
use crossbeam_utils::CachePadded;

/// Bits of the `current` word holding the read count; the slot index sits above.
/// `current` 字中保存读计数的位数；槽索引位于其上方。
const INDEX_SHIFT: u32 = 16;
const READS_MASK: usize = (1 << INDEX_SHIFT) - 1;

/// The packed `current` word: `(slot_index << 16) | read_count`.
///
/// `read_count` counts the gets that started against `slot_index` since it
/// was installed and have not been rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CurrentWord(usize);

impl CurrentWord {
    #[inline(always)]
    const fn installed(index: usize) -> Self {
        Self(index << INDEX_SHIFT)
    }

    #[inline(always)]
    const fn index(self) -> usize {
        self.0 >> INDEX_SHIFT
    }

    #[inline(always)]
    const fn reads(self) -> usize {
        self.0 & READS_MASK
    }
}

/// How values leave and die in a [`SharedResource`].
///
/// `share` produces the caller's own value from the installed one; it must
/// make that value independently safe (a clone, a retained handle), because
/// the resource stops tracking it once `get` returns. `destroy` receives every
/// value the resource evicts or still holds when dropped.
///
/// A panic in `share` propagates out of `get`; the node is still released.
///
/// 值如何离开以及销毁 [`SharedResource`]。
/// `share` 从已安装的值生成调用者自己的值，必须保证该值独立安全（克隆、引用计数句柄），
/// 因为 `get` 返回后资源不再跟踪它。`destroy` 接收每个被驱逐的值，以及资源被 drop 时仍持有的值。
pub trait SharePolicy<T> {
    fn share(&self, data: &T) -> T;

    #[inline]
    fn destroy(&self, data: T) {
        drop(data);
    }
}

/// Shares by cloning and destroys by dropping.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloneShare;

impl<T: Clone> SharePolicy<T> for CloneShare {
    #[inline]
    fn share(&self, data: &T) -> T {
        data.clone()
    }
}

/// A [`SharePolicy`] built from two closures.
#[derive(Debug, Clone, Copy)]
pub struct FnShare<S, D> {
    share: S,
    destroy: D,
}

impl<S, D> FnShare<S, D> {
    pub fn new(share: S, destroy: D) -> Self {
        Self { share, destroy }
    }
}

impl<T, S, D> SharePolicy<T> for FnShare<S, D>
where
    S: Fn(&T) -> T,
    D: Fn(T),
{
    #[inline]
    fn share(&self, data: &T) -> T {
        (self.share)(data)
    }

    #[inline]
    fn destroy(&self, data: T) {
        (self.destroy)(data)
    }
}

struct Node<T> {
    /// Claim bit (1) plus two units per get still reading this node, minus
    /// whatever the setter that replaced it settled in advance. Free at 0.
    refs: AtomicUsize,
    data: UnsafeCell<Option<T>>,
}

/// Adds a finished get's two units to its node's `refs`.
struct SettleRead<'a> {
    refs: &'a AtomicUsize,
}

impl Drop for SettleRead<'_> {
    #[inline]
    fn drop(&mut self) {
        // Release so the read of the node's data happens before a setter
        // reclaims the node.
        self.refs.fetch_add(2, Ordering::Release);
    }
}

/// A replaceable resource shared between any number of setters and getters.
///
/// Setters install new versions with [`set`](Self::set); getters obtain their
/// own copy of the version current at call time with [`get`](Self::get).
/// Each of the `N` nodes holds one version; a node is recycled once every get
/// that started against it has finished.
///
/// - `get` is wait-free in the default bounded mode, which allows at most
///   65 535 gets between two sets. In unlimited mode a get rolls its own
///   reservation back when no set intervened, so any number of gets is fine
///   but a get is only lock-free.
/// - `set` is lock-free; it cannot starve as long as `N` exceeds the number of
///   threads getting concurrently.
///
/// 可被任意数量的设置者和获取者共享的可替换资源。
///
/// - 默认的有界模式下 `get` 是无等待的，但两次 `set` 之间最多允许 65 535 次 `get`。
///   无限模式下，若期间没有 `set`，`get` 会回滚自己的预留，因此 `get` 次数不受限，但只是无锁的。
/// - `set` 是无锁的；只要 `N` 大于并发获取的线程数就不会饥饿。
///
/// # Example
/// ```
/// use concurrent_exchange::SharedResource;
///
/// let resource: SharedResource<String, 4> = SharedResource::new("v1".to_string());
/// assert_eq!(resource.get(), "v1");
///
/// resource.set("v2".to_string());
/// assert_eq!(resource.get(), "v2");
/// ```
pub struct SharedResource<T, const N: usize, P: SharePolicy<T> = CloneShare> {
    current: CachePadded<AtomicUsize>,
    nodes: [CachePadded<Node<T>>; N],
    policy: P,
    unlimited: bool,
}

// SAFETY: node data is written only by the setter holding its claim and is
// otherwise only read through `&T` by getters, so `T` must be `Sync` for the
// shared reads and `Send` because values are destroyed on whichever thread
// evicts them.
unsafe impl<T: Send + Sync, const N: usize, P: SharePolicy<T> + Sync> Sync
    for SharedResource<T, N, P>
{
}

/// Builder for a [`SharedResource`].
///
/// # Example
/// ```
/// use concurrent_exchange::{FnShare, SharedResource, SharedResourceBuilder};
///
/// let resource: SharedResource<u64, 8, _> = SharedResourceBuilder::new()
///     .unlimited(true)
///     .policy(FnShare::new(|value: &u64| *value, |_value: u64| {}))
///     .build(1);
/// assert_eq!(resource.get(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct SharedResourceBuilder<P> {
    policy: P,
    unlimited: bool,
}

impl SharedResourceBuilder<CloneShare> {
    #[inline]
    pub fn new() -> Self {
        Self {
            policy: CloneShare,
            unlimited: false,
        }
    }
}

impl Default for SharedResourceBuilder<CloneShare> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> SharedResourceBuilder<P> {
    /// Allow an unbounded number of gets between sets.
    ///
    /// Default: `false`
    #[inline]
    pub fn unlimited(mut self, unlimited: bool) -> Self {
        self.unlimited = unlimited;
        self
    }

    /// Replace the share/destroy policy.
    #[inline]
    pub fn policy<Q>(self, policy: Q) -> SharedResourceBuilder<Q> {
        SharedResourceBuilder {
            policy,
            unlimited: self.unlimited,
        }
    }

    /// Build the resource with `initial` installed.
    #[inline]
    pub fn build<T, const N: usize>(self, initial: T) -> SharedResource<T, N, P>
    where
        P: SharePolicy<T>,
    {
        SharedResource::with_policy(initial, self.policy, self.unlimited)
    }
}

impl<T: Clone, const N: usize> SharedResource<T, N> {
    /// Create a bounded resource that clones on `get`.
    #[inline]
    pub fn new(initial: T) -> Self {
        Self::with_policy(initial, CloneShare, false)
    }
}

impl<T, const N: usize, P: SharePolicy<T>> SharedResource<T, N, P> {
    fn with_policy(initial: T, policy: P, unlimited: bool) -> Self {
        const { assert!(N >= 2, "a shared resource needs at least two nodes") };

        let mut initial = Some(initial);
        let nodes = std::array::from_fn(|index| {
            // Node 0 starts out installed, which is the claim a set releases.
            let refs = if index == 0 { 1 } else { 0 };
            CachePadded::new(Node {
                refs: AtomicUsize::new(refs),
                data: UnsafeCell::new(if index == 0 { initial.take() } else { None }),
            })
        });

        Self {
            current: CachePadded::new(AtomicUsize::new(CurrentWord::installed(0).0)),
            nodes,
            policy,
            unlimited,
        }
    }

    /// Whether gets roll back their reservation (see the type docs).
    #[inline]
    pub fn is_unlimited(&self) -> bool {
        self.unlimited
    }

    /// Get a value shared from the version current at call time.
    ///
    /// # Panics
    /// In bounded mode, on the 65 536th get since the last set. The resource
    /// stays consistent and the next set lifts the limit again.
    ///
    /// 获取一个从调用时的当前版本共享出的值。
    /// 有界模式下，自上次 `set` 以来第 65 536 次 `get` 会 panic；资源保持一致，下一次 `set` 后恢复。
    pub fn get(&self) -> T {
        let word = CurrentWord(self.current.fetch_add(1, Ordering::Acquire));
        if !self.unlimited && word.reads() == READS_MASK {
            // The increment carried into the index bits; take it back before
            // any reader trusts the index.
            self.current.fetch_sub(1, Ordering::Relaxed);
            panic!("more than {READS_MASK} gets between two sets on a bounded shared resource");
        }

        let index = word.index();
        let node = &self.nodes[index];

        // Settles this get on the node even if `share` panics, so the node
        // can still be recycled.
        let settle = SettleRead { refs: &node.refs };

        // SAFETY: the increment on `current` keeps `refs` of this node above
        // zero until `settle` adds its two units, so no setter can claim the
        // node and write to `data` while it is read here.
        let data = node.data.with(|data| match unsafe { &*data } {
            Some(data) => self.policy.share(data),
            None => unreachable!("installed node {index} holds no data"),
        });

        drop(settle);

        if self.unlimited {
            let mut current = self.current.load(Ordering::Relaxed);

            // A non-zero read count keeps the decrement inside the read bits
            // if the node was recycled and reinstalled in the meantime.
            while CurrentWord(current).index() == index && CurrentWord(current).reads() != 0 {
                match self.current.compare_exchange(
                    current,
                    current - 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        node.refs.fetch_sub(2, Ordering::Release);
                        break;
                    }
                    Err(actual) => current = actual,
                }
            }
        }

        data
    }

    /// Install `data` as the current version.
    ///
    /// The value previously held by the node that gets recycled is passed to
    /// the policy's `destroy` after the swap has been settled.
    ///
    /// 将 `data` 安装为当前版本。
    /// 被回收节点原先持有的值会在交换完成后交给策略的 `destroy`。
    pub fn set(&self, data: T) {
        let start = CurrentWord(self.current.load(Ordering::Relaxed)).index();
        let backoff = Backoff::new();
        let mut index = (start + 1) % N;

        loop {
            let refs = &self.nodes[index].refs;
            if refs.load(Ordering::Relaxed) == 0
                && refs
                    .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                break;
            }

            index = (index + 1) % N;
            if index == start {
                // Every other node is busy; give the getters a moment.
                backoff.snooze();
            }
        }

        // SAFETY: the claim won above gives this thread exclusive access.
        let stale = self.nodes[index]
            .data
            .with_mut(|slot| unsafe { (*slot).replace(data) });

        let previous = CurrentWord(
            self.current
                .swap(CurrentWord::installed(index).0, Ordering::AcqRel),
        );

        self.nodes[previous.index()]
            .refs
            .fetch_sub((previous.reads() << 1) | 1, Ordering::AcqRel);

        if let Some(stale) = stale {
            self.policy.destroy(stale);
        }
    }
}

#[cfg(test)]
impl<T, const N: usize, P: SharePolicy<T>> SharedResource<T, N, P> {
    /// Nodes no get or set currently holds.
    pub(crate) fn free_nodes(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.refs.load(Ordering::Relaxed) == 0)
            .count()
    }
}

impl<T, const N: usize, P: SharePolicy<T>> Drop for SharedResource<T, N, P> {
    fn drop(&mut self) {
        for node in self.nodes.iter() {
            if let Some(data) = node.data.with_mut(|slot| unsafe { (*slot).take() }) {
                self.policy.destroy(data);
            }
        }
    }
}

impl<T, const N: usize, P: SharePolicy<T>> std::fmt::Debug for SharedResource<T, N, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let word = CurrentWord(self.current.load(Ordering::Relaxed));
        f.debug_struct("SharedResource")
            .field("nodes", &N)
            .field("current", &word.index())
            .field("reads", &word.reads())
            .field("unlimited", &self.unlimited)
            .finish()
    }
}

#[cfg(test)]
mod word_tests {
    use super::*;

    #[test]
    fn test_current_word_layout() {
        let word = CurrentWord(CurrentWord::installed(3).0 + 5);
        assert_eq!(word.index(), 3);
        assert_eq!(word.reads(), 5);
        assert_eq!(CurrentWord::installed(1).0, 0x10000);
    }
}
