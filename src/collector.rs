use crate::retired::{Reclaimer, drop_box};

/// A memory reclamation domain.
///
/// A collector is cheap to clone and shared between threads; each thread
/// that touches managed data registers its own [`Participant`].
///
/// 一个内存回收域。
/// 集合器可以廉价克隆并在线程间共享；每个访问受管数据的线程注册自己的 [`Participant`]。
pub trait Collector: Clone + Send + Sync {
    type Participant: Participant;

    /// Register a participant for the calling thread.
    /// 为调用线程注册一个参与者。
    fn register(&self) -> Self::Participant;
}

/// A thread's handle into a [`Collector`].
///
/// Reads of managed data happen between [`begin`](Self::begin) and
/// [`end`](Self::end). Brackets nest; only the outermost pair has an effect.
/// Items passed to [`manage`](Self::manage) are reclaimed once no bracket that
/// could still observe them is open.
///
/// Prefer [`pin`](Self::pin), which pairs the calls through a [`Guard`].
///
/// 线程进入 [`Collector`] 的句柄。
/// 对受管数据的读取发生在 `begin` 与 `end` 之间。括号可以嵌套，只有最外层生效。
/// 交给 `manage` 的对象会在没有任何可能观察到它的括号打开时被回收。
pub trait Participant {
    /// Open a bracket.
    fn begin(&self);

    /// Close the innermost open bracket.
    ///
    /// # Panics
    /// If no bracket is open.
    fn end(&self);

    /// Hand `item` over for deferred reclamation with `reclaimer`.
    ///
    /// # Safety
    /// - `item` must already be unreachable for any thread that begins a
    ///   bracket after this call.
    /// - `reclaimer(item)` must be sound to call exactly once, from any thread,
    ///   and must not use this collector.
    unsafe fn manage(&self, item: *mut (), reclaimer: Reclaimer);

    /// Identifies the collector this participant belongs to.
    ///
    /// Participants of clones of one collector return the same address;
    /// participants of different live collectors never do.
    ///
    /// 标识该参与者所属的回收器。同一回收器（及其克隆）的参与者返回相同的地址。
    fn domain(&self) -> *const ();

    /// Open a bracket that closes when the returned guard is dropped.
    ///
    /// 打开一个括号，在返回的守卫被 drop 时关闭。
    #[inline]
    fn pin(&self) -> Guard<'_, Self>
    where
        Self: Sized,
    {
        self.begin();
        Guard { participant: self }
    }
}

/// An open bracket on a [`Participant`].
///
/// References obtained under a guard (for example from
/// [`GcPtr::load`](crate::GcPtr::load)) cannot outlive it.
///
/// Cloning a guard opens a nested bracket, so the participant stays inside a
/// bracket until every clone is dropped.
///
/// 参与者上一个打开的括号。在守卫下获得的引用不能比它活得更久。
/// 克隆守卫会打开一个嵌套括号。
#[must_use]
pub struct Guard<'a, P: Participant> {
    participant: &'a P,
}

impl<'a, P: Participant> Guard<'a, P> {
    /// The participant this bracket belongs to.
    #[inline]
    pub fn participant(&self) -> &'a P {
        self.participant
    }

    /// Drop `value` once no bracket can still observe it.
    ///
    /// 在没有括号可能观察到 `value` 后将其 drop。
    #[inline]
    pub fn defer_drop<T: Send + 'static>(&self, value: Box<T>) {
        // SAFETY: the box is owned by the collector from here on and its
        // reclaimer only drops it.
        unsafe {
            self.participant
                .manage(Box::into_raw(value).cast(), drop_box::<T>)
        }
    }

    /// Same as [`Participant::manage`].
    ///
    /// # Safety
    /// See [`Participant::manage`].
    #[inline]
    pub unsafe fn manage(&self, item: *mut (), reclaimer: Reclaimer) {
        unsafe { self.participant.manage(item, reclaimer) }
    }
}

impl<'a, P: Participant> Clone for Guard<'a, P> {
    #[inline]
    fn clone(&self) -> Self {
        self.participant.begin();
        Guard {
            participant: self.participant,
        }
    }
}

impl<'a, P: Participant> Drop for Guard<'a, P> {
    #[inline]
    fn drop(&mut self) {
        self.participant.end();
    }
}

impl<'a, P: Participant> std::fmt::Debug for Guard<'a, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard").finish_non_exhaustive()
    }
}
