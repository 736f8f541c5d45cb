//! Lock-free and wait-free building blocks for exchanging data between threads.
//!
//! - [`SwapBuffer`]: wait-free single-producer single-consumer triple buffer,
//!   latest value wins.
//! - [`CircularBuffer`]: wait-free single-producer single-consumer bounded
//!   FIFO, consumed one window at a time.
//! - [`SharedResource`]: a replaceable value shared between any number of
//!   setters and getters.
//! - [`IdPool`]: lock-free generator of consecutive IDs.
//! - [`EpochCollector`] and [`LazyCollector`]: deferred reclamation behind the
//!   common [`Collector`] / [`Participant`] interface, with [`GcPtr`] as a
//!   ready-made managed pointer.
//!
//! 用于线程间交换数据的无锁与无等待构件。
//!
//! - [`SwapBuffer`]：无等待的单生产者单消费者三缓冲，最新值获胜。
//! - [`CircularBuffer`]：无等待的单生产者单消费者有界 FIFO，按窗口消费。
//! - [`SharedResource`]：可被任意数量设置者和获取者共享的可替换值。
//! - [`IdPool`]：无锁的连续 ID 生成器。
//! - [`EpochCollector`] 与 [`LazyCollector`]：基于通用 [`Collector`] / [`Participant`]
//!   接口的延迟回收，[`GcPtr`] 是现成的受管指针。
//!
//! # Example
//! ```
//! use concurrent_exchange::{Collector, EpochCollector, GcPtr, Participant};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let collector = EpochCollector::new();
//! let config = Arc::new(GcPtr::new(String::from("v1")));
//!
//! let reader = {
//!     let collector = collector.clone();
//!     let config = Arc::clone(&config);
//!     thread::spawn(move || {
//!         let participant = collector.register();
//!         let guard = participant.pin();
//!         let value = config.load(&guard);
//!         assert!(value == "v1" || value == "v2");
//!     })
//! };
//!
//! let participant = collector.register();
//! config.store(String::from("v2"), &participant.pin());
//!
//! reader.join().unwrap();
//! collector.collect();
//! ```

mod alloc;
mod circular_buffer;
mod collector;
mod epoch;
mod id;
mod lazy;
mod ptr;
mod retired;
mod shared_resource;
mod swap_buffer;
mod sync;

pub use alloc::{AllocError, Allocator, Global};
pub use circular_buffer::{CircularBuffer, Consumer, Enumerable, Iter, Producer};
pub use collector::{Collector, Guard, Participant};
pub use epoch::{EpochCollector, EpochCollectorBuilder, EpochParticipant};
pub use id::{IdGenerator, IdPool};
pub use lazy::{LazyCollector, LazyParticipant};
pub use ptr::GcPtr;
pub use retired::Reclaimer;
pub use shared_resource::{CloneShare, FnShare, SharePolicy, SharedResource, SharedResourceBuilder};
pub use swap_buffer::{SwapBuffer, SwapReader, SwapWriter};

#[cfg(all(test, not(feature = "loom")))]
mod tests;
