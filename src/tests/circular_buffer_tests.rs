/// 环形缓冲区测试模块
/// 测试容量、FIFO 顺序、窗口语义和单生产者单消费者并发
use super::DropCounter;
use crate::CircularBuffer;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// 测试1: N = 4 的缓冲区恰好接受 3 个元素
#[test]
fn test_capacity_is_one_less_than_slots() {
    let mut buffer = CircularBuffer::<u32, 4>::new();
    assert_eq!(buffer.capacity(), 3);

    let (mut producer, _consumer) = buffer.split();
    assert_eq!(producer.add_item(1), Ok(()));
    assert_eq!(producer.add_item(2), Ok(()));
    assert_eq!(producer.add_item(3), Ok(()));
    assert!(producer.is_full());
    assert_eq!(producer.add_item(4), Err(4));
    assert_eq!(producer.len(), 3);
}

/// 测试2: 空缓冲区得到空窗口
#[test]
fn test_empty_window() {
    let mut buffer = CircularBuffer::<u32, 8>::new();
    let (producer, mut consumer) = buffer.split();

    assert!(producer.is_empty());
    assert!(consumer.is_empty());

    let window = consumer.get_enumerable();
    assert!(window.is_empty());
    assert_eq!(window.iter().next(), None);
    assert_eq!(window.get(0), None);
    window.release();
}

/// 测试3: 元素按 FIFO 顺序出现，包括回绕之后
#[test]
fn test_fifo_order_across_wraparound() {
    let mut buffer = CircularBuffer::<usize, 5>::new();
    let (mut producer, mut consumer) = buffer.split();
    let mut next = 0;
    let mut expected = 0;

    for round in 0..20 {
        let batch = round % 4 + 1;
        for _ in 0..batch {
            producer.add_item(next).unwrap();
            next += 1;
        }

        let window = consumer.get_enumerable();
        assert_eq!(window.len(), batch);
        for item in &window {
            assert_eq!(*item, expected);
            expected += 1;
        }
        window.release();
    }
}

/// 测试4: add_items 只追加能放下的部分
#[test]
fn test_add_items_partial() {
    let mut buffer = CircularBuffer::<u32, 4>::new();
    let (mut producer, mut consumer) = buffer.split();

    assert_eq!(producer.add_items(&[1, 2, 3, 4, 5]), 3);
    assert_eq!(producer.add_items(&[6]), 0);
    assert_eq!(producer.add_items(&[]), 0);

    let window = consumer.get_enumerable();
    assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    window.release();

    assert_eq!(producer.add_items(&[4, 5]), 2);
    let window = consumer.get_enumerable();
    assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![4, 5]);
    window.release();
}

/// 测试5: 窗口可以反复遍历，每次都从最旧的元素开始
#[test]
fn test_window_can_be_walked_repeatedly() {
    let mut buffer = CircularBuffer::<&str, 8>::new();
    let (mut producer, mut consumer) = buffer.split();
    producer.add_items(&["a", "b", "c"]);

    let window = consumer.get_enumerable();
    let first: Vec<_> = window.iter().collect();
    let second: Vec<_> = window.iter().collect();
    assert_eq!(first, second);
    assert_eq!(window.get(1), Some(&"b"));
    assert_eq!(window.iter().len(), 3);
    assert_eq!(format!("{window:?}"), r#"["a", "b", "c"]"#);
    window.release();
}

/// 测试6: 窗口是固定的快照，之后追加的元素出现在下一个窗口
#[test]
fn test_window_is_a_snapshot() {
    let mut buffer = CircularBuffer::<u32, 8>::new();
    let (mut producer, mut consumer) = buffer.split();
    producer.add_item(1).unwrap();

    let window = consumer.get_enumerable();
    producer.add_item(2).unwrap();
    assert_eq!(window.len(), 1);
    window.release();

    let window = consumer.get_enumerable();
    assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![2]);
    window.release();
}

/// 测试7: 只 drop 窗口而不释放时，元素保留在缓冲区中
#[test]
fn test_dropped_window_keeps_items() {
    let mut buffer = CircularBuffer::<u32, 4>::new();
    let (mut producer, mut consumer) = buffer.split();
    producer.add_items(&[1, 2]);

    {
        let window = consumer.get_enumerable();
        assert_eq!(window.len(), 2);
    }

    let window = consumer.get_enumerable();
    assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    window.release();
    assert!(consumer.is_empty());
}

/// 测试8: release 把槽归还给生产者
#[test]
fn test_release_frees_slots() {
    let mut buffer = CircularBuffer::<u32, 3>::new();
    let (mut producer, mut consumer) = buffer.split();

    for round in 0..10 {
        assert_eq!(producer.add_items(&[round, round + 1]), 2);
        assert!(producer.add_item(99).is_err());
        consumer.get_enumerable().release();
        assert!(producer.is_empty());
    }
}

/// 测试9: release 恰好 drop 窗口中的每个元素一次
#[test]
fn test_release_drops_each_item_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    let mut buffer = CircularBuffer::<DropCounter, 8>::new();
    let (mut producer, mut consumer) = buffer.split();

    for _ in 0..5 {
        assert!(producer.add_item(DropCounter::new(&drops)).is_ok());
    }

    let window = consumer.get_enumerable();
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    window.release();
    assert_eq!(drops.load(Ordering::SeqCst), 5);
}

/// 测试10: 缓冲区满时被拒绝的元素原样返回给调用者
#[test]
fn test_rejected_item_is_returned() {
    let drops = Arc::new(AtomicUsize::new(0));
    let mut buffer = CircularBuffer::<DropCounter, 2>::new();
    let (mut producer, _consumer) = buffer.split();

    assert!(producer.add_item(DropCounter::new(&drops)).is_ok());
    let rejected = producer.add_item(DropCounter::new(&drops));
    assert!(rejected.is_err());
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    drop(rejected);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// 测试11: drop 缓冲区时 drop 所有未释放的元素
#[test]
fn test_drop_buffer_drops_pending_items() {
    let drops = Arc::new(AtomicUsize::new(0));
    {
        let mut buffer = CircularBuffer::<DropCounter, 4>::new();
        let (mut producer, mut consumer) = buffer.split();

        // 让 head 与 tail 回绕
        for _ in 0..3 {
            producer.add_item(DropCounter::new(&drops)).unwrap();
            consumer.get_enumerable().release();
        }
        producer.add_item(DropCounter::new(&drops)).unwrap();
        producer.add_item(DropCounter::new(&drops)).unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }
    assert_eq!(drops.load(Ordering::SeqCst), 5);
}

/// 测试12: 跨线程的生产者和消费者保持 FIFO 顺序且不丢失元素
#[test]
fn test_concurrent_producer_consumer() {
    const ITEMS: usize = 50_000;

    let mut buffer = CircularBuffer::<usize, 64>::new();
    let (mut producer, mut consumer) = buffer.split();

    thread::scope(|scope| {
        scope.spawn(move || {
            for item in 0..ITEMS {
                let mut pending = item;
                while let Err(rejected) = producer.add_item(pending) {
                    pending = rejected;
                    std::hint::spin_loop();
                }
            }
        });

        scope.spawn(move || {
            let mut expected = 0;
            while expected < ITEMS {
                let window = consumer.get_enumerable();
                for item in &window {
                    assert_eq!(*item, expected);
                    expected += 1;
                }
                window.release();
            }
        });
    });
}

/// 测试13: 跨线程批量追加
#[test]
fn test_concurrent_batches() {
    const BATCHES: usize = 2_000;

    let mut buffer = CircularBuffer::<String, 16>::new();
    let (mut producer, mut consumer) = buffer.split();

    thread::scope(|scope| {
        scope.spawn(move || {
            for batch in 0..BATCHES {
                let items: Vec<String> = (0..4).map(|i| format!("{batch}-{i}")).collect();
                let mut sent = 0;
                while sent < items.len() {
                    sent += producer.add_items(&items[sent..]);
                }
            }
        });

        scope.spawn(move || {
            let mut received = 0;
            while received < BATCHES * 4 {
                let window = consumer.get_enumerable();
                for item in window.iter() {
                    assert_eq!(item, &format!("{}-{}", received / 4, received % 4));
                    received += 1;
                }
                window.release();
            }
        });
    });
}

/// 在 drop 时计数，并可选地随后 panic 的元素
struct PanicOnDrop {
    drops: Arc<AtomicUsize>,
    panic: bool,
}

impl Drop for PanicOnDrop {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
        if self.panic {
            panic!("item destructor failed");
        }
    }
}

/// 测试14: 元素析构 panic 时 release 仍然 drop 其余元素并推进 head，每个元素只 drop 一次
#[test]
fn test_release_survives_panicking_item() {
    let drops = Arc::new(AtomicUsize::new(0));
    {
        let mut buffer = CircularBuffer::<PanicOnDrop, 8>::new();
        let (mut producer, mut consumer) = buffer.split();

        for panic in [false, true, false] {
            let item = PanicOnDrop {
                drops: Arc::clone(&drops),
                panic,
            };
            assert!(producer.add_item(item).is_ok());
        }

        let window = consumer.get_enumerable();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| window.release()));
        assert!(result.is_err());
        assert_eq!(drops.load(Ordering::SeqCst), 3);

        // 槽已经归还给生产者
        assert!(consumer.is_empty());
        assert!(consumer.get_enumerable().is_empty());
        assert_eq!(producer.len(), 0);
    }
    assert_eq!(drops.load(Ordering::SeqCst), 3);
}
