/// 交换缓冲区测试模块
/// 测试最新值获胜语义、槽轮换和单生产者单消费者并发
use crate::SwapBuffer;
use std::sync::Arc;
use std::thread;

/// 测试1: 读者在任何 apply 之前看到初始读槽
#[test]
fn test_initial_read_slot() {
    let mut buffer = SwapBuffer::from_slots([10, 20, 30]);
    let (mut writer, mut reader) = buffer.split();

    assert!(!reader.has_update());
    assert_eq!(*reader.read(), 30);
    assert_eq!(*writer.get_future(), 20);
}

/// 测试2: apply 之后读者看到新值
#[test]
fn test_apply_then_read() {
    let mut buffer = SwapBuffer::new(0u32);
    let (mut writer, mut reader) = buffer.split();

    *writer.get_future() = 7;
    writer.apply();

    assert!(reader.has_update());
    assert_eq!(*reader.read(), 7);
    assert!(!reader.has_update());
}

/// 测试3: 多次 apply 只有最后一个值可见
#[test]
fn test_latest_wins() {
    let mut buffer = SwapBuffer::new(0u32);
    let (mut writer, mut reader) = buffer.split();

    writer.publish(1);
    writer.publish(2);
    writer.publish(3);

    assert_eq!(*reader.read(), 3);
    // 没有新的发布时再次读取同一个值
    assert_eq!(*reader.read(), 3);
}

/// 测试4: 交替发布与读取
#[test]
fn test_alternating_publish_and_read() {
    let mut buffer = SwapBuffer::new(String::new());
    let (mut writer, mut reader) = buffer.split();

    for round in 0..10 {
        writer.publish(format!("round {round}"));
        assert_eq!(reader.read(), &format!("round {round}"));
    }
}

/// 测试5: future 槽保留其上一次持有的值
#[test]
fn test_future_slot_keeps_previous_contents() {
    let mut buffer = SwapBuffer::from_slots([10, 20, 30]);
    let (mut writer, mut reader) = buffer.split();

    // 读者尚未取走时，写入者取得待发布槽
    writer.publish(21);
    assert_eq!(*writer.get_future(), 10);

    // 读者取走后，再次发布会把读者交还的槽给写入者
    assert_eq!(*reader.read(), 21);
    writer.publish(11);
    assert_eq!(*writer.get_future(), 30);
    assert_eq!(*reader.read(), 11);
}

/// 测试6: 未被读取的发布被覆盖，槽不会丢失
#[test]
fn test_overwritten_publication_recycles_slot() {
    let mut buffer = SwapBuffer::from_slots([0, 0, 0]);
    let (mut writer, mut reader) = buffer.split();

    for value in 1..=100 {
        writer.publish(value);
        if value % 7 == 0 {
            assert_eq!(*reader.read(), value);
        }
    }

    assert_eq!(*reader.read(), 100);
}

/// 测试7: drop 缓冲区时释放所有三个槽
#[test]
fn test_drop_releases_all_slots() {
    let value = Arc::new(());
    {
        let mut buffer = SwapBuffer::new(Arc::clone(&value));
        assert_eq!(Arc::strong_count(&value), 4);

        let (mut writer, _reader) = buffer.split();
        writer.publish(Arc::clone(&value));
        // 被覆盖的旧值已被 drop
        assert_eq!(Arc::strong_count(&value), 4);
    }
    assert_eq!(Arc::strong_count(&value), 1);
}

/// 测试8: 跨线程读者看到的值单调不减，并最终看到最后一个值
#[test]
fn test_concurrent_monotonic_reads() {
    const LAST: u64 = 20_000;

    let mut buffer = SwapBuffer::new(0u64);
    let (mut writer, mut reader) = buffer.split();

    thread::scope(|scope| {
        scope.spawn(move || {
            for value in 1..=LAST {
                writer.publish(value);
            }
        });

        scope.spawn(move || {
            let mut last = 0;
            loop {
                let value = *reader.read();
                assert!(value >= last, "went back from {last} to {value}");
                last = value;
                if value == LAST {
                    break;
                }
                std::hint::spin_loop();
            }
        });
    });
}

/// 测试9: 跨线程发布的复合值总是完整的
#[test]
fn test_concurrent_values_are_consistent() {
    const ROUNDS: usize = 5_000;

    let mut buffer = SwapBuffer::new(vec![0usize; 16]);
    let (mut writer, mut reader) = buffer.split();

    thread::scope(|scope| {
        scope.spawn(move || {
            for round in 1..=ROUNDS {
                let future = writer.get_future();
                future.clear();
                future.extend(std::iter::repeat_n(round, 16));
                writer.apply();
            }
        });

        scope.spawn(move || {
            loop {
                let values = reader.read();
                let first = values[0];
                assert!(values.iter().all(|&value| value == first));
                if first == ROUNDS {
                    break;
                }
            }
        });
    });
}
