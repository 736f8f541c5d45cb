/// ID 生成器测试模块
/// 测试分配、回收、分配器集成和并发独占性
use super::{CountingAllocator, FailingAllocator};
use crate::{AllocError, IdGenerator, IdPool};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// 测试1: 分配所有 ID 后返回 None
#[test]
fn test_assign_until_exhausted() {
    let pool = IdPool::new(4);
    assert_eq!(pool.max_id(), 4);

    let mut ids: Vec<_> = (0..4).map(|_| pool.try_assign().unwrap()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3]);
    assert_eq!(pool.try_assign(), None);
}

/// 测试2: 回收后的 ID 可以再次分配
#[test]
fn test_recycle_makes_id_available() {
    let pool = IdPool::new(3);
    let a = pool.assign();
    let b = pool.assign();
    let c = pool.assign();
    assert_eq!(pool.try_assign(), None);

    pool.recycle(b);
    assert_eq!(pool.try_assign(), Some(b));

    pool.recycle(a);
    pool.recycle(c);
    let mut again = vec![pool.assign(), pool.assign()];
    again.sort_unstable();
    let mut expected = vec![a, c];
    expected.sort_unstable();
    assert_eq!(again, expected);
}

/// 测试3: 单个 ID 的池
#[test]
fn test_single_id_pool() {
    let pool = IdPool::new(1);
    assert_eq!(pool.try_assign(), Some(0));
    assert_eq!(pool.try_assign(), None);
    pool.recycle(0);
    assert_eq!(pool.assign(), 0);
}

/// 测试4: 回收未分配的 ID 会 panic
#[test]
#[should_panic(expected = "is not currently assigned")]
fn test_recycle_unassigned_panics() {
    let pool = IdPool::new(2);
    pool.recycle(1);
}

/// 测试5: 回收超出范围的 ID 会 panic
#[test]
#[should_panic(expected = "was not assigned from this pool")]
fn test_recycle_out_of_range_panics() {
    let pool = IdPool::new(2);
    pool.recycle(2);
}

/// 测试6: 零个 ID 的池会 panic
#[test]
#[should_panic(expected = "at least one ID")]
fn test_empty_pool_panics() {
    let _pool = IdPool::new(0);
}

/// 测试7: 分配失败时返回 AllocError
#[test]
fn test_allocation_failure() {
    let result = IdPool::try_new_in(16, FailingAllocator);
    assert_eq!(result.err(), Some(AllocError { size: 16 }));
}

/// 测试8: 标志数组通过给定的分配器分配和释放
#[test]
fn test_flags_use_given_allocator() {
    let alloc = CountingAllocator::default();
    {
        let pool = IdPool::try_new_in(8, alloc.clone()).unwrap();
        assert_eq!(alloc.allocations(), 1);
        assert_eq!(pool.assign(), 0);
    }
    assert_eq!(alloc.deallocations(), 1);
}

/// 测试9: assign 在所有 ID 都被占用时等待回收
#[test]
fn test_assign_waits_for_recycle() {
    let pool = Arc::new(IdPool::new(1));
    let held = pool.assign();

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.assign())
    };

    thread::sleep(Duration::from_millis(20));
    pool.recycle(held);

    assert_eq!(waiter.join().unwrap(), held);
}

/// 测试10: 并发分配时同一 ID 不会同时被两个线程持有
#[test]
fn test_concurrent_exclusive_ids() {
    const IDS: usize = 4;
    const THREADS: usize = 8;
    const ROUNDS: usize = 2_000;

    let pool = IdPool::new(IDS);
    let in_use: Vec<AtomicBool> = (0..IDS).map(|_| AtomicBool::new(false)).collect();

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..ROUNDS {
                    let id = pool.assign();
                    assert!(id < pool.max_id());
                    assert!(
                        !in_use[id].swap(true, Ordering::SeqCst),
                        "ID {id} assigned twice"
                    );
                    in_use[id].store(false, Ordering::SeqCst);
                    pool.recycle(id);
                }
            });
        }
    });

    let mut ids: Vec<_> = (0..IDS).map(|_| pool.try_assign().unwrap()).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..IDS).collect::<Vec<_>>());
}
