use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use otbr_agent_rs::{MainloopManager, TaskRunner};

fn new_runner(manager: &mut MainloopManager) -> Arc<TaskRunner> {
    let runner = Arc::new(TaskRunner::new().expect("Failed to create task runner"));
    manager.add_processor(Rc::new(RefCell::new(runner.clone())));
    runner
}

#[test]
fn test_single_thread_nested_posts() {
    let mut manager = MainloopManager::new();
    let runner = new_runner(&mut manager);
    let breaker = manager.breaker();
    let counter = Arc::new(AtomicUsize::new(0));

    let counter1 = counter.clone();
    let runner1 = runner.clone();
    runner.post(move || {
        counter1.fetch_add(1, Ordering::SeqCst);
        let counter2 = counter1.clone();
        let runner2 = runner1.clone();
        let breaker2 = breaker.clone();
        runner1.post(move || {
            counter2.fetch_add(1, Ordering::SeqCst);
            let counter3 = counter2.clone();
            let breaker3 = breaker2.clone();
            runner2.post(move || {
                counter3.fetch_add(1, Ordering::SeqCst);
                breaker3.break_mainloop();
            });
        });
    });

    manager.run(Duration::from_secs(10)).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[test]
fn test_tasks_run_in_posting_order() {
    let mut manager = MainloopManager::new();
    let runner = new_runner(&mut manager);
    let breaker = manager.breaker();
    let order = Arc::new(Mutex::new(String::new()));

    let o = order.clone();
    runner.post(move || o.lock().unwrap().push('a'));
    let o = order.clone();
    runner.post(move || o.lock().unwrap().push('b'));
    let o = order.clone();
    runner.post(move || {
        o.lock().unwrap().push('c');
        breaker.break_mainloop();
    });

    manager.run(Duration::from_secs(10)).unwrap();
    assert_eq!(order.lock().unwrap().as_str(), "abc");
}

#[test]
fn test_smaller_delays_run_earlier() {
    let mut manager = MainloopManager::new();
    let runner = new_runner(&mut manager);
    let breaker = manager.breaker();
    let order = Arc::new(Mutex::new(String::new()));

    let o = order.clone();
    runner.post_delayed(Duration::from_millis(20), move || o.lock().unwrap().push('a'));
    let o = order.clone();
    runner.post_delayed(Duration::from_millis(10), move || o.lock().unwrap().push('b'));
    let o = order.clone();
    runner.post_delayed(Duration::from_millis(20), move || {
        o.lock().unwrap().push('c');
        breaker.break_mainloop();
    });

    manager.run(Duration::from_secs(10)).unwrap();
    assert_eq!(order.lock().unwrap().as_str(), "bac");
}

#[test]
fn test_posts_from_multiple_threads() {
    let mut manager = MainloopManager::new();
    let runner = new_runner(&mut manager);
    let breaker = manager.breaker();
    let counter = Arc::new(AtomicUsize::new(0));
    let mut threads = Vec::new();

    for _ in 0..10 {
        let runner = runner.clone();
        let counter = counter.clone();
        let breaker = breaker.clone();
        threads.push(thread::spawn(move || {
            runner.post(move || {
                if counter.fetch_add(1, Ordering::SeqCst) + 1 == 10 {
                    breaker.break_mainloop();
                }
            });
        }));
    }

    manager.run(Duration::from_secs(10)).unwrap();
    for handle in threads {
        handle.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 10);
}

#[test]
fn test_post_and_wait_returns_task_value() {
    let mut manager = MainloopManager::new();
    let runner = new_runner(&mut manager);
    let breaker = manager.breaker();
    let counter = Arc::new(AtomicI32::new(0));
    let total = Arc::new(AtomicI32::new(0));
    let mut threads = Vec::new();

    for _ in 0..10 {
        let runner = runner.clone();
        let counter = counter.clone();
        let total = total.clone();
        let breaker = breaker.clone();
        threads.push(thread::spawn(move || {
            let value = runner
                .post_and_wait(move || {
                    let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if value == 10 {
                        breaker.break_mainloop();
                    }
                    value
                })
                .unwrap();
            total.fetch_add(value, Ordering::SeqCst);
        }));
    }

    manager.run(Duration::from_secs(10)).unwrap();
    for handle in threads {
        handle.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 10);
    assert_eq!(total.load(Ordering::SeqCst), 55);
}

#[test]
fn test_break_before_run_latches() {
    let mut manager = MainloopManager::new();
    let _runner = new_runner(&mut manager);

    manager.breaker().break_mainloop();

    let start = Instant::now();
    manager.run(Duration::from_secs(30)).unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_delayed_task_runs_exactly_once() {
    let mut manager = MainloopManager::new();
    let runner = new_runner(&mut manager);
    let breaker = manager.breaker();
    let counter = Arc::new(AtomicUsize::new(0));

    let c = counter.clone();
    runner.post_delayed(Duration::from_millis(10), move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    runner.post_delayed(Duration::from_millis(100), move || {
        breaker.break_mainloop();
    });

    manager.run(Duration::from_secs(10)).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
