use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nimbus_ipc::status::StatusRegion;
use nimbus_ipc::wake::{WorkerParker, PARK_TIMEOUT};

#[test]
fn wake_interrupts_a_parked_worker() {
    let woken = Arc::new(AtomicBool::new(false));
    let woken2 = woken.clone();

    let (tx, rx) = std::sync::mpsc::channel();
    let worker = std::thread::spawn(move || {
        let parker = WorkerParker::new();
        tx.send(parker.wake_handle()).unwrap();
        let start = Instant::now();
        // Park for far longer than the wake should take.
        parker.park_timeout(Duration::from_secs(10));
        woken2.store(true, SeqCst);
        start.elapsed()
    });

    let handle = rx.recv().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    handle.wake();

    let elapsed = worker.join().unwrap();
    assert!(woken.load(SeqCst));
    assert!(
        elapsed < Duration::from_millis(500),
        "wake took {elapsed:?}"
    );
}

#[test]
fn wake_before_park_is_not_lost() {
    let parker = WorkerParker::new();
    parker.wake_handle().wake();
    let start = Instant::now();
    parker.park_timeout(Duration::from_secs(10));
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn stop_request_observed_within_one_park_cycle() {
    let status = Arc::new(StatusRegion::new());
    let status2 = status.clone();

    let (tx, rx) = std::sync::mpsc::channel();
    let worker = std::thread::spawn(move || {
        let parker = WorkerParker::new();
        tx.send(parker.wake_handle()).unwrap();
        let start = Instant::now();
        loop {
            if status2.stop_requested() {
                return start.elapsed();
            }
            parker.park_timeout(PARK_TIMEOUT);
        }
    });

    let handle = rx.recv().unwrap();
    std::thread::sleep(Duration::from_millis(10));
    status.request_stop();
    handle.wake();

    let elapsed = worker.join().unwrap();
    assert!(
        elapsed < Duration::from_millis(500),
        "stop observed after {elapsed:?}"
    );
}
