//! Bus ownership and request traffic from several threads at once.

use at91mci::{BLOCK_SIZE, BridgeError, Completion, Request, SocVariant};
use mci_test_helpers::{Rig, SimController, pattern, read_block, write_block};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn submit_retrying(controller: &SimController, mut request: Request) -> Completion {
    loop {
        match controller.submit(request) {
            Ok(completion) => return completion,
            Err(rejected) => {
                assert_eq!(rejected.reason, BridgeError::Busy);
                request = rejected.request;
                thread::yield_now();
            }
        }
    }
}

#[test]
fn test_acquire_waits_for_release() {
    let rig = Rig::new(SocVariant::Sam9260);
    rig.controller.acquire_host();

    let acquired = Arc::new(AtomicBool::new(false));
    let waiter = {
        let controller = Arc::clone(&rig.controller);
        let acquired = Arc::clone(&acquired);
        thread::spawn(move || {
            controller.acquire_host();
            acquired.store(true, Ordering::Release);
            controller.release_host();
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!acquired.load(Ordering::Acquire));

    rig.controller.release_host();
    waiter.join().expect("waiter panicked");
    assert!(acquired.load(Ordering::Acquire));
}

#[test]
fn test_host_ownership_is_exclusive() {
    let rig = Rig::new(SocVariant::Sam9260);
    let inside = Arc::new(AtomicBool::new(false));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let controller = Arc::clone(&rig.controller);
            let inside = Arc::clone(&inside);
            thread::spawn(move || {
                for _ in 0..5 {
                    controller.acquire_host();
                    assert!(!inside.swap(true, Ordering::AcqRel));
                    thread::sleep(Duration::from_millis(1));
                    inside.store(false, Ordering::Release);
                    controller.release_host();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }
}

#[test]
fn test_concurrent_submitters() {
    let rig = Rig::selected(SocVariant::Sam9260);
    let _irq = rig.interrupt_thread();

    let workers: Vec<_> = (0..4u32)
        .map(|id| {
            let controller = Arc::clone(&rig.controller);
            thread::spawn(move || {
                for i in 0..6u32 {
                    let lba = id * 16 + i;
                    let block = pattern(BLOCK_SIZE, (lba as u8).wrapping_mul(13));

                    let done = submit_retrying(&controller, write_block(lba, block.clone()))
                        .wait_timeout(WAIT)
                        .expect("abandoned")
                        .expect("write stalled");
                    assert_eq!(done.result(), Ok(()));
                    assert!(controller.mapped_count() <= 1);

                    let done = submit_retrying(&controller, read_block(lba))
                        .wait_timeout(WAIT)
                        .expect("abandoned")
                        .expect("read stalled");
                    assert_eq!(done.result(), Ok(()));
                    assert_eq!(done.cmd.data.expect("data").buf, block);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    assert!(!rig.controller.is_busy());
    assert_eq!(rig.controller.mapped_count(), 0);
    assert_eq!(rig.sim.mapped(), 0);
}

#[test]
fn test_completion_waits_for_interrupts() {
    let rig = Rig::selected(SocVariant::Sam9260);
    let completion = rig.submit(read_block(0));

    assert_eq!(completion.try_wait(), Ok(None));
    assert_eq!(
        completion.wait_timeout(Duration::from_millis(20)),
        Ok(None)
    );

    let _irq = rig.interrupt_thread();
    let done = completion.wait().expect("abandoned");
    assert_eq!(done.result(), Ok(()));
}

#[test]
fn test_dropped_completion_frees_controller() {
    let rig = Rig::selected(SocVariant::Sam9260);
    drop(rig.submit(read_block(0)));
    rig.service();

    assert!(!rig.controller.is_busy());
    assert_eq!(rig.controller.mapped_count(), 0);
    assert_eq!(rig.run(read_block(1)).result(), Ok(()));
}
