mod common;

use std::sync::atomic::Ordering;

use common::{ids, rig, write};
use pcidrv::{CompletionStatus, DriverError, HwError, RequestId, SendDisposition};

#[test]
fn test_four_tcbs_six_sends() {
    let r = rig(4, 4, 8);

    for id in 1..=6 {
        let disposition = r.device.send(write(id, 64, &r.writes)).unwrap();
        if id <= 4 {
            assert_eq!(disposition, SendDisposition::Accepted((id - 1) as u16));
        } else {
            assert_eq!(disposition, SendDisposition::Deferred);
        }
    }

    let c = r.device.send_counters();
    assert_eq!(c.busy, 4);
    assert_eq!(c.waiting, 2);
    assert_eq!(c.active, 4);
    assert_eq!(c.free_tcbs, 0);

    assert_eq!(r.device.complete_send(Ok(())).unwrap(), Some(RequestId(1)));
    assert_eq!(r.device.complete_send(Ok(())).unwrap(), Some(RequestId(2)));

    let c = r.device.send_counters();
    assert_eq!(c.busy, 4);
    assert_eq!(c.waiting, 0);
    assert_eq!(c.completed, 2);

    // Drained requests were submitted in their arrival order.
    let submitted: Vec<u8> = r
        .hw
        .submitted()
        .iter()
        .map(|d| r.hw.tcb_bytes(d)[0])
        .collect();
    assert_eq!(submitted, [1, 2, 3, 4, 5, 6]);
    assert_eq!(ids(&r.writes), [1, 2]);
}

#[test]
fn test_completions_are_fifo() {
    let r = rig(8, 4, 8);
    for id in 10..15 {
        r.device.send(write(id, 100, &r.writes)).unwrap();
    }
    while r.device.complete_send(Ok(())).unwrap().is_some() {}

    assert_eq!(ids(&r.writes), [10, 11, 12, 13, 14]);
    let c = r.device.send_counters();
    assert_eq!(c.busy, 0);
    assert_eq!(c.active, 0);
    assert_eq!(c.free_tcbs, 8);
    assert_eq!(r.device.stats().bytes_transmitted, 500);
}

#[test]
fn test_payload_copied_into_tcb_buffer() {
    let r = rig(2, 4, 8);
    let payload: Vec<u8> = (0..200u8).collect();
    r.device
        .send(Box::new(common::TestWrite {
            id: RequestId(1),
            payload: payload.clone(),
            log: r.writes.clone(),
        }))
        .unwrap();

    let desc = r.hw.submitted()[0];
    assert_eq!(desc.len, 200);
    assert_eq!(r.hw.tcb_bytes(&desc), payload);
}

#[test]
fn test_cancel_waiting_request() {
    let r = rig(1, 4, 8);
    r.device.send(write(1, 60, &r.writes)).unwrap();
    r.device.send(write(2, 60, &r.writes)).unwrap();
    r.device.send(write(3, 60, &r.writes)).unwrap();
    let before = r.device.send_counters();

    r.device.cancel_send(RequestId(2)).unwrap();

    let after = r.device.send_counters();
    assert_eq!(after.cancelled, before.cancelled + 1);
    assert_eq!(after.waiting, before.waiting - 1);
    assert_eq!(after.active, before.active);
    assert_eq!(after.busy, before.busy);
    assert_eq!(
        r.writes.lock().unwrap().as_slice(),
        [(RequestId(2), Err(CompletionStatus::Cancelled))]
    );

    // The remaining waiter still gets the next free TCB.
    r.device.complete_send(Ok(())).unwrap();
    assert_eq!(r.hw.submitted().len(), 2);
    assert_eq!(r.hw.tcb_bytes(&r.hw.submitted()[1])[0], 3);
}

#[test]
fn test_cancel_in_flight_rejected() {
    let r = rig(2, 4, 8);
    r.device.send(write(1, 60, &r.writes)).unwrap();

    assert_eq!(
        r.device.cancel_send(RequestId(1)),
        Err(DriverError::InFlight(RequestId(1)))
    );
    assert_eq!(
        r.device.cancel_send(RequestId(99)),
        Err(DriverError::RequestNotFound(RequestId(99)))
    );
    assert_eq!(r.device.send_counters().cancelled, 0);
    assert!(r.writes.lock().unwrap().is_empty());
}

#[test]
fn test_hardware_error_surfaces_as_status() {
    let r = rig(2, 4, 8);
    r.device.send(write(1, 60, &r.writes)).unwrap();
    r.device.send(write(2, 60, &r.writes)).unwrap();

    r.device.complete_send(Err(HwError::Fault(3))).unwrap();
    r.device.complete_send(Ok(())).unwrap();

    let log = r.writes.lock().unwrap().clone();
    assert_eq!(log[0], (RequestId(1), Err(CompletionStatus::HardwareError)));
    assert_eq!(log[1], (RequestId(2), Ok(60)));
    assert_eq!(r.device.stats().hw_err_count, 1);
    assert_eq!(r.device.stats().bytes_transmitted, 60);
}

#[test]
fn test_oversized_send_rejected_without_queuing() {
    let r = rig(1, 4, 8);
    let too_big = r.device.config().tcb_buffer_size + 1;

    let disposition = r.device.send(write(1, too_big, &r.writes)).unwrap();
    assert_eq!(
        disposition,
        SendDisposition::Rejected(CompletionStatus::InvalidBufferSize)
    );
    let c = r.device.send_counters();
    assert_eq!((c.busy, c.waiting), (0, 0));
    assert_eq!(
        r.writes.lock().unwrap().as_slice(),
        [(RequestId(1), Err(CompletionStatus::InvalidBufferSize))]
    );
}

#[test]
fn test_submit_failure_returns_tcb() {
    let r = rig(1, 4, 8);
    r.hw.fail_submit.store(true, Ordering::SeqCst);

    let disposition = r.device.send(write(1, 60, &r.writes)).unwrap();
    assert_eq!(
        disposition,
        SendDisposition::Rejected(CompletionStatus::HardwareError)
    );
    let c = r.device.send_counters();
    assert_eq!(c.free_tcbs, 1);
    assert_eq!(c.busy, 0);
    assert_eq!(r.device.stats().hw_err_count, 1);

    r.hw.fail_submit.store(false, Ordering::SeqCst);
    assert_eq!(
        r.device.send(write(2, 60, &r.writes)).unwrap(),
        SendDisposition::Accepted(0)
    );
}

#[test]
fn test_spurious_completion_is_harmless() {
    let r = rig(1, 4, 8);
    assert_eq!(r.device.complete_send(Ok(())).unwrap(), None);
    assert_eq!(r.device.send_counters().busy, 0);
}

#[test]
fn test_concurrent_senders_and_completer() {
    use std::sync::atomic::AtomicBool;

    let r = rig(4, 4, 8);
    let done = AtomicBool::new(false);
    let total = 4 * 50;

    std::thread::scope(|s| {
        for t in 0..4u64 {
            let r = &r;
            s.spawn(move || {
                for i in 0..50 {
                    r.device.send(write(t * 1000 + i, 64, &r.writes)).unwrap();
                }
            });
        }
        s.spawn(|| {
            // Interrupt side: retire whatever is in flight until all are done.
            while !done.load(Ordering::SeqCst) {
                let _ = r.device.complete_send(Ok(()));
                if r.writes.lock().unwrap().len() == total {
                    done.store(true, Ordering::SeqCst);
                }
                std::thread::yield_now();
            }
        });
    });

    let c = r.device.send_counters();
    assert_eq!(c.completed, total);
    assert_eq!((c.busy, c.waiting, c.active), (0, 0, 0));
    assert_eq!(c.free_tcbs, 4);
    assert_eq!(r.device.stats().bytes_transmitted, (total * 64) as u64);
}
