//! Fault requests and the queue pagers take them from.
//!
//! A faulting process parks its request in the slot for its pid, pushes the
//! pid onto a shared queue and blocks on its private reply channel. Releasing
//! the queue wakes every idle pager with a "released" status, which is how
//! the pool is drained on shutdown.

use std::sync::{
    mpsc::{self, Receiver, Sender, SyncSender},
    Arc, Mutex,
};

use log::debug;

use crate::{Pid, Result, VmError};

#[derive(Debug)]
pub struct FaultRequest {
    pub pid: Pid,
    /// Offset into the virtual region that missed.
    pub offset: usize,
    pub reply: SyncSender<Result<()>>,
}

#[derive(Debug)]
struct Slots {
    requests: Vec<Option<FaultRequest>>,
    halted: Option<String>,
}

/// Outcome of a pager waiting for work.
#[derive(Debug)]
pub enum Dispatch {
    Request(FaultRequest),
    /// The queue was released; the pager should exit.
    Released,
    /// The request was dropped because the subsystem halted.
    Dropped,
}

#[derive(Debug)]
pub struct FaultQueue {
    sender: Mutex<Option<Sender<Pid>>>,
    receiver: Arc<Mutex<Receiver<Pid>>>,
    slots: Mutex<Slots>,
}

impl FaultQueue {
    pub fn new(processes: usize) -> Self {
        let (sender, receiver) = mpsc::channel();
        FaultQueue {
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(Mutex::new(receiver)),
            slots: Mutex::new(Slots {
                requests: (0..processes).map(|_| None).collect(),
                halted: None,
            }),
        }
    }

    /// Records a fault and wakes a pager. Returns the channel the answer will
    /// arrive on.
    pub fn submit(&self, pid: Pid, offset: usize) -> Result<Receiver<Result<()>>> {
        let (reply, answer) = mpsc::sync_channel(1);
        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(cause) = &slots.halted {
                return Err(VmError::Halted(cause.clone()));
            }
            let index = pid % slots.requests.len();
            assert!(
                slots.requests[index].is_none(),
                "pid {} already has a fault outstanding",
                pid
            );
            slots.requests[index] = Some(FaultRequest { pid, offset, reply });
        }

        let sent = match self.sender.lock().unwrap().as_ref() {
            Some(sender) => sender.send(pid).is_ok(),
            None => false,
        };
        if !sent {
            self.take(pid);
            return Err(VmError::NotStarted);
        }
        debug!("pid {} faulted at offset {:#x}", pid, offset);
        Ok(answer)
    }

    /// Blocks until a fault is queued or the queue is released.
    pub fn next(&self) -> Dispatch {
        let pid = match self.receiver.lock().unwrap().recv() {
            Ok(pid) => pid,
            Err(_) => return Dispatch::Released,
        };
        match self.take(pid) {
            Some(request) => Dispatch::Request(request),
            None => Dispatch::Dropped,
        }
    }

    fn take(&self, pid: Pid) -> Option<FaultRequest> {
        let mut slots = self.slots.lock().unwrap();
        let index = pid % slots.requests.len();
        slots.requests[index].take()
    }

    /// Wakes every idle pager with the released status and fails every fault
    /// still waiting for one.
    pub fn release(&self) {
        self.sender.lock().unwrap().take();
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.requests.iter_mut() {
            slot.take();
        }
    }

    /// Refuses all further faults and fails the pending ones with `cause`.
    pub fn halt(&self, cause: String) {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.requests.iter_mut() {
            if let Some(request) = slot.take() {
                let _ = request.reply.send(Err(VmError::Halted(cause.clone())));
            }
        }
        slots.halted.get_or_insert(cause);
    }

    pub fn halt_cause(&self) -> Option<String> {
        self.slots.lock().unwrap().halted.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn request_reaches_pager_and_reply_comes_back() {
        let queue = Arc::new(FaultQueue::new(4));
        let answer = queue.submit(2, 0x40).unwrap();

        let pager = {
            let queue = queue.clone();
            thread::spawn(move || match queue.next() {
                Dispatch::Request(request) => {
                    assert_eq!(request.pid, 2);
                    assert_eq!(request.offset, 0x40);
                    request.reply.send(Ok(())).unwrap();
                }
                other => panic!("unexpected dispatch {:?}", other),
            })
        };
        assert!(answer.recv().unwrap().is_ok());
        pager.join().unwrap();
    }

    #[test]
    #[should_panic]
    fn second_outstanding_fault_is_a_bug() {
        let queue = FaultQueue::new(4);
        let _first = queue.submit(1, 0).unwrap();
        let _second = queue.submit(1, 8);
    }

    #[test]
    fn release_wakes_pagers() {
        let queue = Arc::new(FaultQueue::new(2));
        let pagers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || matches!(queue.next(), Dispatch::Released))
            })
            .collect();
        queue.release();
        for pager in pagers {
            assert!(pager.join().unwrap());
        }
        assert!(matches!(queue.submit(0, 0), Err(VmError::NotStarted)));
    }

    #[test]
    fn release_fails_waiting_faults() {
        let queue = FaultQueue::new(2);
        let answer = queue.submit(1, 0).unwrap();
        queue.release();
        assert!(answer.recv().is_err());
    }

    #[test]
    fn halt_fails_pending_and_future_faults() {
        let queue = FaultQueue::new(2);
        let answer = queue.submit(0, 0).unwrap();
        queue.halt(String::from("disk on fire"));
        assert!(matches!(answer.recv().unwrap(), Err(VmError::Halted(_))));
        assert!(matches!(queue.next(), Dispatch::Dropped));
        assert!(matches!(queue.submit(1, 0), Err(VmError::Halted(cause)) if cause == "disk on fire"));
        assert_eq!(queue.halt_cause().as_deref(), Some("disk on fire"));
    }
}
