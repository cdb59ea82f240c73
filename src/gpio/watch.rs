// Copyright (c) 2017-2018 Rene van der Meer
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
// THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error};
use parking_lot::{Condvar, Mutex};

use crate::gpio::interrupt::{self, Notice};
use crate::gpio::{Error, Result};

#[derive(Debug)]
struct SlotState {
    pending: Option<Instant>,
    cancelled: bool,
}

// Single-slot mailbox for the most recent edge timestamp of one armed pin.
// Timestamps older than `armed_at` are discarded.
#[derive(Debug)]
pub(crate) struct EdgeSlot {
    armed_at: Instant,
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl EdgeSlot {
    pub(crate) fn new(armed_at: Instant) -> EdgeSlot {
        EdgeSlot {
            armed_at,
            state: Mutex::new(SlotState {
                pending: None,
                cancelled: false,
            }),
            cond: Condvar::new(),
        }
    }

    // Stores `timestamp`, replacing any unconsumed one.
    pub(crate) fn push(&self, timestamp: Instant) {
        let mut state = self.state.lock();
        if state.cancelled {
            return;
        }

        state.pending = Some(timestamp);
        self.cond.notify_one();
    }

    // Drops any pending edge, and wakes up every blocked waiter. Waiters
    // return false from then on.
    pub(crate) fn cancel(&self) {
        let mut state = self.state.lock();
        state.pending = None;
        state.cancelled = true;
        self.cond.notify_all();
    }

    // Blocks until a fresh edge is available. A timeout of None waits
    // indefinitely, Duration::ZERO only checks for a pending edge. A timeout
    // too large to be represented as a deadline also waits indefinitely.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut state = self.state.lock();

        loop {
            if state.cancelled {
                return false;
            }

            if let Some(timestamp) = state.pending.take() {
                if timestamp >= self.armed_at {
                    return true;
                }

                // Stale. Keep waiting for the next one.
                continue;
            }

            match deadline {
                None => self.cond.wait(&mut state),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return false;
                    }

                    // A timed-out wait is checked on the next iteration, so an
                    // edge that arrives at the deadline isn't lost.
                    let _ = self.cond.wait_until(&mut state, deadline);
                }
            }
        }
    }
}

// Background thread that registers a value descriptor with the EventLoop and
// forwards its notifications to an EdgeSlot, until cancelled.
pub(crate) struct Listener {
    fd: RawFd,
    cancel: Sender<Notice>,
    listen_thread: Option<thread::JoinHandle<Result<()>>>,
}

impl Listener {
    pub(crate) fn spawn(
        name: &str,
        fd: RawFd,
        event_mask: i32,
        slot: Arc<EdgeSlot>,
    ) -> Result<Listener> {
        let event_loop = interrupt::event_loop()?;

        let (tx, rx) = mpsc::channel();
        let (started_tx, started_rx) = mpsc::sync_channel(1);
        let cancel = tx.clone();

        let listen_thread = thread::Builder::new()
            .name(format!("{}-edge", name))
            .spawn(move || -> Result<()> {
                if let Err(e) = event_loop.add_fd(fd, tx, event_mask) {
                    let _ = started_tx.send(Err(e));
                    return Ok(());
                }
                let _ = started_tx.send(Ok(()));

                for notice in rx.iter() {
                    match notice {
                        Notice::Ready(timestamp) => slot.push(timestamp),
                        Notice::Cancel => break,
                    }
                }

                event_loop.remove_fd(fd)
            })?;

        let mut listener = Listener {
            fd,
            cancel,
            listen_thread: Some(listen_thread),
        };

        match started_rx.recv() {
            Ok(Ok(())) => {
                debug!("{}: watching fd {}", name, fd);
                Ok(listener)
            }
            Ok(Err(e)) => {
                listener.join()?;
                Err(e)
            }
            Err(_) => {
                listener.join()?;
                Err(Error::ThreadPanic)
            }
        }
    }

    // Stops the thread, and waits until it has unregistered the descriptor.
    pub(crate) fn stop(&mut self) -> Result<()> {
        let _ = self.cancel.send(Notice::Cancel);

        self.join()
    }

    fn join(&mut self) -> Result<()> {
        if let Some(listen_thread) = self.listen_thread.take() {
            match listen_thread.join() {
                Ok(r) => return r,
                Err(_) => return Err(Error::ThreadPanic),
            }
        }

        Ok(())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Failed to stop edge listener for fd {}: {}", self.fd, e);
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("fd", &self.fd)
            .field("listen_thread", &self.listen_thread)
            .finish()
    }
}
