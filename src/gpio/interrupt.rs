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

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::gpio::epoll::{epoll_event, Epoll, EventFd, EPOLLERR, EPOLLET, EPOLLIN};
use crate::gpio::{Error, Result};

// Max. number of ready descriptors handled per epoll_wait() call.
const MAX_EVENTS: usize = 32;

// Delay before retrying a failed epoll_wait(), doubled for every consecutive
// failure up to the max.
const RETRY_DELAY: Duration = Duration::from_millis(1);
const RETRY_DELAY_MAX: Duration = Duration::from_secs(1);

fn retry_delay(failures: u32) -> Duration {
    RETRY_DELAY
        .checked_mul(1 << failures.saturating_sub(1).min(16))
        .map_or(RETRY_DELAY_MAX, |delay| delay.min(RETRY_DELAY_MAX))
}

// Messages delivered to the channel of a watched descriptor.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) enum Notice {
    // Descriptor became ready. All descriptors reported by the same
    // epoll_wait() call share one timestamp.
    Ready(Instant),
    // Injected by the owner of the channel to stop its listener.
    Cancel,
}

// Multiplexes any number of edge-triggered descriptors onto a single epoll
// instance. Only the loop thread ever blocks in epoll_wait().
pub(crate) struct EventLoop {
    poll: Epoll,
    wake: EventFd,
    // Held for the duration of an add/remove, so a single change is in flight
    // and each wake-up is acknowledged exactly once.
    ack: Mutex<Receiver<Notice>>,
    channels: Mutex<HashMap<RawFd, Sender<Notice>>>,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("poll", &self.poll)
            .field("wake", &self.wake)
            .field("channels", &format_args!("{{ .. }}"))
            .finish()
    }
}

static EVENT_LOOP: OnceLock<EventLoop> = OnceLock::new();
static READY: AtomicBool = AtomicBool::new(false);
static INIT: Mutex<()> = parking_lot::const_mutex(());

// Returns the process-wide EventLoop, creating it and starting its thread on
// first use. There's no teardown. The loop lives as long as the process.
pub(crate) fn event_loop() -> Result<&'static EventLoop> {
    if READY.load(Ordering::Acquire) {
        if let Some(event_loop) = EVENT_LOOP.get() {
            return Ok(event_loop);
        }
    }

    let _guard = INIT.lock();
    if READY.load(Ordering::Acquire) {
        return EVENT_LOOP.get().ok_or(Error::NotInitialized);
    }

    if EVENT_LOOP.get().is_none() {
        let _ = EVENT_LOOP.set(EventLoop::new()?);
    }
    let event_loop = EVENT_LOOP.get().ok_or(Error::NotInitialized)?;

    thread::Builder::new()
        .name("gpio-events".to_string())
        .spawn(move || event_loop.run())?;

    READY.store(true, Ordering::Release);

    Ok(event_loop)
}

impl EventLoop {
    fn new() -> Result<EventLoop> {
        let poll = Epoll::new()?;
        let wake = EventFd::new()?;
        let (ack_tx, ack_rx) = mpsc::channel();

        poll.add(wake.fd(), wake.fd() as u64, EPOLLERR | EPOLLET | EPOLLIN)?;

        let mut channels = HashMap::new();
        channels.insert(wake.fd(), ack_tx);

        Ok(EventLoop {
            poll,
            wake,
            ack: Mutex::new(ack_rx),
            channels: Mutex::new(channels),
        })
    }

    // Starts watching `fd` for `event_mask`, and sends a Notice::Ready to
    // `channel` every time it triggers. Returns after the loop has picked up
    // the change.
    pub(crate) fn add_fd(&self, fd: RawFd, channel: Sender<Notice>, event_mask: i32) -> Result<()> {
        let ack = self.ack.lock();

        {
            let mut channels = self.channels.lock();
            if channels.contains_key(&fd) {
                return Err(Error::Io(io::Error::from_raw_os_error(libc::EEXIST)));
            }

            self.poll.add(fd, fd as u64, event_mask)?;
            channels.insert(fd, channel);
        }

        self.sync(&ack)
    }

    // Stops watching `fd`, and drops its channel. Returns after the loop has
    // picked up the change.
    pub(crate) fn remove_fd(&self, fd: RawFd) -> Result<()> {
        let ack = self.ack.lock();

        let removed = {
            let mut channels = self.channels.lock();
            let removed = self.poll.delete(fd);
            channels.remove(&fd);
            removed
        };

        self.sync(&ack)?;

        removed.map_err(Error::Io)
    }

    #[cfg(test)]
    pub(crate) fn is_watching(&self, fd: RawFd) -> bool {
        self.channels.lock().contains_key(&fd)
    }

    // Wakes up the loop, and waits until it has completed an iteration.
    fn sync(&self, ack: &Receiver<Notice>) -> Result<()> {
        self.wake.notify()?;

        ack.recv().map(|_| ()).map_err(|_| Error::ThreadPanic)
    }

    fn run(&self) {
        let mut events = [epoll_event { events: 0, u64: 0 }; MAX_EVENTS];
        let mut ready: Vec<Sender<Notice>> = Vec::with_capacity(MAX_EVENTS);
        let mut failures: u32 = 0;

        loop {
            let num_events = match self.poll.wait(&mut events, None) {
                Ok(num_events) => {
                    if failures > 0 {
                        debug!("epoll_wait recovered after {} failure(s)", failures);
                        failures = 0;
                    }
                    num_events
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    if failures == 1 {
                        warn!("epoll_wait failed: {}", e);
                    } else {
                        trace!("epoll_wait failed ({} in a row): {}", failures, e);
                    }

                    thread::sleep(retry_delay(failures));
                    continue;
                }
            };

            let now = Instant::now();

            {
                let channels = self.channels.lock();
                for event in &events[0..num_events] {
                    let fd = event.u64 as RawFd;

                    if fd == self.wake.fd() {
                        if let Err(e) = self.wake.clear() {
                            warn!("Failed to reset wake-up descriptor: {}", e);
                        }
                    }

                    // A descriptor may have been removed after epoll_wait()
                    // returned. Nothing to deliver in that case.
                    if let Some(channel) = channels.get(&fd) {
                        ready.push(channel.clone());
                    }
                }
            }

            trace!("{} descriptor(s) ready", ready.len());

            // Deliver outside the lock. A receiver that has gone away is
            // cleaned up by its remove_fd().
            for channel in ready.drain(..) {
                let _ = channel.send(Notice::Ready(now));
            }
        }
    }
}
