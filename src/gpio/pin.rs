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
use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;

use crate::gpio::sysfs::{self, Export};
use crate::gpio::watch::{EdgeSlot, Listener};
use crate::gpio::{Edge, Error, Level, Mode, Pull, Result};

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
enum Direction {
    Unknown,
    In,
    Out,
}

// An armed edge watch. The listener is registered with the EventLoop for
// the pin's value descriptor, and feeds the slot.
#[derive(Debug)]
struct Watch {
    slot: Arc<EdgeSlot>,
    listener: Listener,
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.slot.cancel();
    }
}

#[derive(Debug)]
struct PinState {
    direction: Direction,
    edge: Edge,
    // Only set once the line has been exported and opened.
    direction_file: Option<File>,
    edge_file: Option<File>,
    // edge != Edge::None iff watch is set.
    watch: Option<Watch>,
    open_error: Option<Error>,
}

/// A GPIO line controlled through its sysfs pseudo-files.
///
/// `Pin`s are retrieved from [`Sysfs::pin`]. The line is exported and its
/// pseudo-files are opened the first time the pin is configured or read.
/// If that fails, the same error is returned by every subsequent call,
/// without touching the filesystem again.
///
/// [`Sysfs::pin`]: struct.Sysfs.html#method.pin
pub struct Pin {
    number: u32,
    name: String,
    root: PathBuf,
    export: Arc<Export>,
    edge_events: i32,
    // Opened once, and never replaced, so read() can skip the lock.
    value: OnceLock<File>,
    state: Mutex<PinState>,
}

impl Pin {
    pub(crate) fn new(number: u32, sysfs_root: &Path, export: Arc<Export>, edge_events: i32) -> Pin {
        Pin {
            number,
            name: format!("GPIO{}", number),
            root: sysfs_root.join(format!("gpio{}", number)),
            export,
            edge_events,
            value: OnceLock::new(),
            state: Mutex::new(PinState {
                direction: Direction::Unknown,
                edge: Edge::None,
                direction_file: None,
                edge_file: None,
                watch: None,
                open_error: None,
            }),
        }
    }

    /// Returns the GPIO number.
    #[inline]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Returns the pin's name, `GPIO<number>`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the pin's mode, as reported by its `direction` pseudo-file.
    pub fn mode(&self) -> Result<Mode> {
        let mut state = self.state.lock();
        self.open(&mut state)?;

        let mut buffer = [0u8; 8];
        let len = match state.direction_file {
            Some(ref file) => sysfs::seek_read(file, &mut buffer)?,
            None => return Err(Error::NotInitialized),
        };

        let mode = sysfs::parse_mode(&buffer[..len]).ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: unexpected direction {:?}", self.name, &buffer[..len]),
            ))
        })?;

        state.direction = match mode {
            Mode::Input => Direction::In,
            Mode::Output => Direction::Out,
        };

        Ok(mode)
    }

    /// Returns the currently armed edge condition.
    pub fn edge(&self) -> Edge {
        self.state.lock().edge
    }

    /// Returns the pull resistor state, which sysfs can't report.
    #[inline]
    pub fn pull(&self) -> Pull {
        Pull::NoChange
    }

    /// Returns the pull resistor state after reset, which sysfs can't report.
    #[inline]
    pub fn default_pull(&self) -> Pull {
        Pull::NoChange
    }

    /// Configures the pin as an input, and arms or disarms edge detection.
    ///
    /// `pull` must be [`Pull::Float`] or [`Pull::NoChange`]. Anything else
    /// returns `Err(`[`Error::InvalidConfiguration`]`)`.
    ///
    /// An `edge` other than [`Edge::None`] replaces any previously armed watch,
    /// waking up its waiters. Edges that occurred before this call returns
    /// aren't reported by [`wait_for_edge`].
    ///
    /// [`wait_for_edge`]: #method.wait_for_edge
    pub fn set_input(&self, pull: Pull, edge: Edge) -> Result<()> {
        if pull != Pull::Float && pull != Pull::NoChange {
            return Err(Error::InvalidConfiguration(format!(
                "{} can't be configured with pull {}",
                self.name, pull
            )));
        }

        let mut state = self.state.lock();
        self.open(&mut state)?;

        if state.direction != Direction::In {
            self.write_direction(&mut state, sysfs::direction_bytes(Mode::Input))?;
            state.direction = Direction::In;
        }

        if edge == Edge::None {
            return self.halt_edge(&mut state);
        }

        if state.edge_file.is_none() {
            state.edge_file = Some(sysfs::open_rw(&self.root.join("edge"))?);
        }

        // The old watch is gone even if its listener failed to retire cleanly.
        if let Err(e) = self.cancel_wait(&mut state) {
            let _ = self.write_edge(&mut state, Edge::None);
            state.edge = Edge::None;
            return Err(e);
        }

        let value = self.value.get().ok_or(Error::NotInitialized)?;

        // Reading the value clears the kernel's changed flag, so a stale
        // trigger doesn't fire as soon as the descriptor is registered.
        let mut buffer = [0u8; 4];
        let _ = sysfs::seek_read(value, &mut buffer);

        let slot = Arc::new(EdgeSlot::new(Instant::now()));
        let listener = match Listener::spawn(
            &self.name,
            value.as_raw_fd(),
            self.edge_events,
            slot.clone(),
        ) {
            Ok(listener) => listener,
            Err(e) => {
                let _ = self.write_edge(&mut state, Edge::None);
                return Err(e);
            }
        };

        state.watch = Some(Watch { slot, listener });

        if let Err(e) = self.write_edge(&mut state, edge) {
            let _ = self.halt_edge(&mut state);
            return Err(e);
        }

        debug!("{}: armed {} edge detection", self.name, edge);

        Ok(())
    }

    /// Configures the pin as an output, and sets its logic level.
    ///
    /// Edge detection is disarmed first.
    pub fn set_output(&self, level: Level) -> Result<()> {
        let mut state = self.state.lock();
        self.open(&mut state)?;
        self.halt_edge(&mut state)?;

        if state.direction != Direction::Out {
            self.write_direction(&mut state, sysfs::output_bytes(level))?;
            state.direction = Direction::Out;
        } else {
            let value = self.value.get().ok_or(Error::NotInitialized)?;
            sysfs::seek_write(value, sysfs::value_bytes(level))?;
        }

        Ok(())
    }

    /// Reads the pin's logic level.
    ///
    /// Doesn't take the pin's lock once the value file is open. Any error
    /// is reported as [`Level::Low`], so a failed read can't be told apart
    /// from a low line.
    pub fn read(&self) -> Level {
        let value = match self.value.get() {
            Some(value) => value,
            None => {
                let mut state = self.state.lock();
                if self.open(&mut state).is_err() {
                    return Level::Low;
                }

                match self.value.get() {
                    Some(value) => value,
                    None => return Level::Low,
                }
            }
        };

        let mut buffer = [0u8; 4];
        match sysfs::seek_read(value, &mut buffer) {
            Ok(len) => sysfs::parse_level(&buffer[..len]),
            Err(_) => Level::Low,
        }
    }

    /// Blocks until an edge is detected, or until a timeout occurs.
    ///
    /// `timeout` can be set to `None` to wait indefinitely, or to
    /// `Some(Duration::ZERO)` to only check for an edge that's already
    /// pending.
    ///
    /// Returns `false` if edge detection isn't armed, if the timeout
    /// elapsed, or if the watch was disarmed while waiting.
    pub fn wait_for_edge(&self, timeout: Option<Duration>) -> bool {
        let slot = match self.state.lock().watch {
            Some(ref watch) => watch.slot.clone(),
            None => return false,
        };

        slot.wait(timeout)
    }

    /// Disarms edge detection. Does nothing if it isn't armed.
    pub fn halt(&self) -> Result<()> {
        let mut state = self.state.lock();

        self.halt_edge(&mut state)
    }

    /// Always returns `Err(`[`Error::InvalidConfiguration`]`)`. PWM output
    /// isn't available through the sysfs GPIO interface.
    pub fn set_pwm(&self, _duty_cycle: f64, _period: Duration) -> Result<()> {
        Err(Error::InvalidConfiguration(format!(
            "{} doesn't support PWM output",
            self.name
        )))
    }

    // Exports the line if needed, and opens value and direction. Failures
    // are cached.
    fn open(&self, state: &mut PinState) -> Result<()> {
        if let Some(ref err) = state.open_error {
            return Err(err.replicate());
        }

        if state.direction_file.is_some() {
            return Ok(());
        }

        match self.open_files() {
            Ok(direction_file) => {
                state.direction_file = Some(direction_file);
                Ok(())
            }
            Err(e) => {
                debug!("{}: {}", self.name, e);
                state.open_error = Some(e.replicate());
                Err(e)
            }
        }
    }

    fn open_files(&self) -> Result<File> {
        let value_path = self.root.join("value");

        if self.value.get().is_none() {
            let value = match sysfs::open_value(&value_path) {
                Ok(value) => value,
                Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
                    self.export.export(self.number)?;
                    sysfs::wait_for_value(&value_path)?
                }
                Err(e) => return Err(Error::unavailable(&value_path, &e)),
            };

            let _ = self.value.set(value);
        }

        sysfs::open_rw(&self.root.join("direction"))
    }

    fn write_direction(&self, state: &mut PinState, data: &[u8]) -> Result<()> {
        match state.direction_file {
            Some(ref file) => Ok(sysfs::seek_write(file, data)?),
            None => Err(Error::NotInitialized),
        }
    }

    fn write_edge(&self, state: &mut PinState, edge: Edge) -> Result<()> {
        if state.edge == edge {
            return Ok(());
        }

        if let Some(ref file) = state.edge_file {
            sysfs::seek_write(file, sysfs::edge_bytes(edge))?;
        }
        state.edge = edge;

        Ok(())
    }

    // Wakes up all waiters of the current watch, and returns once its
    // listener has unregistered the value descriptor.
    fn cancel_wait(&self, state: &mut PinState) -> Result<()> {
        if let Some(mut watch) = state.watch.take() {
            watch.slot.cancel();
            watch.listener.stop()?;
        }

        Ok(())
    }

    fn halt_edge(&self, state: &mut PinState) -> Result<()> {
        let stopped = self.cancel_wait(state);
        self.write_edge(state, Edge::None)?;

        stopped
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pin")
            .field("number", &self.number)
            .field("root", &self.root)
            .field("value", &self.value)
            .field("state", &format_args!("{{ .. }}"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::ffi::CString;
    use std::fs;
    use std::fs::OpenOptions;
    use std::io::{Read, Write};
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::OpenOptionsExt;
    use std::thread;

    use tempfile::TempDir;

    use crate::gpio::epoll::{EPOLLET, EPOLLIN};
    use crate::gpio::interrupt;
    use crate::gpio::tests::fake_root;
    use crate::gpio::Sysfs;

    // FIFOs signal readability instead of POLLPRI.
    const FIFO_EVENTS: i32 = EPOLLIN | EPOLLET;

    fn mkfifo(path: &Path) {
        let path = CString::new(path.as_os_str().as_bytes()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(path.as_ptr(), 0o600) }, 0);
    }

    // Creates the pseudo-files of an exported line. The value file is a
    // FIFO when `fifo` is set, so tests can simulate edges on it.
    fn add_line(root: &Path, number: u32, fifo: bool) -> PathBuf {
        let line = root.join(format!("gpio{}", number));
        fs::create_dir(&line).unwrap();
        File::create(line.join("direction")).unwrap();
        File::create(line.join("edge")).unwrap();

        if fifo {
            mkfifo(&line.join("value"));
        } else {
            fs::write(line.join("value"), b"0\n").unwrap();
        }

        line
    }

    fn edge_root(number: u32) -> (TempDir, Sysfs, PathBuf) {
        let dir = fake_root(0, 64);
        let line = add_line(dir.path(), number, true);
        let gpio = Sysfs::open_with(dir.path(), FIFO_EVENTS).unwrap();

        (dir, gpio, line)
    }

    // Empties the FIFO, then writes to it, which triggers exactly one
    // edge-triggered readiness notification.
    fn trigger(line: &Path) {
        let mut fifo = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(line.join("value"))
            .unwrap();

        let mut buffer = [0u8; 64];
        while let Ok(len) = fifo.read(&mut buffer) {
            if len == 0 {
                break;
            }
        }

        fifo.write_all(b"1").unwrap();
    }

    fn contents(path: PathBuf) -> String {
        fs::read_to_string(path).unwrap()
    }

    fn value_fd(pin: &Pin) -> i32 {
        pin.value.get().unwrap().as_raw_fd()
    }

    #[test]
    fn edge_is_delivered_once() {
        let (_dir, gpio, line) = edge_root(42);
        let pin = gpio.pin(42).unwrap();

        pin.set_input(Pull::Float, Edge::Both).unwrap();
        assert!(contents(line.join("direction")).starts_with("in"));
        assert!(contents(line.join("edge")).starts_with("both"));
        assert_eq!(pin.edge(), Edge::Both);

        trigger(&line);
        assert!(pin.wait_for_edge(Some(Duration::from_secs(1))));
        assert!(!pin.wait_for_edge(Some(Duration::ZERO)));

        pin.halt().unwrap();
        assert!(contents(line.join("edge")).starts_with("none"));
    }

    #[test]
    fn wait_without_watch_returns_immediately() {
        let (_dir, gpio, _line) = edge_root(3);
        let pin = gpio.pin(3).unwrap();

        let start = Instant::now();
        assert!(!pin.wait_for_edge(None));
        assert!(start.elapsed() < Duration::from_secs(1));

        pin.set_input(Pull::NoChange, Edge::None).unwrap();
        assert!(!pin.wait_for_edge(None));
    }

    #[test]
    fn halt_is_idempotent() {
        let (_dir, gpio, line) = edge_root(5);
        let pin = gpio.pin(5).unwrap();

        pin.halt().unwrap();
        assert_eq!(pin.edge(), Edge::None);
        assert!(contents(line.join("edge")).is_empty());

        pin.set_input(Pull::Float, Edge::RisingEdge).unwrap();
        pin.halt().unwrap();
        pin.halt().unwrap();
        assert_eq!(pin.edge(), Edge::None);
        assert!(!interrupt::event_loop().unwrap().is_watching(value_fd(&pin)));
    }

    #[test]
    fn rearming_keeps_a_single_listener() {
        let (_dir, gpio, line) = edge_root(7);
        let pin = gpio.pin(7).unwrap();

        pin.set_input(Pull::Float, Edge::RisingEdge).unwrap();
        let first = pin.state.lock().watch.as_ref().unwrap().slot.clone();

        pin.set_input(Pull::Float, Edge::FallingEdge).unwrap();
        pin.set_input(Pull::Float, Edge::FallingEdge).unwrap();
        pin.set_input(Pull::Float, Edge::Both).unwrap();

        // The first listener thread has exited, and dropped its reference.
        assert_eq!(Arc::strong_count(&first), 1);
        assert!(!first.wait(Some(Duration::ZERO)));

        assert!(interrupt::event_loop().unwrap().is_watching(value_fd(&pin)));
        assert!(contents(line.join("edge")).starts_with("both"));

        trigger(&line);
        assert!(pin.wait_for_edge(Some(Duration::from_secs(1))));

        pin.halt().unwrap();
        assert!(!interrupt::event_loop().unwrap().is_watching(value_fd(&pin)));
    }

    #[test]
    fn halt_cancels_blocked_waiter() {
        let (_dir, gpio, _line) = edge_root(9);
        let pin = gpio.pin(9).unwrap();
        pin.set_input(Pull::Float, Edge::Both).unwrap();

        let waiter = {
            let pin = pin.clone();
            thread::spawn(move || pin.wait_for_edge(None))
        };

        thread::sleep(Duration::from_millis(50));
        let halted = Instant::now();
        pin.halt().unwrap();

        assert!(!waiter.join().unwrap());
        assert!(halted.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn rearming_discards_earlier_edges() {
        let (_dir, gpio, line) = edge_root(11);
        let pin = gpio.pin(11).unwrap();

        pin.set_input(Pull::Float, Edge::Both).unwrap();
        trigger(&line);
        thread::sleep(Duration::from_millis(50));

        // The pending edge belongs to the previous watch.
        let mut fifo = fs::File::open(line.join("value")).unwrap();
        let mut buffer = [0u8; 8];
        let _ = fifo.read(&mut buffer);

        pin.set_input(Pull::Float, Edge::RisingEdge).unwrap();
        assert!(!pin.wait_for_edge(Some(Duration::from_millis(50))));

        trigger(&line);
        assert!(pin.wait_for_edge(Some(Duration::from_secs(1))));
        pin.halt().unwrap();
    }

    #[test]
    fn consecutive_edges_are_each_delivered() {
        let (_dir, gpio, line) = edge_root(15);
        let pin = gpio.pin(15).unwrap();
        pin.set_input(Pull::Float, Edge::Both).unwrap();

        for _ in 0..3 {
            trigger(&line);
            assert!(pin.wait_for_edge(Some(Duration::from_secs(1))));
        }
        assert!(!pin.wait_for_edge(Some(Duration::ZERO)));

        pin.halt().unwrap();
    }

    #[test]
    fn failed_rearm_leaves_pin_disarmed() {
        let (_dir, gpio, line) = edge_root(17);
        let pin = gpio.pin(17).unwrap();
        pin.set_input(Pull::Float, Edge::RisingEdge).unwrap();

        // Unregistering behind the listener's back makes its own removal fail.
        let event_loop = interrupt::event_loop().unwrap();
        event_loop.remove_fd(value_fd(&pin)).unwrap();

        assert!(pin.set_input(Pull::Float, Edge::Both).is_err());
        assert_eq!(pin.edge(), Edge::None);
        assert!(pin.state.lock().watch.is_none());
        assert!(contents(line.join("edge")).starts_with("none"));

        pin.set_input(Pull::Float, Edge::Both).unwrap();
        assert_eq!(pin.edge(), Edge::Both);
        assert!(event_loop.is_watching(value_fd(&pin)));
        pin.halt().unwrap();
    }

    #[test]
    fn output_disarms_edge_detection() {
        let (_dir, gpio, line) = edge_root(13);
        let pin = gpio.pin(13).unwrap();

        pin.set_input(Pull::Float, Edge::FallingEdge).unwrap();
        let fd = value_fd(&pin);

        pin.set_output(Level::High).unwrap();
        assert_eq!(pin.edge(), Edge::None);
        assert!(!interrupt::event_loop().unwrap().is_watching(fd));
        assert!(contents(line.join("edge")).starts_with("none"));
        assert!(!pin.wait_for_edge(Some(Duration::ZERO)));
    }

    #[test]
    fn output_sets_direction_then_value() {
        let dir = fake_root(0, 64);
        let line = add_line(dir.path(), 20, false);
        let gpio = Sysfs::open(dir.path()).unwrap();
        let pin = gpio.pin(20).unwrap();

        pin.set_output(Level::High).unwrap();
        assert!(contents(line.join("direction")).starts_with("high"));

        pin.set_output(Level::Low).unwrap();
        assert!(contents(line.join("direction")).starts_with("high"));
        assert!(contents(line.join("value")).starts_with('0'));

        pin.set_output(Level::High).unwrap();
        assert!(contents(line.join("value")).starts_with('1'));
        assert_eq!(pin.read(), Level::High);
    }

    #[test]
    fn read_reports_value() {
        let dir = fake_root(0, 64);
        let line = add_line(dir.path(), 21, false);
        fs::write(line.join("value"), b"1\n").unwrap();
        let gpio = Sysfs::open(dir.path()).unwrap();

        assert_eq!(gpio.pin(21).unwrap().read(), Level::High);
    }

    #[test]
    fn read_failures_are_low() {
        let dir = fake_root(0, 64);
        fs::remove_file(dir.path().join("export")).unwrap();
        let gpio = Sysfs::open_with(dir.path(), FIFO_EVENTS).unwrap();

        // Never exported, and there's no export handle to do so.
        let pin = gpio.pin(22).unwrap();
        assert_eq!(pin.read(), Level::Low);
        assert!(matches!(
            pin.set_output(Level::High),
            Err(Error::NotInitialized)
        ));

        // A FIFO can't be read at an offset.
        let line = add_line(dir.path(), 23, true);
        trigger(&line);
        assert_eq!(gpio.pin(23).unwrap().read(), Level::Low);
    }

    #[test]
    fn mode_reads_direction() {
        let dir = fake_root(0, 64);
        let line = add_line(dir.path(), 24, false);
        fs::write(line.join("direction"), b"out\n").unwrap();
        let gpio = Sysfs::open(dir.path()).unwrap();
        let pin = gpio.pin(24).unwrap();

        assert_eq!(pin.mode().unwrap(), Mode::Output);

        pin.set_input(Pull::NoChange, Edge::None).unwrap();
        assert_eq!(pin.mode().unwrap(), Mode::Input);
    }

    #[test]
    fn unsupported_configurations_are_rejected() {
        let (_dir, gpio, line) = edge_root(25);
        let pin = gpio.pin(25).unwrap();

        for pull in [Pull::PullUp, Pull::PullDown] {
            assert!(matches!(
                pin.set_input(pull, Edge::Both),
                Err(Error::InvalidConfiguration(_))
            ));
        }
        assert!(contents(line.join("direction")).is_empty());

        assert!(matches!(
            pin.set_pwm(0.5, Duration::from_millis(1)),
            Err(Error::InvalidConfiguration(_))
        ));
        assert_eq!(pin.pull(), Pull::NoChange);
        assert_eq!(pin.default_pull(), Pull::NoChange);
    }

    // Simulates the kernel: exporting creates the pseudo-files, but reports
    // EBUSY as if the line had been exported already.
    struct BusyExport {
        root: PathBuf,
    }

    impl Write for BusyExport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let number: u32 = String::from_utf8_lossy(buf).parse().unwrap();
            add_line(&self.root, number, false);

            Err(io::Error::from_raw_os_error(libc::EBUSY))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn busy_export_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let export = Arc::new(Export::new(Box::new(BusyExport {
            root: dir.path().to_path_buf(),
        })));

        let input = Pin::new(30, dir.path(), export.clone(), FIFO_EVENTS);
        input.set_input(Pull::Float, Edge::None).unwrap();
        assert!(contents(dir.path().join("gpio30/direction")).starts_with("in"));

        let output = Pin::new(31, dir.path(), export, FIFO_EVENTS);
        output.set_output(Level::Low).unwrap();
        assert!(contents(dir.path().join("gpio31/direction")).starts_with("low"));
    }

    #[test]
    fn open_errors_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        let pin = Pin::new(40, dir.path(), Arc::new(Export::none()), FIFO_EVENTS);

        assert!(matches!(
            pin.set_input(Pull::Float, Edge::None),
            Err(Error::NotInitialized)
        ));

        // The files show up later, but the pin doesn't retry.
        add_line(dir.path(), 40, false);
        assert!(matches!(
            pin.set_output(Level::High),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(pin.mode(), Err(Error::NotInitialized)));
        assert_eq!(pin.read(), Level::Low);
    }
}
