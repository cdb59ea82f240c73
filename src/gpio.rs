//! Interface for GPIO lines exposed through the sysfs GPIO interface.
//!
//! Lines are controlled through the pseudo-files under `/sys/class/gpio`. A
//! line is exported by writing its number to `export`, after which the kernel
//! creates `gpioN/direction`, `gpioN/value` and `gpioN/edge`.
//!
//! ## Pins
//!
//! A [`Sysfs`] instance enumerates the available GPIO chips and creates one
//! [`Pin`] for every line they expose. Pins are retrieved by number through
//! [`Sysfs::pin`]. A [`Pin`] is shared (`Arc<Pin>`) and lives as long as the
//! driver that created it. Its pseudo-files are exported and opened lazily the
//! first time the pin is configured or read.
//!
//! ## Edge detection
//!
//! Calling [`Pin::set_input`] with an [`Edge`] other than [`Edge::None`] arms
//! edge detection. [`Pin::wait_for_edge`] then blocks the current thread until
//! a matching transition occurs, the timeout elapses, or the watch is disarmed
//! by [`Pin::halt`], [`Pin::set_output`] or another call to [`Pin::set_input`].
//!
//! All armed pins in the process share a single `epoll` instance, serviced by
//! one background thread that is started the first time a pin is armed.
//!
//! The kernel doesn't queue edges. A single notification means at least one
//! matching transition happened since the previous one was consumed.
//!
//! ## Examples
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use sysgpio::gpio::{Edge, Pull, Sysfs};
//!
//! # fn main() -> sysgpio::gpio::Result<()> {
//! let gpio = Sysfs::new()?;
//! let pin = gpio.pin(23)?;
//!
//! pin.set_input(Pull::Float, Edge::Both)?;
//! if pin.wait_for_edge(Some(Duration::from_secs(1))) {
//!     println!("{} is now {}", pin, pin.read());
//! }
//! pin.halt()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Troubleshooting
//!
//! ### Permission denied
//!
//! Exporting lines requires write access to `/sys/class/gpio/export`, and the
//! pseudo-files created for each exported line start off owned by `root`. On
//! distributions that ship the appropriate `udev` rules, members of the `gpio`
//! group are granted access shortly after a line is exported. If you encounter
//! [`Error::ResourceUnavailable`], either run your application as a privileged
//! user, or add `udev` rules that set the group and permissions of the GPIO
//! pseudo-files.

use std::collections::BTreeMap;
use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::ops::Not;
use std::path::{Path, PathBuf};
use std::result;
use std::sync::Arc;

use log::{debug, warn};

mod epoll;
mod interrupt;
mod pin;
mod sysfs;
mod watch;

pub use self::pin::Pin;

/// Default location of the sysfs GPIO interface.
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Errors that can occur when accessing sysfs GPIO lines.
#[derive(Debug)]
pub enum Error {
    /// A pseudo-file couldn't be opened.
    ///
    /// The line's pseudo-files either don't exist, or the current user isn't
    /// allowed to access them. More information on possible causes for this
    /// error can be found [here].
    ///
    /// [here]: index.html#permission-denied
    ResourceUnavailable { path: PathBuf, reason: String },
    /// The requested configuration isn't supported by sysfs GPIO lines.
    ///
    /// Built-in pull-up/pull-down resistors and PWM output can't be controlled
    /// through the sysfs interface.
    InvalidConfiguration(String),
    /// The `export` control file wasn't opened when the driver was initialized,
    /// so lines that haven't been exported yet can't be used.
    NotInitialized,
    /// No GPIO chip exposes a line with the specified number.
    PinNotAvailable(u32),
    /// I/O error.
    Io(io::Error),
    /// Thread panicked.
    ThreadPanic,
}

impl Error {
    pub(crate) fn unavailable(path: &Path, err: &io::Error) -> Error {
        Error::ResourceUnavailable {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }

    // io::Error isn't Clone. Cached errors are returned verbatim on every
    // call, so rebuild an equivalent value instead.
    pub(crate) fn replicate(&self) -> Error {
        match self {
            Error::ResourceUnavailable { path, reason } => Error::ResourceUnavailable {
                path: path.clone(),
                reason: reason.clone(),
            },
            Error::InvalidConfiguration(msg) => Error::InvalidConfiguration(msg.clone()),
            Error::NotInitialized => Error::NotInitialized,
            Error::PinNotAvailable(pin) => Error::PinNotAvailable(*pin),
            Error::Io(err) => Error::Io(match err.raw_os_error() {
                Some(code) => io::Error::from_raw_os_error(code),
                None => io::Error::new(err.kind(), err.to_string()),
            }),
            Error::ThreadPanic => Error::ThreadPanic,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::ResourceUnavailable { ref path, ref reason } => write!(
                f,
                "Can't access {}: {} (run as root, or set up udev rules that grant access to the GPIO pseudo-files)",
                path.display(),
                reason
            ),
            Error::InvalidConfiguration(ref msg) => write!(f, "Invalid configuration: {}", msg),
            Error::NotInitialized => write!(f, "Sysfs GPIO export handle isn't initialized"),
            Error::PinNotAvailable(pin) => write!(f, "Pin {} is not available", pin),
            Error::Io(ref err) => write!(f, "I/O error: {}", err),
            Error::ThreadPanic => write!(f, "Thread panicked"),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

/// Result type returned from methods that can have `sysgpio::gpio::Error`s.
pub type Result<T> = result::Result<T, Error>;

/// Pin logic levels.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum Level {
    Low = 0,
    High = 1,
}

impl From<bool> for Level {
    fn from(e: bool) -> Level {
        if e {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Level::Low => write!(f, "Low"),
            Level::High => write!(f, "High"),
        }
    }
}

impl Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

/// Pin modes.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Mode {
    Input,
    Output,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Mode::Input => write!(f, "In"),
            Mode::Output => write!(f, "Out"),
        }
    }
}

/// Pull-up/pull-down resistor requests.
///
/// The sysfs interface can't configure resistors. Only [`Pull::Float`] and
/// [`Pull::NoChange`] are accepted, and both leave the hardware untouched.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Pull {
    Float,
    PullDown,
    PullUp,
    NoChange,
}

impl fmt::Display for Pull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Pull::Float => write!(f, "Float"),
            Pull::PullDown => write!(f, "PullDown"),
            Pull::PullUp => write!(f, "PullUp"),
            Pull::NoChange => write!(f, "NoChange"),
        }
    }
}

/// Edge detection conditions.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Edge {
    None,
    RisingEdge,
    FallingEdge,
    Both,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Edge::None => write!(f, "None"),
            Edge::RisingEdge => write!(f, "RisingEdge"),
            Edge::FallingEdge => write!(f, "FallingEdge"),
            Edge::Both => write!(f, "Both"),
        }
    }
}

/// Provides access to the lines exposed through the sysfs GPIO interface.
#[derive(Debug)]
pub struct Sysfs {
    root: PathBuf,
    pins: BTreeMap<u32, Arc<Pin>>,
}

impl Sysfs {
    /// Constructs a new `Sysfs` for the GPIO chips under `/sys/class/gpio`.
    pub fn new() -> Result<Sysfs> {
        Sysfs::open(SYSFS_GPIO_ROOT)
    }

    /// Constructs a new `Sysfs` for the GPIO chips under `root`.
    ///
    /// Every `gpiochipN` directory contributes the lines `base..base + ngpio`.
    /// If `export` can't be opened for writing, `open` still succeeds, but only
    /// lines that were exported by someone else can be used. Any other pin
    /// returns [`Error::NotInitialized`].
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Sysfs> {
        Sysfs::open_with(root, sysfs::EDGE_EVENTS)
    }

    pub(crate) fn open_with<P: AsRef<Path>>(root: P, edge_events: i32) -> Result<Sysfs> {
        let root = root.as_ref().to_path_buf();

        let mut chips = Vec::new();
        for entry in fs::read_dir(&root).map_err(|e| Error::unavailable(&root, &e))? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with("gpiochip") {
                chips.push(entry.path());
            }
        }

        if chips.is_empty() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no GPIO chips found in {}", root.display()),
            )));
        }
        chips.sort();

        let export = match sysfs::Export::open(&root) {
            Ok(export) => export,
            Err(e) => {
                warn!("GPIO lines can't be exported: {}", e);
                sysfs::Export::none()
            }
        };
        let export = Arc::new(export);

        let mut pins = BTreeMap::new();
        for chip in &chips {
            let (base, ngpio) = sysfs::chip_range(chip)?;
            let end = base.checked_add(ngpio).ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: line range exceeds u32", chip.display()),
                ))
            })?;
            debug!("{}: lines {}..{}", chip.display(), base, end);

            for number in base..end {
                if pins.contains_key(&number) {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("found two pins with number {}", number),
                    )));
                }

                pins.insert(
                    number,
                    Arc::new(Pin::new(number, &root, export.clone(), edge_events)),
                );
            }
        }

        Ok(Sysfs { root, pins })
    }

    /// Returns the sysfs GPIO root this instance was opened on.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the [`Pin`] with the specified GPIO number.
    ///
    /// Returns `Err(`[`Error::PinNotAvailable`]`)` if none of the GPIO chips
    /// expose the line.
    pub fn pin(&self, number: u32) -> Result<Arc<Pin>> {
        self.pins
            .get(&number)
            .cloned()
            .ok_or(Error::PinNotAvailable(number))
    }

    /// Returns an iterator over all available pins, ordered by number.
    pub fn pins(&self) -> impl Iterator<Item = &Arc<Pin>> {
        self.pins.values()
    }
}
