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

use std::fs;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::Write;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;

use crate::gpio::epoll::{EPOLLERR, EPOLLET, EPOLLPRI};
use crate::gpio::{Edge, Error, Level, Mode, Result};

// A value file signals a triggered edge through POLLPRI and POLLERR.
pub const EDGE_EVENTS: i32 = EPOLLPRI | EPOLLERR | EPOLLET;

// Max. number of attempts to open a freshly exported value file, and the
// delay in between. udev usually fixes up the permissions within ~100ms.
const OPEN_RETRIES: u32 = 500;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(10);

// Bytes written to the direction file.
pub fn direction_bytes(mode: Mode) -> &'static [u8] {
    match mode {
        Mode::Input => b"in",
        Mode::Output => b"out",
    }
}

// Switching to output by writing the initial level sets direction and
// value atomically.
pub fn output_bytes(level: Level) -> &'static [u8] {
    match level {
        Level::Low => b"low",
        Level::High => b"high",
    }
}

pub fn edge_bytes(edge: Edge) -> &'static [u8] {
    match edge {
        Edge::None => b"none",
        Edge::RisingEdge => b"rising",
        Edge::FallingEdge => b"falling",
        Edge::Both => b"both",
    }
}

pub fn value_bytes(level: Level) -> &'static [u8] {
    match level {
        Level::Low => b"0",
        Level::High => b"1",
    }
}

pub fn parse_level(buffer: &[u8]) -> Level {
    match buffer.first() {
        Some(b'1') => Level::High,
        _ => Level::Low,
    }
}

// The kernel appends a newline, so only look at the prefix.
pub fn parse_mode(buffer: &[u8]) -> Option<Mode> {
    if buffer.starts_with(b"in") {
        Some(Mode::Input)
    } else if buffer.starts_with(b"out") {
        Some(Mode::Output)
    } else {
        None
    }
}

// Pseudo-files don't support append semantics. Every access starts at
// offset 0.
pub fn seek_read(file: &File, buffer: &mut [u8]) -> io::Result<usize> {
    file.read_at(buffer, 0)
}

pub fn seek_write(file: &File, data: &[u8]) -> io::Result<()> {
    file.write_all_at(data, 0)
}

// Value files are opened non-blocking, so a pending-edge flush never stalls.
// sysfs ignores the flag.
pub fn open_value(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
        .open(path)
}

pub fn open_rw(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_CLOEXEC)
        .open(path)
        .map_err(|e| Error::unavailable(path, &e))
}

// Reads the line range of a gpiochipN directory.
pub fn chip_range(chip: &Path) -> Result<(u32, u32)> {
    Ok((read_u32(&chip.join("base"))?, read_u32(&chip.join("ngpio"))?))
}

fn read_u32(path: &Path) -> Result<u32> {
    let contents = fs::read_to_string(path).map_err(|e| Error::unavailable(path, &e))?;

    contents.trim().parse().map_err(|_| {
        Error::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} doesn't contain a number", path.display()),
        ))
    })
}

// The global export control file.
pub struct Export {
    writer: Mutex<Option<Box<dyn Write + Send>>>,
}

impl std::fmt::Debug for Export {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Export")
            .field("initialized", &self.writer.lock().is_some())
            .finish()
    }
}

impl Export {
    pub fn open(root: &Path) -> Result<Export> {
        let path = root.join("export");
        let file = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(&path)
            .map_err(|e| Error::unavailable(&path, &e))?;

        Ok(Export::new(Box::new(file)))
    }

    pub fn new(writer: Box<dyn Write + Send>) -> Export {
        Export {
            writer: Mutex::new(Some(writer)),
        }
    }

    pub fn none() -> Export {
        Export {
            writer: Mutex::new(None),
        }
    }

    // Requests the kernel to create the pseudo-files for `number`. EBUSY
    // means the line was already exported, which is just as good.
    pub fn export(&self, number: u32) -> Result<()> {
        let mut writer = self.writer.lock();
        let writer = writer.as_mut().ok_or(Error::NotInitialized)?;

        match writer.write_all(number.to_string().as_bytes()) {
            Ok(()) => {
                debug!("Exported GPIO{}", number);
                Ok(())
            }
            Err(ref e) if e.raw_os_error() == Some(libc::EBUSY) => {
                debug!("GPIO{} is already exported", number);
                Ok(())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

// Exported pseudo-files start off owned by root. Keep trying to open the
// value file until udev has set the proper group and permissions.
pub fn wait_for_value(path: &Path) -> Result<File> {
    let mut counter = 0;
    loop {
        match open_value(path) {
            Ok(file) => return Ok(file),
            Err(e) => {
                let retry = matches!(
                    e.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
                );

                if !retry || counter >= OPEN_RETRIES {
                    return Err(Error::unavailable(path, &e));
                }
            }
        }

        thread::sleep(OPEN_RETRY_DELAY);
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().push(String::from_utf8_lossy(buf).into_owned());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Failing(i32);

    impl Write for Failing {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from_raw_os_error(self.0))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn export_writes_decimal_number() {
        let recorder = Recorder::default();
        let export = Export::new(Box::new(recorder.clone()));

        export.export(42).unwrap();
        export.export(7).unwrap();
        assert_eq!(*recorder.0.lock(), vec!["42".to_string(), "7".to_string()]);
    }

    #[test]
    fn export_tolerates_busy() {
        let export = Export::new(Box::new(Failing(libc::EBUSY)));
        assert!(export.export(42).is_ok());

        let export = Export::new(Box::new(Failing(libc::EINVAL)));
        assert!(matches!(export.export(42), Err(Error::Io(_))));
    }

    #[test]
    fn export_requires_handle() {
        assert!(matches!(Export::none().export(3), Err(Error::NotInitialized)));
    }

    #[test]
    fn parses_pseudo_file_contents() {
        assert_eq!(parse_mode(b"in\n"), Some(Mode::Input));
        assert_eq!(parse_mode(b"out\n"), Some(Mode::Output));
        assert_eq!(parse_mode(b"?"), None);
        assert_eq!(parse_level(b"1\n"), Level::High);
        assert_eq!(parse_level(b"0\n"), Level::Low);
        assert_eq!(parse_level(b""), Level::Low);
    }

    #[test]
    fn wait_for_value_picks_up_late_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value");

        let late = path.clone();
        let creator = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            fs::write(late, b"0").unwrap();
        });

        assert!(wait_for_value(&path).is_ok());
        creator.join().unwrap();
    }

    #[test]
    fn wait_for_value_gives_up_on_other_errors() {
        let dir = tempfile::tempdir().unwrap();

        // A directory can't be opened for writing.
        assert!(matches!(
            wait_for_value(dir.path()),
            Err(Error::ResourceUnavailable { .. })
        ));
    }
}
