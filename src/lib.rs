//! Sysgpio provides access to GPIO lines exposed through the Linux sysfs GPIO
//! interface (`/sys/class/gpio`), including blocking edge detection.
//!
//! Edge interrupts for every armed pin are multiplexed onto a single `epoll`
//! instance, serviced by one long-lived thread per process. Pins hand out
//! blocking, cancellable waits with optional timeouts on top of it.
//!
//! Sysgpio requires Linux. Both `gnu` and `musl` libc targets are supported.

#[macro_use]
mod macros;

pub mod gpio;
