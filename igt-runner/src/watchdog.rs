// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hardware watchdog coordination.
//!
//! A watchdog power-cycles the machine unless it is pinged within its timeout. The harness arms
//! every watchdog device it can find so that a test wedging the kernel hard enough to stall the
//! harness itself still results in a reboot, after which the run can be resumed.
//!
//! Devices may refuse a requested timeout or clamp it to a lower value. [`WatchdogSet::arm`]
//! negotiates a single timeout that every remaining device accepts.

use camino::{Utf8Path, Utf8PathBuf};
use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, Write},
    os::fd::AsRawFd,
};
use tracing::{debug, warn};

/// Writing this token before closing a device disables it ("magic close").
const MAGIC_CLOSE: &[u8] = b"V";

/// A single watchdog device.
pub trait WatchdogDevice: fmt::Debug {
    /// Requests a timeout in seconds, returning the timeout the device actually applied.
    fn set_timeout(&mut self, timeout: u32) -> io::Result<u32>;

    /// Resets the device's countdown.
    fn keepalive(&mut self) -> io::Result<()>;

    /// Disables the device. Called before the device is dropped.
    fn disarm(&mut self) -> io::Result<()>;
}

mod ioctl {
    // From linux/watchdog.h.
    nix::ioctl_read!(wdioc_keepalive, b'W', 5, libc::c_int);
    nix::ioctl_readwrite!(wdioc_settimeout, b'W', 6, libc::c_int);
}

/// A `/dev/watchdogN` device.
#[derive(Debug)]
pub struct DevWatchdog {
    file: File,
    path: Utf8PathBuf,
}

impl DevWatchdog {
    /// Opens a watchdog device. Opening starts the countdown with the device's current timeout.
    pub fn open(path: impl Into<Utf8PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self { file, path })
    }

    /// The device path.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl WatchdogDevice for DevWatchdog {
    fn set_timeout(&mut self, timeout: u32) -> io::Result<u32> {
        let mut value = libc::c_int::try_from(timeout).unwrap_or(libc::c_int::MAX);
        // SAFETY: the fd is valid for the lifetime of self.file, and value outlives the call.
        unsafe { ioctl::wdioc_settimeout(self.file.as_raw_fd(), &mut value) }?;
        Ok(u32::try_from(value).unwrap_or(0))
    }

    fn keepalive(&mut self) -> io::Result<()> {
        let mut dummy: libc::c_int = 0;
        // SAFETY: as above.
        unsafe { ioctl::wdioc_keepalive(self.file.as_raw_fd(), &mut dummy) }?;
        Ok(())
    }

    fn disarm(&mut self) -> io::Result<()> {
        self.file.write_all(MAGIC_CLOSE)
    }
}

/// The set of watchdog devices owned by a run.
///
/// Devices are disarmed when the set is dropped.
#[derive(Debug, Default)]
pub struct WatchdogSet {
    devices: Vec<Box<dyn WatchdogDevice>>,
}

impl WatchdogSet {
    /// A set with no devices. Every operation is a no-op and [`arm`](Self::arm) returns the
    /// requested timeout unchanged.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A set made of the given devices.
    pub fn from_devices(devices: Vec<Box<dyn WatchdogDevice>>) -> Self {
        Self { devices }
    }

    /// Opens `/dev/watchdog0`, `/dev/watchdog1`, ... until one fails to open.
    pub fn open_system() -> Self {
        let mut devices: Vec<Box<dyn WatchdogDevice>> = Vec::new();
        for idx in 0.. {
            let path = format!("/dev/watchdog{idx}");
            match DevWatchdog::open(&path) {
                Ok(device) => {
                    debug!("opened watchdog {path}");
                    devices.push(Box::new(device));
                }
                Err(error) => {
                    debug!("stopped probing watchdogs at {path}: {error}");
                    break;
                }
            }
        }
        Self { devices }
    }

    /// The number of active devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if there are no active devices.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Applies a common timeout to every device and returns it.
    ///
    /// A device that clamps the timeout lowers the request for all of them, and the whole set is
    /// asked again. A device that rejects the request is disarmed and dropped. The loop ends once
    /// every remaining device accepted the same value, which takes at most one pass per distinct
    /// lowered value plus one per dropped device.
    pub fn arm(&mut self, timeout: u32) -> u32 {
        let mut requested = timeout;
        'negotiate: loop {
            let mut idx = 0;
            while idx < self.devices.len() {
                match self.devices[idx].set_timeout(requested) {
                    Ok(accepted) if accepted < requested => {
                        debug!("watchdog clamped timeout from {requested}s to {accepted}s");
                        requested = accepted;
                        continue 'negotiate;
                    }
                    Ok(_) => idx += 1,
                    Err(error) => {
                        warn!(
                            "watchdog {:?} rejected a {requested}s timeout, closing it: {error}",
                            self.devices[idx]
                        );
                        let mut device = self.devices.remove(idx);
                        // Best effort: the device may be unusable already.
                        let _ = device.disarm();
                    }
                }
            }
            break requested;
        }
    }

    /// Pings every device. Failures are ignored.
    pub fn ping(&mut self) {
        for device in &mut self.devices {
            let _ = device.keepalive();
        }
    }

    /// Disarms and closes every device. Safe to call more than once.
    pub fn disarm(&mut self) {
        for mut device in self.devices.drain(..) {
            if let Err(error) = device.disarm() {
                warn!("failed to disarm watchdog {device:?}: {error}");
            }
        }
    }
}

impl Drop for WatchdogSet {
    fn drop(&mut self) {
        self.disarm();
    }
}
