// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for handling termination signals sent to the harness.
//!
//! A signal received while a test runs does not kill the harness outright: the current test is
//! terminated with the usual escalation, and the run stops without writing an exit trailer, so it
//! can be resumed later.

use crate::errors::SignalHandlerSetupError;
use std::fmt;
use tokio::signal::unix::{Signal, SignalKind, signal};

/// The kind of signal handling to set up for a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SignalHandlerKind {
    /// Capture SIGINT, SIGTERM, SIGQUIT and SIGHUP.
    Standard,

    /// A no-op signal handler. Useful for tests.
    Noop,
}

impl SignalHandlerKind {
    /// Builds the handler. Must be called from within a tokio runtime.
    pub(crate) fn build(self) -> Result<SignalHandler, SignalHandlerSetupError> {
        match self {
            Self::Standard => SignalHandler::new(),
            Self::Noop => Ok(SignalHandler::noop()),
        }
    }
}

/// The signal handler implementation.
#[derive(Debug)]
pub(crate) struct SignalHandler {
    signals: Option<Signals>,
}

impl SignalHandler {
    fn new() -> Result<Self, SignalHandlerSetupError> {
        Ok(Self {
            signals: Some(Signals::new()?),
        })
    }

    fn noop() -> Self {
        Self { signals: None }
    }

    /// Waits for the next signal. Returns `None` once no more signals can arrive.
    pub(crate) async fn recv(&mut self) -> Option<ShutdownEvent> {
        match &mut self.signals {
            Some(signals) => signals.recv().await,
            None => None,
        }
    }

    /// Returns a signal that already arrived, without waiting for one.
    pub(crate) async fn try_recv(&mut self) -> Option<ShutdownEvent> {
        tokio::select! {
            biased;
            event = self.recv() => event,
            () = std::future::ready(()) => None,
        }
    }
}

#[derive(Debug)]
struct Signals {
    sigint: SignalWithDone,
    sigterm: SignalWithDone,
    sigquit: SignalWithDone,
    sighup: SignalWithDone,
}

impl Signals {
    fn new() -> std::io::Result<Self> {
        Ok(Self {
            sigint: SignalWithDone::new(SignalKind::interrupt())?,
            sigterm: SignalWithDone::new(SignalKind::terminate())?,
            sigquit: SignalWithDone::new(SignalKind::quit())?,
            sighup: SignalWithDone::new(SignalKind::hangup())?,
        })
    }

    async fn recv(&mut self) -> Option<ShutdownEvent> {
        loop {
            tokio::select! {
                recv = self.sigint.signal.recv(), if !self.sigint.done => {
                    match recv {
                        Some(()) => break Some(ShutdownEvent::Interrupt),
                        None => self.sigint.done = true,
                    }
                }
                recv = self.sigterm.signal.recv(), if !self.sigterm.done => {
                    match recv {
                        Some(()) => break Some(ShutdownEvent::Term),
                        None => self.sigterm.done = true,
                    }
                }
                recv = self.sigquit.signal.recv(), if !self.sigquit.done => {
                    match recv {
                        Some(()) => break Some(ShutdownEvent::Quit),
                        None => self.sigquit.done = true,
                    }
                }
                recv = self.sighup.signal.recv(), if !self.sighup.done => {
                    match recv {
                        Some(()) => break Some(ShutdownEvent::Hangup),
                        None => self.sighup.done = true,
                    }
                }
                else => {
                    break None
                }
            }
        }
    }
}

#[derive(Debug)]
struct SignalWithDone {
    signal: Signal,
    done: bool,
}

impl SignalWithDone {
    fn new(kind: SignalKind) -> std::io::Result<Self> {
        let signal = signal(kind)?;
        Ok(Self {
            signal,
            done: false,
        })
    }
}

/// A signal asking the harness to shut down.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShutdownEvent {
    /// SIGINT
    Interrupt,
    /// SIGTERM
    Term,
    /// SIGQUIT
    Quit,
    /// SIGHUP
    Hangup,
}

impl fmt::Display for ShutdownEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Term => "SIGTERM",
            Self::Quit => "SIGQUIT",
            Self::Hangup => "SIGHUP",
        })
    }
}
