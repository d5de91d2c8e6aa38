//! A cooperatively scheduled, single-mutex TCP/IP protocol engine for
//! microcontrollers and small SoCs.
//!
//! This crate is the *core* described in the design notes: the network
//! task that fuses driver events, timers and protocol state machines into
//! one deterministic loop; the IPv4/IPv6 datagram path; ARP/NDP neighbor
//! caches; the TCP state machine; and the socket layer that multiplexes
//! TCP, UDP and raw sockets over all of it. NIC drivers, DHCP/mDNS/NAT
//! responders and the memory/OS abstraction live outside this crate and
//! talk to it only through the interfaces in [`driver`] and [`socket`].
#![no_std]
#![warn(rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]

extern crate alloc;

pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod dns;
pub mod driver;
pub mod error;
pub mod iface;
pub mod link;
pub mod neighbor;
pub mod rand;
pub mod sched;
pub mod socket;
pub mod transport;

mod ip;

pub use ip::{ipv4, ipv6, route};

use alloc::boxed::Box;

use hermit_sync::InterruptTicketMutex;

use crate::config::StackConfig;
use crate::error::Result;
use crate::iface::InterfaceRegistry;
use crate::sched::Scheduler;
use crate::socket::SocketTable;

/// A time instant in microseconds since an arbitrary epoch (usually boot).
/// Deliberately has no relation to wall-clock time so the whole protocol
/// engine can be driven deterministically in tests (§9 design note on
/// modeling the retransmit logic as a pure `tick(tcb, now)` function).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(pub u64);

impl Instant {
    pub const ZERO: Instant = Instant(0);

    pub fn from_millis(ms: u64) -> Self {
        Instant(ms * 1000)
    }

    pub fn total_millis(self) -> u64 {
        self.0 / 1000
    }

    pub fn checked_sub(self, other: Instant) -> Option<Duration> {
        self.0.checked_sub(other.0).map(Duration)
    }

    pub fn saturating_sub(self, other: Instant) -> Duration {
        Duration(self.0.saturating_sub(other.0))
    }
}

impl core::ops::Add<Duration> for Instant {
    type Output = Instant;
    fn add(self, rhs: Duration) -> Instant {
        Instant(self.0 + rhs.0)
    }
}

/// A span of microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(pub u64);

impl Duration {
    pub fn from_millis(ms: u64) -> Self {
        Duration(ms * 1000)
    }

    pub fn as_millis(self) -> u64 {
        self.0 / 1000
    }

    pub fn saturating_mul(self, factor: u32) -> Duration {
        Duration(self.0.saturating_mul(u64::from(factor)))
    }
}

impl core::ops::Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0 + rhs.0)
    }
}

/// Everything the protocol engine owns, behind the single mutex described
/// in §5: the interface registry, the socket table, and the scheduler's
/// timer bookkeeping. ISRs never touch this; they only flip event flags
/// and signal the shared wake event owned by whatever OS-integration layer
/// embeds this crate (out of scope here, see §1).
pub struct Stack {
    pub(crate) config: StackConfig,
    pub(crate) ifaces: InterfaceRegistry,
    pub(crate) sockets: SocketTable,
    pub(crate) scheduler: Scheduler,
}

/// The shared, mutex-guarded stack instance. Cloning the handle is cheap
/// (it is just a reference to the lock); acquiring it is the only way to
/// touch protocol state, mirroring the "exactly one global mutex
/// serialises all access" rule in §5.
pub struct StackHandle {
    inner: &'static InterruptTicketMutex<Stack>,
}

impl Clone for StackHandle {
    fn clone(&self) -> Self {
        StackHandle { inner: self.inner }
    }
}

impl StackHandle {
    pub fn lock(&self) -> hermit_sync::InterruptTicketMutexGuard<'static, Stack> {
        self.inner.lock()
    }
}

impl Stack {
    /// Builds a new stack instance, sized per `config`, but does not start
    /// the network task — call [`Stack::into_handle`] then drive
    /// [`Stack::run_once`] from whatever task/reactor the embedder uses.
    pub fn new(config: StackConfig) -> Result<Self> {
        config.validate()?;
        Ok(Stack {
            ifaces: InterfaceRegistry::new(&config),
            sockets: SocketTable::new(&config),
            scheduler: Scheduler::new(&config),
            config,
        })
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn ifaces(&self) -> &InterfaceRegistry {
        &self.ifaces
    }

    pub fn ifaces_mut(&mut self) -> &mut InterfaceRegistry {
        &mut self.ifaces
    }

    pub fn sockets_mut(&mut self) -> &mut SocketTable {
        &mut self.sockets
    }

    /// Leaks the stack into a `'static` mutex and returns a cheaply
    /// cloneable handle to it. This mirrors the upstream source's single
    /// static `NIC`/stack-context global — every API caller, ISR and the
    /// network task itself share the same handle.
    pub fn into_handle(self) -> StackHandle {
        let boxed: &'static InterruptTicketMutex<Stack> =
            Box::leak(Box::new(InterruptTicketMutex::new(self)));
        StackHandle { inner: boxed }
    }
}
