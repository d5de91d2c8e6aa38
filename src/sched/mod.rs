//! The scheduler / task loop (§4.I): one cooperative network task that
//! drains driver events and fires each sub-protocol's periodic handler in
//! a fixed order, plus the user timer-callback and link-change callback
//! tables. Everything here runs with the single stack mutex already held
//! by the caller (§5) — there is no locking in this module itself.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::config::StackConfig;
use crate::iface::LinkChangeEvent;
use crate::{Duration, Instant};

/// One entry in the fixed tick order (§4.I). Slots marked *external* are
/// owned by responders outside this crate (DHCP, mDNS, NAT, ...); this
/// crate only guarantees they fire in the right place relative to the
/// slots it does implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickSlot {
    Nic,
    Ppp,
    Arp,
    Ipv4Fragments,
    Igmp,
    AutoIp,
    DhcpClient,
    DhcpServer,
    Nat,
    Ipv6Fragments,
    Mld,
    Ndp,
    RouterAdvertisement,
    Dhcpv6Client,
    Tcp,
    DnsCache,
    MdnsResponder,
    DnsSdResponder,
}

/// The fixed sub-protocol order within one tick (§4.I, verbatim list).
/// `Scheduler::tick` never reorders or skips entries except by the
/// per-slot accumulator threshold.
const TICK_ORDER: &[TickSlot] = &[
    TickSlot::Nic,
    TickSlot::Ppp,
    TickSlot::Arp,
    TickSlot::Ipv4Fragments,
    TickSlot::Igmp,
    TickSlot::AutoIp,
    TickSlot::DhcpClient,
    TickSlot::DhcpServer,
    TickSlot::Nat,
    TickSlot::Ipv6Fragments,
    TickSlot::Mld,
    TickSlot::Ndp,
    TickSlot::RouterAdvertisement,
    TickSlot::Dhcpv6Client,
    TickSlot::Tcp,
    TickSlot::DnsCache,
    TickSlot::MdnsResponder,
    TickSlot::DnsSdResponder,
];

struct Accumulator {
    slot: TickSlot,
    interval: Duration,
    elapsed: Duration,
}

/// A user-registered periodic callback (§4.I).
pub struct TimerCallback {
    pub interval: Duration,
    elapsed: Duration,
    callback: Box<dyn FnMut(Instant) + Send>,
}

/// A user-registered link-change callback (§4.B: walked once per
/// transition from `processLinkChange`).
pub struct LinkChangeCallback {
    callback: Box<dyn FnMut(LinkChangeEvent) + Send>,
}

pub struct Scheduler {
    accumulators: Vec<Accumulator>,
    tick_interval: Duration,
    timers: Vec<Option<TimerCallback>>,
    link_change_callbacks: Vec<Option<LinkChangeCallback>>,
}

impl Scheduler {
    pub fn new(config: &StackConfig) -> Self {
        let t = &config.tick;
        let accumulators = alloc::vec![
            Accumulator { slot: TickSlot::Nic, interval: Duration::from_millis(u64::from(t.nic_poll_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::Ppp, interval: Duration::from_millis(u64::from(t.nic_poll_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::Arp, interval: Duration::from_millis(u64::from(t.arp_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::Ipv4Fragments, interval: Duration::from_millis(u64::from(t.ipv4_frag_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::Igmp, interval: Duration::from_millis(u64::from(t.igmp_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::AutoIp, interval: Duration::from_millis(u64::from(t.ipv4_frag_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::DhcpClient, interval: Duration::from_millis(u64::from(t.ipv4_frag_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::DhcpServer, interval: Duration::from_millis(u64::from(t.ipv4_frag_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::Nat, interval: Duration::from_millis(u64::from(t.ipv4_frag_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::Ipv6Fragments, interval: Duration::from_millis(u64::from(t.ipv6_frag_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::Mld, interval: Duration::from_millis(u64::from(t.mld_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::Ndp, interval: Duration::from_millis(u64::from(t.ndp_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::RouterAdvertisement, interval: Duration::from_millis(u64::from(t.ndp_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::Dhcpv6Client, interval: Duration::from_millis(u64::from(t.ipv6_frag_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::Tcp, interval: Duration::from_millis(u64::from(t.tcp_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::DnsCache, interval: Duration::from_millis(u64::from(t.dns_cache_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::MdnsResponder, interval: Duration::from_millis(u64::from(t.dns_cache_ms)), elapsed: Duration::from_millis(0) },
            Accumulator { slot: TickSlot::DnsSdResponder, interval: Duration::from_millis(u64::from(t.dns_cache_ms)), elapsed: Duration::from_millis(0) },
        ];
        Scheduler {
            accumulators,
            tick_interval: Duration::from_millis(u64::from(config.tick_interval_ms)),
            timers: (0..config.max_timer_callbacks).map(|_| None).collect(),
            link_change_callbacks: (0..config.max_link_change_callbacks).map(|_| None).collect(),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Advances every accumulator by one tick interval and returns which
    /// slots crossed their threshold this call, in the fixed §4.I order.
    /// Callers invoke each returned slot's handler (for every configured
    /// interface, where applicable) before the next `tick`.
    pub fn tick(&mut self) -> Vec<TickSlot> {
        let mut fired = Vec::new();
        for slot in TICK_ORDER {
            let acc = self
                .accumulators
                .iter_mut()
                .find(|a| a.slot == *slot)
                .expect("every TickSlot has an accumulator");
            acc.elapsed = acc.elapsed + self.tick_interval;
            if acc.elapsed >= acc.interval {
                acc.elapsed = Duration::from_millis(0);
                fired.push(*slot);
            }
        }
        fired
    }

    /// Registers a periodic callback; returns its slot index (used to
    /// unregister). Fails if the timer-callback table (§6.3) is full.
    pub fn register_timer(
        &mut self,
        interval: Duration,
        callback: Box<dyn FnMut(Instant) + Send>,
    ) -> crate::error::Result<usize> {
        let idx = self
            .timers
            .iter()
            .position(|t| t.is_none())
            .ok_or(crate::error::Error::OutOfResources)?;
        self.timers[idx] = Some(TimerCallback {
            interval,
            elapsed: Duration::from_millis(0),
            callback,
        });
        Ok(idx)
    }

    pub fn unregister_timer(&mut self, idx: usize) {
        if let Some(slot) = self.timers.get_mut(idx) {
            *slot = None;
        }
    }

    pub fn register_link_change(
        &mut self,
        callback: Box<dyn FnMut(LinkChangeEvent) + Send>,
    ) -> crate::error::Result<usize> {
        let idx = self
            .link_change_callbacks
            .iter()
            .position(|c| c.is_none())
            .ok_or(crate::error::Error::OutOfResources)?;
        self.link_change_callbacks[idx] = Some(LinkChangeCallback { callback });
        Ok(idx)
    }

    pub fn unregister_link_change(&mut self, idx: usize) {
        if let Some(slot) = self.link_change_callbacks.get_mut(idx) {
            *slot = None;
        }
    }

    /// Runs every due user timer callback. Part of the "user" slot at the
    /// tail of the fixed tick order.
    pub fn run_due_timers(&mut self, now: Instant) {
        for timer in self.timers.iter_mut().flatten() {
            timer.elapsed = timer.elapsed + self.tick_interval;
            if timer.elapsed >= timer.interval {
                timer.elapsed = Duration::from_millis(0);
                (timer.callback)(now);
            }
        }
    }

    /// Invokes every registered link-change callback exactly once for this
    /// transition (§4.B, §8 testable property "every registered
    /// link-change callback is invoked exactly once per transition").
    pub fn notify_link_change(&mut self, event: LinkChangeEvent) {
        for callback in self.link_change_callbacks.iter_mut().flatten() {
            (callback.callback)(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};
    use alloc::sync::Arc;

    #[test]
    fn tick_fires_nic_every_tick_and_arp_every_tenth() {
        let mut config = StackConfig::default();
        config.tick_interval_ms = 100;
        config.tick.nic_poll_ms = 100;
        config.tick.arp_ms = 1000;
        let mut sched = Scheduler::new(&config);

        let mut nic_fires = 0;
        let mut arp_fires = 0;
        for _ in 0..10 {
            let fired = sched.tick();
            if fired.contains(&TickSlot::Nic) {
                nic_fires += 1;
            }
            if fired.contains(&TickSlot::Arp) {
                arp_fires += 1;
            }
        }
        assert_eq!(nic_fires, 10);
        assert_eq!(arp_fires, 1);
    }

    #[test]
    fn link_change_callback_invoked_exactly_once_per_transition() {
        let config = StackConfig::default();
        let mut sched = Scheduler::new(&config);
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();
        sched
            .register_link_change(Box::new(move |_event| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        sched.notify_link_change(LinkChangeEvent {
            iface: crate::iface::InterfaceIndex(0),
            up: true,
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timer_table_rejects_registration_past_capacity() {
        let mut config = StackConfig::default();
        config.max_timer_callbacks = 1;
        let mut sched = Scheduler::new(&config);
        sched.register_timer(Duration::from_millis(1000), Box::new(|_| {})).unwrap();
        assert!(sched.register_timer(Duration::from_millis(1000), Box::new(|_| {})).is_err());
    }
}
