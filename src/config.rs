//! Configurable constants (§6.3).
//!
//! The upstream source picks these via `#if`-guarded macros at build time.
//! We expose them instead as a plain `StackConfig` value so one binary can
//! build several stack instances (e.g. for host-side tests) with different
//! tuning without recompiling.

/// Tuning knobs for one stack instance. Passed to [`crate::Stack::new`].
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Number of logical interfaces the interface registry (§4.B) sizes for.
    pub interface_count: usize,
    /// Scheduler tick period in milliseconds (§4.I). Must be >= 10.
    pub tick_interval_ms: u32,
    /// Capacity of the link-change callback table (§4.I).
    pub max_link_change_callbacks: usize,
    /// Capacity of the user timer-callback table (§4.I).
    pub max_timer_callbacks: usize,
    /// Bound on interface name length (§4.B).
    pub max_if_name_len: usize,
    /// Bound on hostname length (§4.B).
    pub max_hostname_len: usize,
    /// Capacity of the shared socket table (§4.H).
    pub max_sockets: usize,
    /// Capacity of the ARP cache, per interface (§4.D).
    pub arp_cache_size: usize,
    /// Capacity of the NDP neighbor cache, per interface (§4.F).
    pub ndp_cache_size: usize,
    /// Capacity of the IP fragment-reassembly table, per interface (§4.E).
    pub reassembly_slots: usize,
    /// PRNG seed buffer size in bytes; must be >= 10 (80 bits of key material).
    pub rand_seed_size: usize,
    pub tcp: TcpConfig,
    pub arp: ArpConfig,
    pub ip: IpConfig,
    pub tick: TickIntervals,
}

/// TCP tuning (§4.G / §6.3).
#[derive(Debug, Clone, Copy)]
pub struct TcpConfig {
    pub initial_rto_ms: u32,
    pub max_rto_ms: u32,
    pub max_retries: u32,
    pub max_probe_interval_ms: u32,
    pub override_timeout_ms: u32,
    /// `TCP_LOSS_WINDOW`: segments used for the loss-window (`LW`) constant
    /// in the RTO recovery policy (§4.G), expressed as a multiple of SMSS.
    pub loss_window_segments: u32,
    pub default_mss: u16,
    pub msl_ms: u32,
    pub fin_wait_2_timeout_ms: u32,
    pub keep_alive_interval_ms: u32,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            initial_rto_ms: 1_000,
            max_rto_ms: 60_000,
            max_retries: 12,
            max_probe_interval_ms: 60_000,
            override_timeout_ms: 200,
            loss_window_segments: 1,
            default_mss: 1460,
            msl_ms: 30_000,
            fin_wait_2_timeout_ms: 60_000,
            keep_alive_interval_ms: 45_000,
        }
    }
}

/// ARP tuning (§4.D).
#[derive(Debug, Clone, Copy)]
pub struct ArpConfig {
    pub max_retries: u32,
    pub request_timeout_ms: u32,
    pub reachable_timeout_ms: u32,
    pub stale_probe_timeout_ms: u32,
}

impl Default for ArpConfig {
    fn default() -> Self {
        ArpConfig {
            max_retries: 3,
            request_timeout_ms: 1_000,
            reachable_timeout_ms: 60_000,
            stale_probe_timeout_ms: 2_000,
        }
    }
}

/// IP-layer tuning (§4.E).
#[derive(Debug, Clone, Copy)]
pub struct IpConfig {
    pub reassembly_timeout_ms: u32,
    pub default_ttl: u8,
}

impl Default for IpConfig {
    fn default() -> Self {
        IpConfig {
            reassembly_timeout_ms: 15_000,
            default_ttl: 64,
        }
    }
}

/// Per-sub-protocol tick intervals (§4.I), in milliseconds. Each must be a
/// multiple of `tick_interval_ms` or it will simply fire on the next tick
/// that crosses its accumulator threshold.
#[derive(Debug, Clone, Copy)]
pub struct TickIntervals {
    pub nic_poll_ms: u32,
    pub arp_ms: u32,
    pub ipv4_frag_ms: u32,
    pub igmp_ms: u32,
    pub ipv6_frag_ms: u32,
    pub mld_ms: u32,
    pub ndp_ms: u32,
    pub tcp_ms: u32,
    pub dns_cache_ms: u32,
}

impl Default for TickIntervals {
    fn default() -> Self {
        TickIntervals {
            nic_poll_ms: 100,
            arp_ms: 1_000,
            ipv4_frag_ms: 1_000,
            igmp_ms: 1_000,
            ipv6_frag_ms: 1_000,
            mld_ms: 1_000,
            ndp_ms: 1_000,
            tcp_ms: 100,
            dns_cache_ms: 1_000,
        }
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            interface_count: 2,
            tick_interval_ms: 100,
            max_link_change_callbacks: 4,
            max_timer_callbacks: 8,
            max_if_name_len: 8,
            max_hostname_len: 24,
            max_sockets: 16,
            arp_cache_size: 8,
            ndp_cache_size: 8,
            reassembly_slots: 4,
            rand_seed_size: 16,
            tcp: TcpConfig::default(),
            arp: ArpConfig::default(),
            ip: IpConfig::default(),
            tick: TickIntervals::default(),
        }
    }
}

impl StackConfig {
    /// Validates cross-field invariants that `Default` upholds trivially
    /// but a caller-supplied config might not.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.interface_count == 0 {
            return Err(crate::error::Error::InvalidParameter);
        }
        if self.tick_interval_ms < 10 {
            return Err(crate::error::Error::InvalidParameter);
        }
        if self.rand_seed_size < 10 {
            return Err(crate::error::Error::InvalidParameter);
        }
        Ok(())
    }
}
