//! The TCP control block and its state transition function (§4.G, §9
//! design note: "model as a pure state transition function `tick(tcb,
//! now) -> {actions}`" so the retransmit/congestion logic is unit
//! testable without wall-clock time).

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use super::segment::Flags;
use super::state::State;
use crate::config::TcpConfig;
use crate::error::Error;
use crate::{Duration, Instant};

/// One segment still awaiting acknowledgment, kept in sequence order so the
/// retransmit queue's head is always `SND.UNA` (§3 invariant).
struct UnackedSegment {
    seq: u32,
    data: Vec<u8>,
    flags: Flags,
    sent_at: Instant,
    retransmitted: bool,
}

impl UnackedSegment {
    /// Logical length including the one sequence number consumed by SYN or
    /// FIN, per RFC 793's sequence-space accounting.
    fn seq_len(&self) -> u32 {
        let mut len = self.data.len() as u32;
        if self.flags.contains(Flags::SYN) {
            len += 1;
        }
        if self.flags.contains(Flags::FIN) {
            len += 1;
        }
        len
    }
}

struct OutOfOrderSegment {
    seq: u32,
    data: Vec<u8>,
}

/// What the caller must do after feeding a segment or a tick into a
/// [`Tcb`]: transmit a wire segment, deliver newly-in-order bytes to the
/// socket's receive buffer, or raise a socket event.
#[derive(Debug, Clone)]
pub enum TcpAction {
    Transmit {
        seq: u32,
        ack: u32,
        flags: Flags,
        window: u16,
        mss: Option<u16>,
        payload: Vec<u8>,
    },
    DeliverToReceiveBuffer(Vec<u8>),
    RaiseEstablished,
    RaiseClosed,
    RaiseError(Error),
}

/// A TCP control block (§3 data model). `tick` and `on_segment` are the
/// only two ways its state advances; both return the actions the caller
/// (socket layer) must carry out, rather than performing I/O themselves.
pub struct Tcb {
    pub state: State,

    snd_una: u32,
    snd_nxt: u32,
    snd_wnd: u16,
    iss: u32,

    rcv_nxt: u32,
    rcv_wnd: u16,
    irs: u32,

    pub mss: u16,
    smss: u32,

    cwnd: u32,
    ssthresh: u32,
    recover: u32,
    dup_ack_count: u32,
    in_recovery: bool,

    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    rtt_sample_seq: Option<u32>,
    rtt_sample_sent_at: Instant,

    retransmit_count: u32,
    retransmit_deadline: Option<Instant>,
    persist_deadline: Option<Instant>,
    persist_interval: u32,
    override_deadline: Option<Instant>,
    keep_alive_deadline: Option<Instant>,
    fin_wait_2_deadline: Option<Instant>,
    time_wait_deadline: Option<Instant>,

    retransmit_queue: VecDeque<UnackedSegment>,
    out_of_order: Vec<OutOfOrderSegment>,
    pub tx_buffer: VecDeque<u8>,
    pub rx_buffer: VecDeque<u8>,

    config: TcpConfig,
}

impl Tcb {
    pub fn new(config: TcpConfig, iss: u32) -> Self {
        Tcb {
            state: State::Closed,
            snd_una: iss,
            snd_nxt: iss,
            snd_wnd: 0,
            iss,
            rcv_nxt: 0,
            rcv_wnd: 65535,
            irs: 0,
            mss: config.default_mss,
            smss: u32::from(config.default_mss),
            cwnd: u32::from(config.default_mss),
            ssthresh: u32::MAX,
            recover: iss,
            dup_ack_count: 0,
            in_recovery: false,
            srtt: None,
            rttvar: Duration::from_millis(0),
            rto: Duration::from_millis(u64::from(config.initial_rto_ms)),
            rtt_sample_seq: None,
            rtt_sample_sent_at: Instant::ZERO,
            retransmit_count: 0,
            retransmit_deadline: None,
            persist_deadline: None,
            persist_interval: config.initial_rto_ms,
            override_deadline: None,
            keep_alive_deadline: None,
            fin_wait_2_deadline: None,
            time_wait_deadline: None,
            retransmit_queue: VecDeque::new(),
            out_of_order: Vec::new(),
            tx_buffer: VecDeque::new(),
            rx_buffer: VecDeque::new(),
            config,
        }
    }

    fn flight_size(&self) -> u32 {
        self.snd_nxt.wrapping_sub(self.snd_una)
    }

    fn usable_window(&self) -> u32 {
        let window = u32::from(self.snd_wnd).min(self.cwnd);
        window.saturating_sub(self.flight_size())
    }

    /// Begins an active open (connect): sends SYN carrying `mss`.
    pub fn open_active(&mut self, now: Instant) -> Vec<TcpAction> {
        self.state = State::SynSent;
        let seg = UnackedSegment {
            seq: self.iss,
            data: Vec::new(),
            flags: Flags::SYN,
            sent_at: now,
            retransmitted: false,
        };
        self.snd_nxt = self.iss.wrapping_add(1);
        self.retransmit_deadline = Some(now + self.rto);
        let action = self.transmit_action(&seg, self.rcv_nxt);
        self.retransmit_queue.push_back(seg);
        alloc::vec![action]
    }

    /// Begins a passive open (listen). Produces no actions by itself; the
    /// SYN-ACK is emitted from [`Tcb::on_segment`] once a SYN arrives.
    pub fn open_passive(&mut self) {
        self.state = State::Listen;
    }

    /// User-initiated close. Sends FIN if there is anything to acknowledge
    /// yet, per the state's half of RFC 793 §3.5.
    pub fn close(&mut self, now: Instant) -> Vec<TcpAction> {
        match self.state {
            State::Established => {
                self.state = State::FinWait1;
                alloc::vec![self.send_fin(now)]
            }
            State::CloseWait => {
                self.state = State::LastAck;
                alloc::vec![self.send_fin(now)]
            }
            State::SynSent | State::Listen => {
                self.state = State::Closed;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn send_fin(&mut self, now: Instant) -> TcpAction {
        let seg = UnackedSegment {
            seq: self.snd_nxt,
            data: Vec::new(),
            flags: Flags::FIN | Flags::ACK,
            sent_at: now,
            retransmitted: false,
        };
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        if self.retransmit_deadline.is_none() {
            self.retransmit_deadline = Some(now + self.rto);
        }
        let action = self.transmit_action(&seg, self.rcv_nxt);
        self.retransmit_queue.push_back(seg);
        action
    }

    fn transmit_action(&self, seg: &UnackedSegment, ack: u32) -> TcpAction {
        TcpAction::Transmit {
            seq: seg.seq,
            ack,
            flags: seg.flags,
            window: self.rcv_wnd,
            mss: seg.flags.contains(Flags::SYN).then_some(self.mss),
            payload: seg.data.clone(),
        }
    }

    /// Queues user data for transmission and immediately sends as much of
    /// it as the window allows.
    pub fn send(&mut self, data: &[u8], now: Instant) -> Vec<TcpAction> {
        self.tx_buffer.extend(data.iter().copied());
        self.drain_send_buffer(now)
    }

    fn drain_send_buffer(&mut self, now: Instant) -> Vec<TcpAction> {
        let mut actions = Vec::new();
        if !self.state.can_send() {
            return actions;
        }
        loop {
            let usable = self.usable_window();
            if usable == 0 || self.tx_buffer.is_empty() {
                break;
            }
            let chunk_len = usable.min(self.smss).min(self.tx_buffer.len() as u32) as usize;
            if chunk_len == 0 {
                // SWS avoidance: not enough usable window or data for a
                // full segment; arm the override timer instead of
                // chattering tiny segments (§4.G "SWS override").
                if self.override_deadline.is_none() {
                    self.override_deadline = Some(now + Duration::from_millis(u64::from(self.config.override_timeout_ms)));
                }
                break;
            }
            let data: Vec<u8> = self.tx_buffer.drain(..chunk_len).collect();
            let seg = UnackedSegment {
                seq: self.snd_nxt,
                data,
                flags: Flags::ACK,
                sent_at: now,
                retransmitted: false,
            };
            self.snd_nxt = self.snd_nxt.wrapping_add(chunk_len as u32);
            if self.retransmit_deadline.is_none() {
                self.retransmit_deadline = Some(now + self.rto);
            }
            if self.rtt_sample_seq.is_none() {
                self.rtt_sample_seq = Some(seg.seq);
                self.rtt_sample_sent_at = now;
            }
            actions.push(self.transmit_action(&seg, self.rcv_nxt));
            self.retransmit_queue.push_back(seg);
        }
        actions
    }

    /// Feeds one received segment into the state machine.
    pub fn on_segment(
        &mut self,
        seq: u32,
        ack: u32,
        flags: Flags,
        window: u16,
        payload: &[u8],
        now: Instant,
    ) -> Vec<TcpAction> {
        match self.state {
            State::Closed => Vec::new(),
            State::Listen => self.on_segment_listen(seq, flags, now),
            State::SynSent => self.on_segment_syn_sent(seq, ack, flags, window, now),
            _ => self.on_segment_synchronized(seq, ack, flags, window, payload, now),
        }
    }

    fn on_segment_listen(&mut self, seq: u32, flags: Flags, now: Instant) -> Vec<TcpAction> {
        if !flags.contains(Flags::SYN) {
            return Vec::new();
        }
        self.irs = seq;
        self.rcv_nxt = seq.wrapping_add(1);
        self.state = State::SynReceived;
        let seg = UnackedSegment {
            seq: self.iss,
            data: Vec::new(),
            flags: Flags::SYN | Flags::ACK,
            sent_at: now,
            retransmitted: false,
        };
        self.snd_nxt = self.iss.wrapping_add(1);
        self.retransmit_deadline = Some(now + self.rto);
        let action = self.transmit_action(&seg, self.rcv_nxt);
        self.retransmit_queue.push_back(seg);
        alloc::vec![action]
    }

    fn on_segment_syn_sent(
        &mut self,
        seq: u32,
        ack: u32,
        flags: Flags,
        window: u16,
        now: Instant,
    ) -> Vec<TcpAction> {
        if !flags.contains(Flags::SYN) {
            return Vec::new();
        }
        if flags.contains(Flags::ACK) && ack != self.snd_nxt {
            return Vec::new();
        }
        self.irs = seq;
        self.rcv_nxt = seq.wrapping_add(1);
        self.snd_wnd = window;
        if flags.contains(Flags::ACK) {
            self.ack_segments(ack, now);
            self.state = State::Established;
            let mut actions = alloc::vec![TcpAction::Transmit {
                seq: self.snd_nxt,
                ack: self.rcv_nxt,
                flags: Flags::ACK,
                window: self.rcv_wnd,
                mss: None,
                payload: Vec::new(),
            }];
            actions.push(TcpAction::RaiseEstablished);
            actions.extend(self.drain_send_buffer(now));
            actions
        } else {
            // Simultaneous open: our SYN is still outstanding.
            self.state = State::SynReceived;
            Vec::new()
        }
    }

    fn on_segment_synchronized(
        &mut self,
        seq: u32,
        ack: u32,
        flags: Flags,
        window: u16,
        payload: &[u8],
        now: Instant,
    ) -> Vec<TcpAction> {
        let mut actions = Vec::new();
        self.snd_wnd = window;

        if flags.contains(Flags::ACK) {
            actions.extend(self.handle_ack(ack, now));
        }

        if seq == self.rcv_nxt && !payload.is_empty() {
            self.rcv_nxt = self.rcv_nxt.wrapping_add(payload.len() as u32);
            self.rx_buffer.extend(payload.iter().copied());
            actions.push(TcpAction::DeliverToReceiveBuffer(payload.to_vec()));
            self.drain_out_of_order(&mut actions);
            actions.push(self.pure_ack());
        } else if seq != self.rcv_nxt && !payload.is_empty() {
            self.out_of_order.push(OutOfOrderSegment {
                seq,
                data: payload.to_vec(),
            });
            actions.push(self.pure_ack());
        }

        if flags.contains(Flags::FIN) {
            self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            actions.push(self.pure_ack());
            self.advance_on_fin(now, &mut actions);
        }

        actions
    }

    fn drain_out_of_order(&mut self, actions: &mut Vec<TcpAction>) {
        loop {
            let Some(idx) = self.out_of_order.iter().position(|s| s.seq == self.rcv_nxt) else {
                break;
            };
            let seg = self.out_of_order.remove(idx);
            self.rcv_nxt = self.rcv_nxt.wrapping_add(seg.data.len() as u32);
            self.rx_buffer.extend(seg.data.iter().copied());
            actions.push(TcpAction::DeliverToReceiveBuffer(seg.data));
        }
    }

    fn advance_on_fin(&mut self, now: Instant, actions: &mut Vec<TcpAction>) {
        self.state = match self.state {
            State::Established => State::CloseWait,
            State::FinWait1 => State::Closing,
            State::FinWait2 => {
                self.time_wait_deadline = Some(now + self.msl2());
                self.fin_wait_2_deadline = None;
                State::TimeWait
            }
            other => other,
        };
        let _ = actions;
    }

    fn msl2(&self) -> Duration {
        Duration::from_millis(u64::from(self.config.msl_ms) * 2)
    }

    fn pure_ack(&self) -> TcpAction {
        TcpAction::Transmit {
            seq: self.snd_nxt,
            ack: self.rcv_nxt,
            flags: Flags::ACK,
            window: self.rcv_wnd,
            mss: None,
            payload: Vec::new(),
        }
    }

    /// Processes an incoming ACK: advances `SND.UNA`, retires acknowledged
    /// segments, samples RTT (Karn's algorithm), and runs Reno congestion
    /// control / NewReno fast-retransmit (§4.G).
    fn handle_ack(&mut self, ack: u32, now: Instant) -> Vec<TcpAction> {
        let mut actions = Vec::new();
        let advancing = ack.wrapping_sub(self.snd_una) as i32 > 0 && ack.wrapping_sub(self.snd_nxt) as i32 <= 0;

        if !advancing {
            if ack == self.snd_una && !self.retransmit_queue.is_empty() {
                self.dup_ack_count += 1;
                if self.dup_ack_count == 3 {
                    self.enter_fast_retransmit(now, &mut actions);
                } else if self.dup_ack_count > 3 && self.in_recovery {
                    self.cwnd += self.smss;
                }
            }
            return actions;
        }

        self.dup_ack_count = 0;
        let was_recovering = self.in_recovery;
        self.ack_segments(ack, now);

        if was_recovering {
            if ack.wrapping_sub(self.recover) as i32 >= 0 {
                self.cwnd = self.ssthresh;
                self.in_recovery = false;
            }
        } else if self.cwnd < self.ssthresh {
            self.cwnd += self.smss; // slow start
        } else {
            self.cwnd += core::cmp::max(1, self.smss * self.smss / self.cwnd.max(1)); // congestion avoidance
        }

        if self.retransmit_queue.is_empty() {
            self.retransmit_deadline = None;
            self.persist_deadline = None;
        } else {
            self.retransmit_deadline = Some(now + self.rto);
        }

        self.progress_state_on_ack(ack, now, &mut actions);
        actions.extend(self.drain_send_buffer(now));
        actions
    }

    fn progress_state_on_ack(&mut self, ack: u32, now: Instant, actions: &mut Vec<TcpAction>) {
        match self.state {
            State::SynReceived if ack == self.snd_nxt => {
                self.state = State::Established;
                actions.push(TcpAction::RaiseEstablished);
            }
            State::FinWait1 if ack == self.snd_nxt => {
                self.state = State::FinWait2;
                self.fin_wait_2_deadline = Some(now + Duration::from_millis(u64::from(self.config.fin_wait_2_timeout_ms)));
            }
            State::Closing if ack == self.snd_nxt => {
                self.state = State::TimeWait;
                self.time_wait_deadline = Some(now + self.msl2());
            }
            State::LastAck if ack == self.snd_nxt => {
                self.state = State::Closed;
                actions.push(TcpAction::RaiseClosed);
            }
            _ => {}
        }
    }

    fn enter_fast_retransmit(&mut self, now: Instant, actions: &mut Vec<TcpAction>) {
        let flight = self.flight_size();
        self.ssthresh = core::cmp::max(flight / 2, 2 * self.smss);
        self.cwnd = self.ssthresh + 3 * self.smss;
        self.recover = self.snd_nxt.wrapping_sub(1);
        self.in_recovery = true;
        if let Some(seg) = self.retransmit_queue.front_mut() {
            seg.sent_at = now;
            seg.retransmitted = true;
            self.rtt_sample_seq = None;
            actions.push(TcpAction::Transmit {
                seq: seg.seq,
                ack: self.rcv_nxt,
                flags: seg.flags,
                window: self.rcv_wnd,
                mss: None,
                payload: seg.data.clone(),
            });
        }
    }

    /// Removes fully-acknowledged segments from the retransmit queue and,
    /// per Karn's algorithm, only samples RTT from a segment that was
    /// never retransmitted.
    fn ack_segments(&mut self, ack: u32, now: Instant) {
        self.snd_una = ack;
        while let Some(seg) = self.retransmit_queue.front() {
            let seg_end = seg.seq.wrapping_add(seg.seq_len());
            if ack.wrapping_sub(seg_end) as i32 >= 0 {
                let seg = self.retransmit_queue.pop_front().unwrap();
                if !seg.retransmitted && self.rtt_sample_seq == Some(seg.seq) {
                    self.sample_rtt(now.saturating_sub(self.rtt_sample_sent_at));
                    self.rtt_sample_seq = None;
                }
            } else {
                break;
            }
        }
        self.retransmit_count = 0;
    }

    /// RFC 6298 RTO estimator update from one RTT sample.
    fn sample_rtt(&mut self, sample: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.rttvar = Duration(sample.0 / 2);
            }
            Some(srtt) => {
                let diff = if srtt.0 > sample.0 { srtt.0 - sample.0 } else { sample.0 - srtt.0 };
                self.rttvar = Duration((self.rttvar.0 * 3 + diff) / 4);
                self.srtt = Some(Duration((srtt.0 * 7 + sample.0) / 8));
            }
        }
        let srtt = self.srtt.unwrap();
        self.rto = Duration(srtt.0 + 4 * self.rttvar.0).max(Duration::from_millis(1));
    }

    /// Advances every running timer; the scheduler's TCP tick slot calls
    /// this once per configured interface per tick (§4.I).
    pub fn tick(&mut self, now: Instant) -> Vec<TcpAction> {
        let mut actions = Vec::new();

        if let Some(deadline) = self.retransmit_deadline {
            if now >= deadline {
                self.on_retransmit_timeout(now, &mut actions);
            }
        }
        if let Some(deadline) = self.persist_deadline {
            if now >= deadline {
                self.on_persist_timeout(now, &mut actions);
            }
        }
        if let Some(deadline) = self.override_deadline {
            if now >= deadline {
                self.override_deadline = None;
                actions.extend(self.force_send(now));
            }
        }
        if let Some(deadline) = self.fin_wait_2_deadline {
            if now >= deadline {
                self.fin_wait_2_deadline = None;
                self.state = State::Closed;
                actions.push(TcpAction::RaiseClosed);
            }
        }
        if let Some(deadline) = self.time_wait_deadline {
            if now >= deadline {
                self.time_wait_deadline = None;
                self.state = State::Closed;
                actions.push(TcpAction::RaiseClosed);
            }
        }

        actions
    }

    /// Forces transmission of whatever is queued, bypassing SWS avoidance
    /// (the override timer's whole purpose).
    fn force_send(&mut self, now: Instant) -> Vec<TcpAction> {
        if self.tx_buffer.is_empty() || !self.state.can_send() {
            return Vec::new();
        }
        let chunk_len = (self.tx_buffer.len() as u32).min(self.smss) as usize;
        let data: Vec<u8> = self.tx_buffer.drain(..chunk_len).collect();
        let seg = UnackedSegment {
            seq: self.snd_nxt,
            data,
            flags: Flags::ACK,
            sent_at: now,
            retransmitted: false,
        };
        self.snd_nxt = self.snd_nxt.wrapping_add(chunk_len as u32);
        if self.retransmit_deadline.is_none() {
            self.retransmit_deadline = Some(now + self.rto);
        }
        let action = self.transmit_action(&seg, self.rcv_nxt);
        self.retransmit_queue.push_back(seg);
        alloc::vec![action]
    }

    /// RTO expiry policy (§4.G "RTO" bullet, verbatim): loss-window entry
    /// on the first timeout since the last successful ACK, exponential
    /// backoff capped at `max_rto_ms`, connection drop after
    /// `max_retries` retransmissions.
    fn on_retransmit_timeout(&mut self, now: Instant, actions: &mut Vec<TcpAction>) {
        if self.retransmit_count == 0 {
            let flight = self.flight_size();
            self.ssthresh = core::cmp::max(flight / 2, 2 * self.smss);
            self.cwnd = self.config.loss_window_segments * self.smss;
            self.recover = self.snd_nxt.wrapping_sub(1);
            self.in_recovery = true;
        }

        if let Some(seg) = self.retransmit_queue.front_mut() {
            seg.sent_at = now;
            seg.retransmitted = true;
            self.rtt_sample_seq = None;
            actions.push(TcpAction::Transmit {
                seq: seg.seq,
                ack: self.rcv_nxt,
                flags: seg.flags,
                window: self.rcv_wnd,
                mss: None,
                payload: seg.data.clone(),
            });
        }

        self.rto = Duration((self.rto.0 * 2).min(u64::from(self.config.max_rto_ms) * 1000));
        self.retransmit_count += 1;

        if self.retransmit_count > self.config.max_retries {
            self.state = State::Closed;
            self.retransmit_deadline = None;
            actions.push(TcpAction::RaiseError(Error::ConnectionClosed));
            return;
        }

        self.retransmit_deadline = Some(now + self.rto);
    }

    /// Zero-window probe policy (§4.G "Zero-window probe (persist
    /// timer)"): a 1-byte probe at `SND.NXT - 1`, doubling interval capped
    /// at `max_probe_interval_ms`, connection drop after `max_retries`.
    fn on_persist_timeout(&mut self, now: Instant, actions: &mut Vec<TcpAction>) {
        self.retransmit_count += 1;
        if self.retransmit_count > self.config.max_retries {
            self.state = State::Closed;
            self.persist_deadline = None;
            actions.push(TcpAction::RaiseError(Error::ConnectionClosed));
            return;
        }
        actions.push(TcpAction::Transmit {
            seq: self.snd_nxt.wrapping_sub(1),
            ack: self.rcv_nxt,
            flags: Flags::ACK,
            window: self.rcv_wnd,
            mss: None,
            payload: alloc::vec![0u8],
        });
        self.persist_interval = (self.persist_interval * 2).min(self.config.max_probe_interval_ms);
        self.persist_deadline = Some(now + Duration::from_millis(u64::from(self.persist_interval)));
    }

    /// Arms the persist timer once the peer's advertised window drops to
    /// zero while data is queued to send.
    pub fn note_zero_window(&mut self, now: Instant) {
        if self.snd_wnd == 0 && self.persist_deadline.is_none() && !self.tx_buffer.is_empty() {
            self.persist_interval = self.config.initial_rto_ms;
            self.persist_deadline = Some(now + Duration::from_millis(u64::from(self.persist_interval)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TcpConfig {
        TcpConfig::default()
    }

    #[test]
    fn three_way_handshake_with_mss_option() {
        let mut a = Tcb::new(cfg(), 1000);
        let actions = a.open_active(Instant::ZERO);
        assert!(matches!(&actions[0], TcpAction::Transmit { flags, mss: Some(1460), .. } if flags.contains(Flags::SYN)));

        let mut b = Tcb::new(cfg(), 5000);
        b.open_passive();
        let syn_ack = b.on_segment_listen(1000, Flags::SYN, Instant::ZERO);
        assert!(matches!(&syn_ack[0], TcpAction::Transmit { flags, .. } if flags.contains(Flags::SYN) && flags.contains(Flags::ACK)));

        let established = a.on_segment(5000, 1001, Flags::SYN | Flags::ACK, 64240, &[], Instant::ZERO);
        assert!(established.iter().any(|a| matches!(a, TcpAction::RaiseEstablished)));
        assert_eq!(a.state, State::Established);

        let final_ack = b.on_segment(1001, 5001, Flags::ACK, 64240, &[], Instant::ZERO);
        assert!(final_ack.iter().any(|a| matches!(a, TcpAction::RaiseEstablished)));
        assert_eq!(b.state, State::Established);
    }

    #[test]
    fn rto_doubles_until_cap_then_connection_closes() {
        let mut cfg = cfg();
        cfg.initial_rto_ms = 1000;
        cfg.max_rto_ms = 4000;
        cfg.max_retries = 2;
        let mut a = Tcb::new(cfg, 0);
        a.state = State::Established;
        a.send(b"hello", Instant::ZERO);

        let mut now = Instant::from_millis(1000);
        a.tick(now); // first retransmit, rto -> 2000
        assert_eq!(a.rto, Duration::from_millis(2000));
        now = now + Duration::from_millis(2000);
        a.tick(now); // second retransmit, rto -> 4000 (capped)
        assert_eq!(a.rto, Duration::from_millis(4000));
        now = now + Duration::from_millis(4000);
        let actions = a.tick(now); // exceeds max_retries -> closed
        assert_eq!(a.state, State::Closed);
        assert!(actions.iter().any(|act| matches!(act, TcpAction::RaiseError(_))));
    }

    #[test]
    fn fast_retransmit_on_three_duplicate_acks() {
        let mut a = Tcb::new(cfg(), 0);
        a.state = State::Established;
        a.snd_una = 100;
        a.snd_nxt = 1100;
        a.retransmit_queue.push_back(UnackedSegment {
            seq: 100,
            data: alloc::vec![0u8; 1000],
            flags: Flags::ACK,
            sent_at: Instant::ZERO,
            retransmitted: false,
        });
        for _ in 0..3 {
            let actions = a.handle_ack(100, Instant::ZERO);
            if a.dup_ack_count == 3 {
                assert!(actions.iter().any(|act| matches!(act, TcpAction::Transmit { .. })));
            }
        }
        assert!(a.in_recovery);
    }

    #[test]
    fn out_of_order_segment_delivered_once_gap_fills() {
        let mut a = Tcb::new(cfg(), 0);
        a.state = State::Established;
        a.rcv_nxt = 0;
        let actions = a.on_segment(10, 0, Flags::ACK, 1000, b"world", Instant::ZERO);
        assert!(actions.iter().all(|act| !matches!(act, TcpAction::DeliverToReceiveBuffer(_))));
        let actions = a.on_segment(0, 0, Flags::ACK, 1000, b"hello", Instant::ZERO);
        let delivered: Vec<_> = actions
            .into_iter()
            .filter_map(|act| match act {
                TcpAction::DeliverToReceiveBuffer(data) => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(delivered, alloc::vec![b"hello".to_vec(), b"world".to_vec()]);
        assert_eq!(a.rcv_nxt, 15);
    }

    #[test]
    fn time_wait_lasts_exactly_two_msl() {
        let mut cfg = cfg();
        cfg.msl_ms = 1000;
        let mut a = Tcb::new(cfg, 0);
        a.state = State::Closing;
        a.time_wait_deadline = Some(Instant::from_millis(2000));
        a.tick(Instant::from_millis(1999));
        assert_eq!(a.state, State::Closing);
        a.tick(Instant::from_millis(2000));
        assert_eq!(a.state, State::Closed);
    }
}
