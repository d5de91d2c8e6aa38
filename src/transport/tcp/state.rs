//! TCP connection states (RFC 793 §3.2, §3 data model).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl State {
    pub fn can_send(&self) -> bool {
        matches!(self, State::Established | State::CloseWait)
    }

    pub fn can_receive(&self) -> bool {
        matches!(
            self,
            State::Established | State::FinWait1 | State::FinWait2
        )
    }

    pub fn is_synchronized(&self) -> bool {
        !matches!(self, State::Closed | State::Listen | State::SynSent)
    }
}
