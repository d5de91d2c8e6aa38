//! TCP (§4.G): segment wire format, the connection state machine, and the
//! control block that drives retransmission, congestion control and the
//! various timers off of a single `tick(tcb, now)` entry point.

pub mod segment;
pub mod state;
pub mod tcb;

pub use segment::{Flags, Options, TcpHeader};
pub use state::State;
pub use tcb::{Tcb, TcpAction};
