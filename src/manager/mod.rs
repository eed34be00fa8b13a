//! The link-layer protocol layer: framing, addressing, ARQ, and
//! deduplication (`spec.md` §4.H/§4.I).

pub mod buffers;
pub mod fsm;

pub use fsm::{Fsm, FsmEvent, SendOutcome, State, TxFailReason};
