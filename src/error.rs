//! Crate-wide error kinds (`spec.md` §7).

/// Failure modes surfaced across the Port/Driver/Manager/Service layers.
///
/// `ProtocolError` and a single attempt's `Timeout` are swallowed inside
/// the layer that detects them and never reach a caller; see each layer's
/// module docs for its specific propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Payload length exceeds the configured MTU.
    InvalidArgument,
    /// Driver or Port is occupied; retry later.
    Busy,
    /// A bounded queue has no free slot.
    QueueFull,
    /// An ACK was not observed within its deadline (single attempt).
    Timeout,
    /// Retries exhausted without an ACK.
    NotAcked,
    /// CRC, version, length, or trailer mismatch while scanning a frame.
    ProtocolError,
    /// Config edit token did not match the stored token.
    ConfigRejected,
    /// Monitor detected the Driver has been busy past `T_stuck`.
    Stuck,
    /// `Driver::init` failed.
    HardwareError,
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
