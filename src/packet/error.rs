use crate::UniverseNumber;

/// Error type for constructing, encoding and decoding E1.31 packets.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// The buffer is shorter than the minimum length of its packet kind.
    #[error("packet too short: got {got} bytes, need at least {need}")]
    MalformedLength {
        /// The number of bytes in the buffer.
        got: usize,
        /// The minimum number of bytes required.
        need: usize,
    },

    /// The ACN root layer preamble is missing or wrong.
    #[error("invalid ACN root layer preamble")]
    InvalidPreamble,

    /// Invalid root layer vector.
    #[error("invalid root layer vector: {0:02x?}")]
    InvalidRootVector([u8; 4]),
    /// Invalid framing layer vector.
    #[error("invalid framing layer vector: {0:02x?}")]
    InvalidFramingVector([u8; 4]),
    /// Invalid DMP layer vector.
    #[error("invalid DMP layer vector: {0:02x}")]
    InvalidDmpVector(u8),
    /// Invalid universe discovery layer vector.
    #[error("invalid universe discovery layer vector: {0:02x?}")]
    InvalidUniverseDiscoveryVector([u8; 4]),

    /// Invalid priority.
    #[error("invalid priority: {0}. Must be between 0 and 200.")]
    InvalidPriority(u8),
    /// Invalid universe number.
    #[error("invalid universe: {0}. Must be between 1 and 63999.")]
    InvalidUniverse(UniverseNumber),
    /// Invalid synchronization address.
    #[error("invalid synchronization address: {0}")]
    InvalidSynchronizationAddress(u16),
    /// Invalid source name length.
    #[error("invalid source name length: {0}. Must be between 0 and 64.")]
    InvalidSourceNameLength(usize),
    /// Too many universes for a single universe discovery page.
    #[error("too many universes for one discovery page: {0}. Maximum is 512.")]
    InvalidUniverseCount(usize),
}
