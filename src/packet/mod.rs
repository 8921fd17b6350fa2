//! # Packets
//!
//! sACN has three packet types:
//! - Data Packets
//! - Synchronization Packets
//! - Universe Discovery Packets
//!
//! Every packet is a complete UDP payload: the ACN root layer (preamble,
//! flags & length, vector, CID) followed by the type-specific framing and
//! payload layers. [Packet::decode] turns a received datagram into the
//! matching variant; each variant encodes back to the identical bytes.

use crate::{ComponentIdentifier, MAX_PRIORITY, MAX_UNIVERSE_NUMBER, UniverseNumber};

mod data;
mod discovery;
mod error;
mod sync;

pub use data::DataPacket;
pub use discovery::DiscoveryPacket;
pub use error::PacketError;
pub use sync::SyncPacket;

/// E1.31 5.1-5.3: RLP preamble size, postamble size and ACN packet identifier.
#[rustfmt::skip]
pub(crate) const PREAMBLE: [u8; 16] = [
    0x00, 0x10, // RLP Preamble Size
    0x00, 0x00, // RLP Postamble Size
    0x41, 0x53, 0x43, 0x2d, 0x45, 0x31, 0x2e, 0x31, 0x37, 0x00, 0x00, 0x00, // "ASC-E1.17"
];

/// Root layer vector of a data packet (E1.31 5.5).
pub(crate) const VECTOR_ROOT_DATA: [u8; 4] = [0x00, 0x00, 0x00, 0x04];
/// Root layer vector of the extended packets, i.e. sync and discovery (E1.31 5.5).
pub(crate) const VECTOR_ROOT_EXTENDED: [u8; 4] = [0x00, 0x00, 0x00, 0x08];

/// Any E1.31 packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A data packet.
    Data(DataPacket),
    /// A synchronization packet.
    Sync(SyncPacket),
    /// A universe discovery packet.
    Discovery(DiscoveryPacket),
}

impl Packet {
    /// Decodes a network ordered slice of bytes into a new [Packet].
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < 44 {
            return Err(PacketError::MalformedLength { got: data.len(), need: 44 });
        }

        if data[0..16] != PREAMBLE {
            return Err(PacketError::InvalidPreamble);
        }

        // E1.31 5.5: the root vector identifies data packets; the extended
        // packets are told apart by their framing vector.
        let root_vector = [data[18], data[19], data[20], data[21]];
        match root_vector {
            VECTOR_ROOT_DATA => Ok(Packet::Data(DataPacket::decode(data)?)),
            VECTOR_ROOT_EXTENDED => {
                let framing_vector = [data[40], data[41], data[42], data[43]];
                match framing_vector {
                    SyncPacket::VECTOR => Ok(Packet::Sync(SyncPacket::decode(data)?)),
                    DiscoveryPacket::VECTOR => {
                        Ok(Packet::Discovery(DiscoveryPacket::decode(data)?))
                    }
                    other => Err(PacketError::InvalidFramingVector(other)),
                }
            }
            other => Err(PacketError::InvalidRootVector(other)),
        }
    }

    /// Encodes this [Packet] into a network ordered [`Vec<u8>`].
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::Data(packet) => packet.encode(),
            Packet::Sync(packet) => packet.encode(),
            Packet::Discovery(packet) => packet.encode(),
        }
    }
}

pub(crate) fn validate_universe(universe: UniverseNumber) -> Result<(), PacketError> {
    if !(1..=MAX_UNIVERSE_NUMBER).contains(&universe) {
        return Err(PacketError::InvalidUniverse(universe));
    }
    Ok(())
}

pub(crate) fn validate_priority(priority: u8) -> Result<(), PacketError> {
    if priority > MAX_PRIORITY {
        return Err(PacketError::InvalidPriority(priority));
    }
    Ok(())
}

pub(crate) fn source_name_from_str(source_name: &str) -> Result<[u8; 64], PacketError> {
    let bytes = source_name.as_bytes();
    if bytes.len() > 64 {
        return Err(PacketError::InvalidSourceNameLength(bytes.len()));
    }

    let mut source_name = [0u8; 64];
    source_name[..bytes.len()].copy_from_slice(bytes);
    Ok(source_name)
}

pub(crate) fn source_name_to_string(source_name: &[u8; 64]) -> String {
    let end = source_name.iter().position(|&byte| byte == 0).unwrap_or(source_name.len());
    String::from_utf8_lossy(&source_name[..end]).into_owned()
}

pub(crate) fn flags_and_length(length: usize) -> [u8; 2] {
    // Low 12 bits = PDU length, high 4 bits = 0x7.
    let flags = 0x7 << 12;
    let length = length & 0xFFF;
    (flags | length as u16).to_be_bytes()
}

/// Appends the 38 byte root layer: preamble, flags & length, vector and CID.
pub(crate) fn encode_root_layer(
    bytes: &mut Vec<u8>,
    packet_length: usize,
    vector: [u8; 4],
    cid: &ComponentIdentifier,
) {
    bytes.extend(PREAMBLE);
    // E1.31 5.4: the root layer length covers everything after the preamble.
    bytes.extend(flags_and_length(packet_length - 16));
    bytes.extend(vector);
    bytes.extend(cid.as_bytes());
}

/// Reads the CID out of the root layer. Callers have verified the length.
pub(crate) fn decode_cid(data: &[u8]) -> ComponentIdentifier {
    ComponentIdentifier::from_bytes(data[22..38].try_into().unwrap())
}
