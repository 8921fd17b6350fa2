use super::{PacketError, VECTOR_ROOT_EXTENDED, decode_cid, encode_root_layer, flags_and_length};
use crate::{ComponentIdentifier, MAX_UNIVERSE_NUMBER};

/// An E1.31 Synchronization Packet.
///
/// Releases all data packets stamped with the same synchronization address
/// at once, so multiple universes update in the same frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPacket {
    cid: ComponentIdentifier,
    sequence_number: u8,
    synchronization_address: u16,
}

impl SyncPacket {
    /// Framing layer vector of a synchronization packet (E1.31 6.3.1).
    pub(crate) const VECTOR: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
    /// The length of an encoded packet, including the two reserved bytes.
    const LENGTH: usize = 49;
    /// The reserved bytes are transmitted but not required on receive.
    const MIN_LENGTH: usize = 47;

    /// Creates a new [SyncPacket].
    pub fn new(
        cid: ComponentIdentifier,
        synchronization_address: u16,
    ) -> Result<Self, PacketError> {
        // E1.31 6.3.3: address 0 means "not synchronized" and never appears
        // in a synchronization packet.
        if !(1..=MAX_UNIVERSE_NUMBER).contains(&synchronization_address) {
            return Err(PacketError::InvalidSynchronizationAddress(synchronization_address));
        }

        Ok(SyncPacket { cid, sequence_number: 0, synchronization_address })
    }

    /// The CID of the source that sent this packet.
    pub fn cid(&self) -> &ComponentIdentifier {
        &self.cid
    }

    /// The sequence number.
    pub fn sequence_number(&self) -> u8 {
        self.sequence_number
    }

    /// Sets the sequence number.
    pub fn set_sequence_number(&mut self, sequence_number: u8) {
        self.sequence_number = sequence_number;
    }

    /// Increments the sequence number, wrapping from 255 back to 0.
    pub fn sequence_increase(&mut self) {
        self.sequence_number = self.sequence_number.wrapping_add(1);
    }

    /// The universe this packet synchronizes.
    pub fn synchronization_address(&self) -> u16 {
        self.synchronization_address
    }

    /// Encodes this packet into its 49 byte wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::LENGTH);
        encode_root_layer(&mut bytes, Self::LENGTH, VECTOR_ROOT_EXTENDED, &self.cid);

        // E1.31 6.3 Framing layer.
        bytes.extend(flags_and_length(Self::LENGTH - 38));
        bytes.extend(Self::VECTOR);
        bytes.push(self.sequence_number);
        bytes.extend(self.synchronization_address.to_be_bytes());
        bytes.extend([0x00, 0x00]); // E1.31 6.3.4 reserved
        bytes
    }

    /// Decodes a network ordered slice of bytes into a new [SyncPacket].
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::MIN_LENGTH {
            return Err(PacketError::MalformedLength { got: data.len(), need: Self::MIN_LENGTH });
        }

        // E1.31 5.5 Root Layer: Vector
        let root_vector = [data[18], data[19], data[20], data[21]];
        if root_vector != VECTOR_ROOT_EXTENDED {
            return Err(PacketError::InvalidRootVector(root_vector));
        }

        // E1.31 6.3.1 Synchronization Packet: Vector
        let framing_vector = [data[40], data[41], data[42], data[43]];
        if framing_vector != Self::VECTOR {
            return Err(PacketError::InvalidFramingVector(framing_vector));
        }

        // E1.31 6.3.3 Synchronization Packet: Synchronization Address
        let mut packet =
            SyncPacket::new(decode_cid(data), u16::from_be_bytes([data[45], data[46]]))?;
        // E1.31 6.3.2 Synchronization Packet: Sequence Number
        packet.set_sequence_number(data[44]);
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid() -> ComponentIdentifier {
        ComponentIdentifier::from_bytes([
            16, 1, 15, 2, 14, 3, 13, 4, 12, 5, 11, 6, 10, 7, 9, 8,
        ])
    }

    #[test]
    fn byte_string_construction_and_deconstruction() {
        let mut built = SyncPacket::new(cid(), 12000).unwrap();
        built.set_sequence_number(34);

        let bytes = built.encode();
        assert_eq!(bytes.len(), 49);

        let read = SyncPacket::decode(&bytes).unwrap();
        assert_eq!(read.sequence_number(), 34);
        assert_eq!(read.synchronization_address(), 12000);
        assert_eq!(read, built);
    }

    #[test]
    fn invalid_synchronization_address_is_rejected() {
        assert!(matches!(
            SyncPacket::new(cid(), 0),
            Err(PacketError::InvalidSynchronizationAddress(0))
        ));
        assert!(matches!(
            SyncPacket::new(cid(), 64000),
            Err(PacketError::InvalidSynchronizationAddress(64000))
        ));
    }

    #[test]
    fn sequence_increase_wraps() {
        let mut packet = SyncPacket::new(cid(), 1).unwrap();
        packet.set_sequence_number(255);
        packet.sequence_increase();
        assert_eq!(packet.sequence_number(), 0);
    }

    #[test]
    fn decode_rejects_short_buffers() {
        let bytes = SyncPacket::new(cid(), 1).unwrap().encode();
        assert!(matches!(
            SyncPacket::decode(&bytes[..46]),
            Err(PacketError::MalformedLength { got: 46, need: 47 })
        ));
    }

    #[test]
    fn decode_rejects_bad_framing_vector() {
        let mut bytes = SyncPacket::new(cid(), 1).unwrap().encode();
        bytes[43] = 0x07;
        assert!(matches!(SyncPacket::decode(&bytes), Err(PacketError::InvalidFramingVector(_))));
    }
}
