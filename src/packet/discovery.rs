use super::{
    PacketError, VECTOR_ROOT_EXTENDED, decode_cid, encode_root_layer, flags_and_length,
    source_name_from_str, source_name_to_string,
};
use crate::{ComponentIdentifier, UniverseNumber};
use arrayvec::ArrayVec;

/// The maximum number of universes one discovery page can announce.
pub const MAX_UNIVERSES_PER_PAGE: usize = 512;

/// The universes announced by a single discovery page.
pub type UniverseList = ArrayVec<UniverseNumber, MAX_UNIVERSES_PER_PAGE>;

/// An E1.31 Universe Discovery Packet.
///
/// A source periodically announces the universes it actively transmits.
/// One packet carries up to 512 universes; longer lists span multiple pages
/// (see [DiscoveryPacket::pages]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPacket {
    cid: ComponentIdentifier,
    source_name: [u8; 64],
    page: u8,
    last_page: u8,
    universes: UniverseList,
}

impl DiscoveryPacket {
    /// Framing layer vector of a universe discovery packet (E1.31 6.4.1).
    pub(crate) const VECTOR: [u8; 4] = [0x00, 0x00, 0x00, 0x02];
    /// Universe discovery layer vector (E1.31 8.2).
    const VECTOR_UNIVERSE_LIST: [u8; 4] = [0x00, 0x00, 0x00, 0x01];
    /// The length of a packet announcing zero universes.
    const MIN_LENGTH: usize = 120;

    /// Creates a new single page [DiscoveryPacket]. The universes are sorted
    /// ascending as E1.31 8 requires.
    pub fn new(
        cid: ComponentIdentifier,
        source_name: &str,
        universes: &[UniverseNumber],
    ) -> Result<Self, PacketError> {
        if universes.len() > MAX_UNIVERSES_PER_PAGE {
            return Err(PacketError::InvalidUniverseCount(universes.len()));
        }

        let source_name = source_name_from_str(source_name)?;
        let mut universes: UniverseList = universes.iter().copied().collect();
        universes.sort_unstable();

        Ok(DiscoveryPacket { cid, source_name, page: 0, last_page: 0, universes })
    }

    /// Builds the discovery pages for an arbitrarily long universe list:
    /// ⌈universes / 512⌉ packets, each stamped with its page number and the
    /// shared last page number. An empty list yields no packets.
    pub fn pages(
        cid: ComponentIdentifier,
        source_name: &str,
        universes: &[UniverseNumber],
    ) -> Result<Vec<Self>, PacketError> {
        let source_name = source_name_from_str(source_name)?;
        let mut universes = universes.to_vec();
        universes.sort_unstable();

        let last_page = universes.chunks(MAX_UNIVERSES_PER_PAGE).count().saturating_sub(1) as u8;
        let pages = universes
            .chunks(MAX_UNIVERSES_PER_PAGE)
            .enumerate()
            .map(|(page, chunk)| DiscoveryPacket {
                cid,
                source_name,
                page: page as u8,
                last_page,
                universes: chunk.iter().copied().collect(),
            })
            .collect();
        Ok(pages)
    }

    /// The CID of the source that sent this packet.
    pub fn cid(&self) -> &ComponentIdentifier {
        &self.cid
    }

    /// The source name, with the null padding stripped.
    pub fn source_name(&self) -> String {
        source_name_to_string(&self.source_name)
    }

    /// The page number of this packet.
    pub fn page(&self) -> u8 {
        self.page
    }

    /// The number of the last page in this discovery cycle.
    pub fn last_page(&self) -> u8 {
        self.last_page
    }

    /// The universes announced by this page, sorted ascending.
    pub fn universes(&self) -> &[UniverseNumber] {
        &self.universes
    }

    /// The length of the encoded packet: 120 bytes plus two per universe.
    pub fn length(&self) -> usize {
        Self::MIN_LENGTH + self.universes.len() * 2
    }

    /// Encodes this packet into its wire form.
    pub fn encode(&self) -> Vec<u8> {
        let length = self.length();
        let mut bytes = Vec::with_capacity(length);
        encode_root_layer(&mut bytes, length, VECTOR_ROOT_EXTENDED, &self.cid);

        // E1.31 6.4 Framing layer.
        bytes.extend(flags_and_length(length - 38));
        bytes.extend(Self::VECTOR);
        bytes.extend(self.source_name);
        bytes.extend([0x00; 4]); // E1.31 6.4.3 reserved

        // E1.31 8 Universe discovery layer.
        bytes.extend(flags_and_length(length - 112));
        bytes.extend(Self::VECTOR_UNIVERSE_LIST);
        bytes.push(self.page);
        bytes.push(self.last_page);
        bytes.extend(self.universes.iter().flat_map(|universe| universe.to_be_bytes()));
        bytes
    }

    /// Decodes a network ordered slice of bytes into a new [DiscoveryPacket].
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::MIN_LENGTH {
            return Err(PacketError::MalformedLength { got: data.len(), need: Self::MIN_LENGTH });
        }

        // E1.31 5.5 Root Layer: Vector
        let root_vector = [data[18], data[19], data[20], data[21]];
        if root_vector != VECTOR_ROOT_EXTENDED {
            return Err(PacketError::InvalidRootVector(root_vector));
        }

        // E1.31 6.4.1 Universe Discovery Packet: Vector
        let framing_vector = [data[40], data[41], data[42], data[43]];
        if framing_vector != Self::VECTOR {
            return Err(PacketError::InvalidFramingVector(framing_vector));
        }

        // E1.31 8.2 Universe Discovery Layer: Vector
        let list_vector = [data[114], data[115], data[116], data[117]];
        if list_vector != Self::VECTOR_UNIVERSE_LIST {
            return Err(PacketError::InvalidUniverseDiscoveryVector(list_vector));
        }

        // E1.31 8.1: the universe discovery layer length covers its 8 header
        // bytes plus the universe list.
        let layer_length = (u16::from_be_bytes([data[112], data[113]]) & 0xFFF) as usize;
        let list_bytes = layer_length.saturating_sub(8);
        if list_bytes % 2 != 0 || data.len() < Self::MIN_LENGTH + list_bytes {
            return Err(PacketError::MalformedLength {
                got: data.len(),
                need: Self::MIN_LENGTH + list_bytes,
            });
        }
        if list_bytes / 2 > MAX_UNIVERSES_PER_PAGE {
            return Err(PacketError::InvalidUniverseCount(list_bytes / 2));
        }

        let universes = data[Self::MIN_LENGTH..Self::MIN_LENGTH + list_bytes]
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes(chunk.try_into().unwrap()))
            .collect();

        Ok(DiscoveryPacket {
            cid: decode_cid(data),
            source_name: data[44..108].try_into().unwrap(),
            page: data[118],
            last_page: data[119],
            universes,
        })
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
        let built = DiscoveryPacket::new(cid(), "Test Name", &[3, 1, 2, 63999]).unwrap();

        let bytes = built.encode();
        assert_eq!(bytes.len(), 120 + 2 * 4);

        let read = DiscoveryPacket::decode(&bytes).unwrap();
        assert_eq!(read.source_name(), "Test Name");
        assert_eq!(read.universes(), &[1, 2, 3, 63999]);
        assert_eq!(read, built);
    }

    #[test]
    fn empty_page_roundtrip() {
        let built = DiscoveryPacket::new(cid(), "Test", &[]).unwrap();
        let bytes = built.encode();
        assert_eq!(bytes.len(), 120);
        assert_eq!(DiscoveryPacket::decode(&bytes).unwrap(), built);
    }

    #[test]
    fn pages_splits_long_universe_lists() {
        let universes: Vec<UniverseNumber> = (1..=1000).rev().collect();
        let pages = DiscoveryPacket::pages(cid(), "Test", &universes).unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page(), 0);
        assert_eq!(pages[1].page(), 1);
        assert!(pages.iter().all(|page| page.last_page() == 1));

        // Sorted ascending across the page boundary.
        assert_eq!(pages[0].universes().first(), Some(&1));
        assert_eq!(pages[0].universes().last(), Some(&512));
        assert_eq!(pages[1].universes().first(), Some(&513));
        assert_eq!(pages[1].universes().last(), Some(&1000));
    }

    #[test]
    fn pages_of_empty_list_is_empty() {
        assert!(DiscoveryPacket::pages(cid(), "Test", &[]).unwrap().is_empty());
    }

    #[test]
    fn too_many_universes_for_one_page() {
        let universes: Vec<UniverseNumber> = (1..=513).collect();
        assert!(matches!(
            DiscoveryPacket::new(cid(), "Test", &universes),
            Err(PacketError::InvalidUniverseCount(513))
        ));
    }

    #[test]
    fn decode_rejects_bad_universe_list_vector() {
        let mut bytes = DiscoveryPacket::new(cid(), "Test", &[1]).unwrap().encode();
        bytes[117] = 0x02;
        assert!(matches!(
            DiscoveryPacket::decode(&bytes),
            Err(PacketError::InvalidUniverseDiscoveryVector(_))
        ));
    }

    #[test]
    fn decode_rejects_truncated_universe_list() {
        let bytes = DiscoveryPacket::new(cid(), "Test", &[1, 2, 3]).unwrap().encode();
        assert!(matches!(
            DiscoveryPacket::decode(&bytes[..bytes.len() - 2]),
            Err(PacketError::MalformedLength { .. })
        ));
    }
}
