#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod packet;
pub mod receiver;
pub mod socket;
pub mod source;

use std::net::Ipv4Addr;
use std::time::Duration;

/// # E1.31 3.3 Universe Number.
///
/// Each E1.31 Data Packet contains a universe number identifying the universe
/// it carries. From an ACN perspective, a receiving device has some number of
/// properties whose value is addressed by the combination of a universe number
/// and a data slot number. From an historical perspective, a receiving device
/// consumes some number of DMX512-A data slots.
pub type UniverseNumber = u16;

/// # E1.31 3.4 Slot
pub type Slot = u8;

/// # E1.31 5.6 CID (Component Identifier)
///
/// Each piece of equipment should maintain the same CID for
/// its entire lifetime (e.g. by storing it in read-only memory).
/// This means that a particular component on the network can be identified
/// as the same entity from day to day despite network
/// interruptions, power down, or other disruptions.
///
/// However, in some systems there may be situations in which volatile
/// components are dynamically created "on the fly" and,
/// in these cases, the controlling process can generate CIDs as required.
/// The choice of UUIDs for CIDs allows them to be generated as required
/// without reference to any registration process or authority.
pub type ComponentIdentifier = uuid::Uuid;

/// The default port for sACN.
pub const DEFAULT_PORT: u16 = 5568;

/// The default priority carried by data packets.
pub const DEFAULT_PRIORITY: u8 = 100;

/// The highest valid priority.
pub const MAX_PRIORITY: u8 = 200;

/// The highest valid universe number.
pub const MAX_UNIVERSE_NUMBER: UniverseNumber = 63999;

/// The maximum size of a universe.
pub const MAX_UNIVERSE_SIZE: usize = 512;

/// # E1.31 6.7.1 Network Data Loss
///
/// A universe is considered lost when no data packet for it arrived for this
/// long, or when a source sets the stream-terminated option.
pub const NETWORK_DATA_LOSS_TIMEOUT: Duration = Duration::from_millis(2500);

/// Returns the multicast group address for a universe (E1.31 9.3.1).
///
/// The group for universe `U` is `239.255.HI.LO`, where `HI` and `LO` are the
/// two bytes of the universe number.
pub fn multicast_addr(universe: UniverseNumber) -> Ipv4Addr {
    let [hi, lo] = universe.to_be_bytes();
    Ipv4Addr::new(239, 255, hi, lo)
}

#[cfg(test)]
mod tests {
    use super::multicast_addr;

    #[test]
    fn multicast_addr_range_bounds() {
        assert_eq!(multicast_addr(1).to_string(), "239.255.0.1");
        assert_eq!(multicast_addr(63999).to_string(), "239.255.249.255");
    }

    #[test]
    fn multicast_addr_byte_split() {
        assert_eq!(multicast_addr(256).to_string(), "239.255.1.0");
        assert_eq!(multicast_addr(513).to_string(), "239.255.2.1");
    }
}
