use super::{
    PacketError, VECTOR_ROOT_DATA, decode_cid, encode_root_layer, flags_and_length,
    source_name_from_str, source_name_to_string, validate_priority, validate_universe,
};
use crate::{
    ComponentIdentifier, DEFAULT_PRIORITY, MAX_UNIVERSE_NUMBER, MAX_UNIVERSE_SIZE, Slot,
    UniverseNumber,
};
use std::fmt;

const PREVIEW_DATA_BIT: u8 = 0x80;
const STREAM_TERMINATED_BIT: u8 = 0x40;
const FORCE_SYNCHRONIZATION_BIT: u8 = 0x20;

/// The DMX512-A NULL start code, used for ordinary level data.
pub const START_CODE_LEVELS: Slot = 0x00;
/// The alternate start code for per-address priority data (E1.31 A).
pub const START_CODE_PER_ADDRESS_PRIORITY: Slot = 0xDD;

/// An E1.31 Data Packet.
///
/// Carries one universe worth of DMX512-A slots together with the stream
/// metadata receivers arbitrate on: priority, sequence number and the
/// options flags. The DMX payload is always stored (and sent) as the full
/// 512 slots; shorter inputs are padded with zeros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    cid: ComponentIdentifier,
    source_name: [u8; 64],
    priority: u8,
    synchronization_address: u16,
    sequence_number: u8,
    options: u8,
    universe: UniverseNumber,
    start_code: Slot,
    slots: [Slot; MAX_UNIVERSE_SIZE],
}

impl DataPacket {
    /// Framing layer vector of a data packet (E1.31 6.2.1).
    pub(crate) const VECTOR: [u8; 4] = [0x00, 0x00, 0x00, 0x02];
    /// DMP layer vector (E1.31 7.2).
    const VECTOR_DMP: u8 = 0x02;
    /// Address & data type, first property address and address increment
    /// (E1.31 7.3-7.5).
    const DMP_STATIC: [u8; 5] = [0xa1, 0x00, 0x00, 0x00, 0x01];
    /// The shortest decodable data packet: all layers with zero data slots.
    const MIN_LENGTH: usize = 126;
    /// The length of an encoded packet with the full 512 slots.
    const LENGTH: usize = Self::MIN_LENGTH + MAX_UNIVERSE_SIZE;

    /// Creates a new [DataPacket] with default priority, zeroed DMX data and
    /// no synchronization.
    pub fn new(
        cid: ComponentIdentifier,
        source_name: &str,
        universe: UniverseNumber,
    ) -> Result<Self, PacketError> {
        // E1.31 6.2.2 Data Packet: Source Name
        let source_name = source_name_from_str(source_name)?;

        // E1.31 6.2.7 Data Packet: Universe
        validate_universe(universe)?;

        Ok(DataPacket {
            cid,
            source_name,
            priority: DEFAULT_PRIORITY,
            synchronization_address: 0,
            sequence_number: 0,
            options: 0,
            universe,
            start_code: START_CODE_LEVELS,
            slots: [0; MAX_UNIVERSE_SIZE],
        })
    }

    /// The CID of the source that sent this packet.
    pub fn cid(&self) -> &ComponentIdentifier {
        &self.cid
    }

    /// Replaces the CID.
    pub fn set_cid(&mut self, cid: ComponentIdentifier) {
        self.cid = cid;
    }

    /// The source name, with the null padding stripped.
    pub fn source_name(&self) -> String {
        source_name_to_string(&self.source_name)
    }

    /// Sets the source name. Must fit the 64 byte wire field.
    pub fn set_source_name(&mut self, source_name: &str) -> Result<(), PacketError> {
        self.source_name = source_name_from_str(source_name)?;
        Ok(())
    }

    /// The priority receivers use to select among concurrent sources.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// Sets the priority. Must be in `[0, 200]` (E1.31 6.2.3).
    pub fn set_priority(&mut self, priority: u8) -> Result<(), PacketError> {
        validate_priority(priority)?;
        self.priority = priority;
        Ok(())
    }

    /// The universe on which synchronization packets for this stream are
    /// sent, or 0 if the stream is not synchronized.
    pub fn synchronization_address(&self) -> u16 {
        self.synchronization_address
    }

    /// Sets the synchronization address. Must be in `[0, 63999]`; 0 means
    /// "not synchronized" (E1.31 6.2.4).
    pub fn set_synchronization_address(&mut self, address: u16) -> Result<(), PacketError> {
        if address > MAX_UNIVERSE_NUMBER {
            return Err(PacketError::InvalidSynchronizationAddress(address));
        }
        self.synchronization_address = address;
        Ok(())
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

    /// Whether the data is intended for visualization or media server
    /// preview applications only.
    pub fn preview_data(&self) -> bool {
        self.options & PREVIEW_DATA_BIT != 0
    }

    /// Sets the preview data option.
    pub fn set_preview_data(&mut self, preview_data: bool) {
        self.set_option(PREVIEW_DATA_BIT, preview_data);
    }

    /// Whether the source is terminating this stream.
    pub fn stream_terminated(&self) -> bool {
        self.options & STREAM_TERMINATED_BIT != 0
    }

    /// Sets the stream terminated option.
    pub fn set_stream_terminated(&mut self, stream_terminated: bool) {
        self.set_option(STREAM_TERMINATED_BIT, stream_terminated);
    }

    /// Whether receivers should keep rendering data packets even when
    /// synchronization is lost.
    pub fn force_synchronization(&self) -> bool {
        self.options & FORCE_SYNCHRONIZATION_BIT != 0
    }

    /// Sets the force synchronization option.
    pub fn set_force_synchronization(&mut self, force_synchronization: bool) {
        self.set_option(FORCE_SYNCHRONIZATION_BIT, force_synchronization);
    }

    fn set_option(&mut self, bit: u8, value: bool) {
        if value {
            self.options |= bit;
        } else {
            self.options &= !bit;
        }
    }

    /// The universe number this packet carries data for.
    pub fn universe(&self) -> UniverseNumber {
        self.universe
    }

    /// Sets the universe number. Must be in `[1, 63999]`.
    pub fn set_universe(&mut self, universe: UniverseNumber) -> Result<(), PacketError> {
        validate_universe(universe)?;
        self.universe = universe;
        Ok(())
    }

    /// The DMX start code preceding the data slots on the wire.
    pub fn start_code(&self) -> Slot {
        self.start_code
    }

    /// Sets the DMX start code ([START_CODE_LEVELS] for levels,
    /// [START_CODE_PER_ADDRESS_PRIORITY] for per-address priorities).
    pub fn set_start_code(&mut self, start_code: Slot) {
        self.start_code = start_code;
    }

    /// The 512 data slots.
    pub fn dmx_data(&self) -> &[Slot; MAX_UNIVERSE_SIZE] {
        &self.slots
    }

    /// Sets the data slots, normalized to 512: shorter input is padded with
    /// zeros on the right, longer input is truncated.
    pub fn set_dmx_data(&mut self, data: &[Slot]) {
        let len = data.len().min(MAX_UNIVERSE_SIZE);
        self.slots = [0; MAX_UNIVERSE_SIZE];
        self.slots[..len].copy_from_slice(&data[..len]);
    }

    /// Encodes this packet into its 638 byte wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::LENGTH);
        encode_root_layer(&mut bytes, Self::LENGTH, VECTOR_ROOT_DATA, &self.cid);

        // E1.31 6.2 Framing layer.
        bytes.extend(flags_and_length(Self::LENGTH - 38));
        bytes.extend(Self::VECTOR);
        bytes.extend(self.source_name);
        bytes.push(self.priority);
        bytes.extend(self.synchronization_address.to_be_bytes());
        bytes.push(self.sequence_number);
        bytes.push(self.options);
        bytes.extend(self.universe.to_be_bytes());

        // E1.31 7 DMP layer.
        bytes.extend(flags_and_length(Self::LENGTH - 115));
        bytes.push(Self::VECTOR_DMP);
        bytes.extend(Self::DMP_STATIC);
        // E1.31 7.6: one start code slot plus the data slots.
        bytes.extend(((1 + MAX_UNIVERSE_SIZE) as u16).to_be_bytes());
        bytes.push(self.start_code);
        bytes.extend(self.slots);
        bytes
    }

    /// Decodes a network ordered slice of bytes into a new [DataPacket].
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::MIN_LENGTH {
            return Err(PacketError::MalformedLength { got: data.len(), need: Self::MIN_LENGTH });
        }

        // E1.31 5.5 Root Layer: Vector
        let root_vector = [data[18], data[19], data[20], data[21]];
        if root_vector != VECTOR_ROOT_DATA {
            return Err(PacketError::InvalidRootVector(root_vector));
        }

        // E1.31 6.2.1 Data Packet: Vector
        let framing_vector = [data[40], data[41], data[42], data[43]];
        if framing_vector != Self::VECTOR {
            return Err(PacketError::InvalidFramingVector(framing_vector));
        }

        // E1.31 7.2 DMP Layer: Vector
        if data[117] != Self::VECTOR_DMP {
            return Err(PacketError::InvalidDmpVector(data[117]));
        }

        // E1.31 6.2.3 Data Packet: Priority
        let priority = data[108];
        validate_priority(priority)?;

        // E1.31 6.2.4 Data Packet: Synchronization Address
        let synchronization_address = u16::from_be_bytes([data[109], data[110]]);
        if synchronization_address > MAX_UNIVERSE_NUMBER {
            return Err(PacketError::InvalidSynchronizationAddress(synchronization_address));
        }

        // E1.31 6.2.7 Data Packet: Universe
        let universe = u16::from_be_bytes([data[113], data[114]]);
        validate_universe(universe)?;

        let mut packet = DataPacket {
            cid: decode_cid(data),
            source_name: data[44..108].try_into().unwrap(),
            priority,
            synchronization_address,
            // E1.31 6.2.5 Data Packet: Sequence Number
            sequence_number: data[111],
            // E1.31 6.2.6 Data Packet: Options
            options: data[112],
            universe,
            // E1.31 7.7 Property Values: DMX512-A START Code
            start_code: data[125],
            slots: [0; MAX_UNIVERSE_SIZE],
        };

        // E1.31 7.6: the property value count includes the start code slot.
        // Short payloads are normalized back to 512 slots.
        let count = u16::from_be_bytes([data[123], data[124]]) as usize;
        let len = count.saturating_sub(1).min(MAX_UNIVERSE_SIZE).min(data.len() - Self::MIN_LENGTH);
        packet.set_dmx_data(&data[126..126 + len]);

        Ok(packet)
    }
}

impl fmt::Display for DataPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "universe {} (priority {}, sequence {}, cid {})",
            self.universe, self.priority, self.sequence_number, self.cid
        )
    }
}
