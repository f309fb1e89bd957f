//! CCSDS Space Packet codec
//!
//! Bit-exact implementation of the space packet framing used on the ground
//! link: 6-byte primary header, 10-byte TM/TC secondary header, data field
//! and a CRC-16-CCITT trailer, all big-endian on the wire. Packets are
//! always serialized field by field; in-memory representations never touch
//! the wire.

use std::sync::Arc;

use crate::error::{FswError, Result};
use crate::osal::{Mutex, Timeout};
use crate::time::TimeService;
use crate::types::apid;

/// Packet version number, always zero
pub const CCSDS_VERSION: u8 = 0;

/// Packet type bit: telemetry
pub const CCSDS_TYPE_TM: u8 = 0;

/// Packet type bit: telecommand
pub const CCSDS_TYPE_TC: u8 = 1;

/// Sequence flags for an unsegmented packet
pub const CCSDS_SEQ_STANDALONE: u16 = 3;

/// Primary header size in bytes
pub const CCSDS_PRIMARY_HDR_SIZE: usize = 6;

/// Secondary header size in bytes (TM and TC layouts both)
pub const CCSDS_SEC_HDR_SIZE: usize = 10;

/// Maximum total packet size in bytes
pub const CCSDS_MAX_PACKET_SIZE: usize = 4096;

/// Maximum data field size in bytes
pub const CCSDS_MAX_DATA: usize =
    CCSDS_MAX_PACKET_SIZE - CCSDS_PRIMARY_HDR_SIZE - CCSDS_SEC_HDR_SIZE - 2;

const fn build_crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u16; 256] = build_crc_table();

/// CRC-16-CCITT: initial 0xFFFF, polynomial 0x1021, MSB first, no reflection
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF_u16, |crc, &byte| {
        (crc << 8) ^ CRC_TABLE[(((crc >> 8) ^ u16::from(byte)) & 0xFF) as usize]
    })
}

/// Primary header (6 bytes on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrimaryHeader {
    /// Version(3) + Type(1) + SecHdrFlag(1) + APID(11)
    pub packet_id: u16,
    /// SequenceFlags(2) + SequenceCount(14)
    pub sequence_ctrl: u16,
    /// Data field length in bytes minus one
    pub packet_length: u16,
}

impl PrimaryHeader {
    /// Pack the identification word
    pub fn packet_id_for(packet_type: u8, apid: u16) -> u16 {
        (u16::from(CCSDS_VERSION) << 13)
            | (u16::from(packet_type) << 12)
            | (1 << 11)
            | (apid & 0x07FF)
    }

    /// Application process identifier (11 bits)
    pub fn apid(&self) -> u16 {
        self.packet_id & 0x07FF
    }

    /// Sequence count (14 bits)
    pub fn sequence(&self) -> u16 {
        self.sequence_ctrl & 0x3FFF
    }

    /// Version field
    pub fn version(&self) -> u8 {
        (self.packet_id >> 13) as u8
    }

    /// True for a telecommand packet
    pub fn is_tc(&self) -> bool {
        (self.packet_id >> 12) & 0x01 == u16::from(CCSDS_TYPE_TC)
    }

    /// Secondary header flag
    pub fn has_secondary(&self) -> bool {
        (self.packet_id >> 11) & 0x01 != 0
    }

    /// Serialize big-endian
    pub fn to_bytes(&self) -> [u8; CCSDS_PRIMARY_HDR_SIZE] {
        let mut bytes = [0u8; CCSDS_PRIMARY_HDR_SIZE];
        bytes[0..2].copy_from_slice(&self.packet_id.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.sequence_ctrl.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.packet_length.to_be_bytes());
        bytes
    }

    /// Parse big-endian
    pub fn from_bytes(bytes: &[u8; CCSDS_PRIMARY_HDR_SIZE]) -> Self {
        Self {
            packet_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            sequence_ctrl: u16::from_be_bytes([bytes[2], bytes[3]]),
            packet_length: u16::from_be_bytes([bytes[4], bytes[5]]),
        }
    }
}

/// Telemetry secondary header (10 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TmSecondaryHeader {
    /// Seconds since the 2000-01-01 epoch
    pub coarse_time: u32,
    /// Sub-second field
    pub fine_time: u16,
    /// PUS service type
    pub service_type: u8,
    /// PUS service subtype
    pub service_subtype: u8,
    /// Ground destination
    pub destination_id: u8,
    /// Reserved
    pub spare: u8,
}

impl TmSecondaryHeader {
    /// Serialize big-endian
    pub fn to_bytes(&self) -> [u8; CCSDS_SEC_HDR_SIZE] {
        let mut bytes = [0u8; CCSDS_SEC_HDR_SIZE];
        bytes[0..4].copy_from_slice(&self.coarse_time.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.fine_time.to_be_bytes());
        bytes[6] = self.service_type;
        bytes[7] = self.service_subtype;
        bytes[8] = self.destination_id;
        bytes[9] = self.spare;
        bytes
    }

    /// Parse big-endian
    pub fn from_bytes(bytes: &[u8; CCSDS_SEC_HDR_SIZE]) -> Self {
        Self {
            coarse_time: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            fine_time: u16::from_be_bytes([bytes[4], bytes[5]]),
            service_type: bytes[6],
            service_subtype: bytes[7],
            destination_id: bytes[8],
            spare: bytes[9],
        }
    }
}

/// Telecommand secondary header (10 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcSecondaryHeader {
    /// PUS service type
    pub service_type: u8,
    /// PUS service subtype
    pub service_subtype: u8,
    /// Commanding ground station
    pub source_id: u8,
    /// Reserved
    pub spare: u8,
    /// Absolute execution time, 0 = immediate
    pub scheduled_time: u32,
    /// Requested acknowledgment flags
    pub ack_flags: u16,
}

impl TcSecondaryHeader {
    /// Serialize big-endian
    pub fn to_bytes(&self) -> [u8; CCSDS_SEC_HDR_SIZE] {
        let mut bytes = [0u8; CCSDS_SEC_HDR_SIZE];
        bytes[0] = self.service_type;
        bytes[1] = self.service_subtype;
        bytes[2] = self.source_id;
        bytes[3] = self.spare;
        bytes[4..8].copy_from_slice(&self.scheduled_time.to_be_bytes());
        bytes[8..10].copy_from_slice(&self.ack_flags.to_be_bytes());
        bytes
    }

    /// Parse big-endian
    pub fn from_bytes(bytes: &[u8; CCSDS_SEC_HDR_SIZE]) -> Self {
        Self {
            service_type: bytes[0],
            service_subtype: bytes[1],
            source_id: bytes[2],
            spare: bytes[3],
            scheduled_time: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            ack_flags: u16::from_be_bytes([bytes[8], bytes[9]]),
        }
    }
}

/// A telemetry packet under construction or ready for downlink
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TmPacket {
    /// Primary header
    pub primary: PrimaryHeader,
    /// TM secondary header
    pub secondary: TmSecondaryHeader,
    /// Data field
    pub data: heapless::Vec<u8, CCSDS_MAX_DATA>,
    /// Trailer CRC, valid after [`finalize`](Self::finalize)
    pub crc: u16,
}

impl TmPacket {
    /// Replace the data field
    pub fn set_data(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > CCSDS_MAX_DATA {
            return Err(FswError::Overflow);
        }
        self.data.clear();
        self.data.extend_from_slice(data).map_err(|_| FswError::Overflow)?;
        Ok(())
    }

    /// Fix the packet length and compute the trailer CRC
    ///
    /// Idempotent: finalizing twice yields identical bytes.
    pub fn finalize(&mut self) {
        self.primary.packet_length =
            (CCSDS_SEC_HDR_SIZE + self.data.len() + 2 - 1) as u16;

        let mut scratch = [0u8; CCSDS_MAX_PACKET_SIZE];
        let mut offset = 0;
        scratch[offset..offset + CCSDS_PRIMARY_HDR_SIZE]
            .copy_from_slice(&self.primary.to_bytes());
        offset += CCSDS_PRIMARY_HDR_SIZE;
        scratch[offset..offset + CCSDS_SEC_HDR_SIZE]
            .copy_from_slice(&self.secondary.to_bytes());
        offset += CCSDS_SEC_HDR_SIZE;
        scratch[offset..offset + self.data.len()].copy_from_slice(&self.data);
        offset += self.data.len();

        self.crc = crc16(&scratch[..offset]);
    }

    /// Total on-wire length including headers and CRC
    pub fn total_length(&self) -> usize {
        CCSDS_PRIMARY_HDR_SIZE + CCSDS_SEC_HDR_SIZE + self.data.len() + 2
    }

    /// Serialize to `out` big-endian; returns bytes written, 0 if `out` is
    /// too small
    pub fn serialize(&self, out: &mut [u8]) -> usize {
        let total = self.total_length();
        if out.len() < total {
            return 0;
        }

        let mut offset = 0;
        out[offset..offset + CCSDS_PRIMARY_HDR_SIZE].copy_from_slice(&self.primary.to_bytes());
        offset += CCSDS_PRIMARY_HDR_SIZE;
        out[offset..offset + CCSDS_SEC_HDR_SIZE].copy_from_slice(&self.secondary.to_bytes());
        offset += CCSDS_SEC_HDR_SIZE;
        out[offset..offset + self.data.len()].copy_from_slice(&self.data);
        offset += self.data.len();
        out[offset..offset + 2].copy_from_slice(&self.crc.to_be_bytes());
        offset + 2
    }
}

/// A received or outgoing telecommand packet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TcPacket {
    /// Primary header
    pub primary: PrimaryHeader,
    /// TC secondary header
    pub secondary: TcSecondaryHeader,
    /// Data field
    pub data: heapless::Vec<u8, CCSDS_MAX_DATA>,
    /// Trailer CRC
    pub crc: u16,
}

impl TcPacket {
    /// Replace the data field
    pub fn set_data(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > CCSDS_MAX_DATA {
            return Err(FswError::Overflow);
        }
        self.data.clear();
        self.data.extend_from_slice(data).map_err(|_| FswError::Overflow)?;
        Ok(())
    }

    fn body_bytes(&self, scratch: &mut [u8; CCSDS_MAX_PACKET_SIZE]) -> usize {
        let mut offset = 0;
        scratch[offset..offset + CCSDS_PRIMARY_HDR_SIZE]
            .copy_from_slice(&self.primary.to_bytes());
        offset += CCSDS_PRIMARY_HDR_SIZE;
        scratch[offset..offset + CCSDS_SEC_HDR_SIZE]
            .copy_from_slice(&self.secondary.to_bytes());
        offset += CCSDS_SEC_HDR_SIZE;
        scratch[offset..offset + self.data.len()].copy_from_slice(&self.data);
        offset + self.data.len()
    }

    /// Fix the packet length and compute the trailer CRC
    pub fn finalize(&mut self) {
        self.primary.packet_length =
            (CCSDS_SEC_HDR_SIZE + self.data.len() + 2 - 1) as u16;
        let mut scratch = [0u8; CCSDS_MAX_PACKET_SIZE];
        let len = self.body_bytes(&mut scratch);
        self.crc = crc16(&scratch[..len]);
    }

    /// Total on-wire length including headers and CRC
    pub fn total_length(&self) -> usize {
        CCSDS_PRIMARY_HDR_SIZE + CCSDS_SEC_HDR_SIZE + self.data.len() + 2
    }

    /// Serialize to `out` big-endian; returns bytes written, 0 if too small
    pub fn serialize(&self, out: &mut [u8]) -> usize {
        let total = self.total_length();
        if out.len() < total {
            return 0;
        }
        let mut scratch = [0u8; CCSDS_MAX_PACKET_SIZE];
        let body = self.body_bytes(&mut scratch);
        out[..body].copy_from_slice(&scratch[..body]);
        out[body..body + 2].copy_from_slice(&self.crc.to_be_bytes());
        body + 2
    }

    /// Structural and integrity validation
    ///
    /// Checks version and type fields, then verifies the CRC over primary
    /// header, secondary header and data.
    pub fn validate(&self) -> bool {
        if self.primary.version() != CCSDS_VERSION {
            return false;
        }
        if !self.primary.is_tc() {
            return false;
        }
        let mut scratch = [0u8; CCSDS_MAX_PACKET_SIZE];
        let len = self.body_bytes(&mut scratch);
        crc16(&scratch[..len]) == self.crc
    }
}

/// Parse a telecommand from raw uplink bytes
///
/// The data length derives from the packet-length field:
/// `packet_length + 1 - secondary_header - CRC`. Fails when the declared
/// length does not fit the supplied buffer.
pub fn parse_tc(raw: &[u8]) -> Result<TcPacket> {
    let min = CCSDS_PRIMARY_HDR_SIZE + CCSDS_SEC_HDR_SIZE + 2;
    if raw.len() < min {
        return Err(FswError::InvalidParam);
    }

    let mut primary_raw = [0u8; CCSDS_PRIMARY_HDR_SIZE];
    primary_raw.copy_from_slice(&raw[..CCSDS_PRIMARY_HDR_SIZE]);
    let primary = PrimaryHeader::from_bytes(&primary_raw);

    let mut secondary_raw = [0u8; CCSDS_SEC_HDR_SIZE];
    secondary_raw
        .copy_from_slice(&raw[CCSDS_PRIMARY_HDR_SIZE..CCSDS_PRIMARY_HDR_SIZE + CCSDS_SEC_HDR_SIZE]);
    let secondary = TcSecondaryHeader::from_bytes(&secondary_raw);

    let declared = usize::from(primary.packet_length) + 1;
    let data_len = declared
        .checked_sub(CCSDS_SEC_HDR_SIZE + 2)
        .ok_or(FswError::Underflow)?;
    if data_len > CCSDS_MAX_DATA {
        return Err(FswError::Overflow);
    }
    let data_start = CCSDS_PRIMARY_HDR_SIZE + CCSDS_SEC_HDR_SIZE;
    if raw.len() < data_start + data_len + 2 {
        return Err(FswError::Overflow);
    }

    let mut packet = TcPacket {
        primary,
        secondary,
        data: heapless::Vec::new(),
        crc: 0,
    };
    packet
        .data
        .extend_from_slice(&raw[data_start..data_start + data_len])
        .map_err(|_| FswError::Overflow)?;
    packet.crc = u16::from_be_bytes([raw[data_start + data_len], raw[data_start + data_len + 1]]);

    Ok(packet)
}

/// Packet factory holding the per-APID sequence counters
pub struct Codec {
    counters: Mutex<[u16; apid::MAX as usize + 1]>,
    time: Arc<TimeService>,
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec").finish_non_exhaustive()
    }
}

impl Codec {
    /// Create a codec with all sequence counters at zero
    pub fn new(time: Arc<TimeService>) -> Self {
        Self {
            counters: Mutex::new([0u16; apid::MAX as usize + 1]),
            time,
        }
    }

    /// Return the current sequence count for `apid` and advance it mod 2^14
    pub fn next_sequence(&self, apid_value: u16) -> u16 {
        if apid_value > apid::MAX {
            return 0;
        }
        match self.counters.lock(Timeout::Forever) {
            Ok(mut counters) => {
                let seq = counters[usize::from(apid_value)];
                counters[usize::from(apid_value)] = (seq + 1) & 0x3FFF;
                seq
            }
            Err(_) => 0,
        }
    }

    /// Build a TM packet skeleton: headers stamped, empty data, CRC pending
    pub fn build_tm(&self, apid_value: u16, service_type: u8, service_subtype: u8) -> TmPacket {
        let timestamp = self.time.timestamp();
        TmPacket {
            primary: PrimaryHeader {
                packet_id: PrimaryHeader::packet_id_for(CCSDS_TYPE_TM, apid_value),
                sequence_ctrl: (CCSDS_SEQ_STANDALONE << 14) | self.next_sequence(apid_value),
                packet_length: 0,
            },
            secondary: TmSecondaryHeader {
                coarse_time: timestamp.seconds,
                fine_time: (timestamp.subseconds & 0xFFFF) as u16,
                service_type,
                service_subtype,
                destination_id: 0,
                spare: 0,
            },
            data: heapless::Vec::new(),
            crc: 0,
        }
    }

    /// Build a TC packet skeleton (used by ground-pointing tests and loopback)
    pub fn build_tc(&self, apid_value: u16, service_type: u8, service_subtype: u8) -> TcPacket {
        TcPacket {
            primary: PrimaryHeader {
                packet_id: PrimaryHeader::packet_id_for(CCSDS_TYPE_TC, apid_value),
                sequence_ctrl: CCSDS_SEQ_STANDALONE << 14,
                packet_length: 0,
            },
            secondary: TcSecondaryHeader::default(),
            data: heapless::Vec::new(),
            crc: 0,
        }
    }
}
