//! Common External Message Interface (cEMI) implementation.
//!
//! cEMI provides the standardized interface for KNX communication, encapsulating
//! KNX telegrams within KNXnet/IP frames. This module handles parsing and building
//! of cEMI frames, including `L_Data` frames for group communication and transport
//! layer control primitives used to address individual devices on the bus.
//!
//! ## Overview
//!
//! The cEMI protocol layer sits between KNXnet/IP (transport) and the KNX
//! application layer. It defines how to encode KNX telegrams for transmission
//! over IP networks.
//!
//! ## Frame Structure
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Message Code (1 byte)                    │
//! ├──────────────────────────────────────────┤
//! │ Additional Info Length (1 byte)          │
//! ├──────────────────────────────────────────┤
//! │ Additional Info (variable)               │
//! ├──────────────────────────────────────────┤
//! │ Service Information (L_Data)             │
//! │  ├─ Control Field 1 (1 byte)             │
//! │  ├─ Control Field 2 (1 byte)             │
//! │  ├─ Source Address (2 bytes)             │
//! │  ├─ Destination Address (2 bytes)        │
//! │  ├─ NPDU Length (1 byte)                 │
//! │  ├─ TPCI/APCI (1-2 bytes)                │
//! │  └─ Data (variable)                      │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use knxmap_rs::protocol::cemi::CEMIFrame;
//!
//! # fn run(frame_data: &[u8]) -> knxmap_rs::error::Result<()> {
//! // Parse a complete cEMI frame
//! let cemi = CEMIFrame::parse(frame_data)?;
//!
//! // Extract L_Data if this is a data frame
//! if cemi.is_ldata() {
//!     let ldata = cemi.as_ldata()?;
//!
//!     if ldata.is_group_write() {
//!         let _addr = ldata.destination_group().unwrap();
//!         // Process group write...
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::addressing::{GroupAddress, IndividualAddress};
use crate::error::{KnxError, Result};
use crate::protocol::apci::Apci;
use crate::protocol::constants::{CEMIMessageCode, Priority};

/// cEMI Additional Information Type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AdditionalInfoType {
    /// PL medium information
    PlMediumInfo = 0x01,
    /// RF medium information
    RfMediumInfo = 0x02,
    /// Busmonitor error flags
    BusmonitorErrorFlags = 0x03,
    /// Relative timestamp
    RelativeTimestamp = 0x04,
    /// Time delay
    TimeDelay = 0x05,
    /// Extended relative timestamp
    ExtendedRelativeTimestamp = 0x06,
    /// `BiBat` information
    BiBatInfo = 0x07,
}

/// Control Field 1 of `L_Data` frame
///
/// ```text
/// Bit 7: Frame Type (0=extended, 1=standard)
/// Bit 6: Reserved
/// Bit 5: Repeat (0=repeat, 1=do not repeat)
/// Bit 4: System Broadcast (0=system, 1=broadcast)
/// Bit 3-2: Priority (00=system, 01=normal, 10=urgent, 11=low)
/// Bit 1: Acknowledge Request (0=no ack, 1=ack requested)
/// Bit 0: Confirm (0=no error, 1=error)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlField1 {
    raw: u8,
}

impl From<u8> for ControlField1 {
    #[inline(always)]
    fn from(raw: u8) -> Self {
        Self { raw }
    }
}

impl From<ControlField1> for u8 {
    #[inline(always)]
    fn from(ctrl: ControlField1) -> u8 {
        ctrl.raw
    }
}

impl ControlField1 {
    /// Get raw byte value
    #[inline(always)]
    pub const fn raw(self) -> u8 {
        self.raw
    }

    /// Check if frame is standard (true) or extended (false)
    #[inline(always)]
    pub const fn is_standard_frame(self) -> bool {
        (self.raw & 0x80) != 0
    }

    /// Check if repeat flag is set (do not repeat if true)
    #[inline(always)]
    pub const fn do_not_repeat(self) -> bool {
        (self.raw & 0x20) != 0
    }

    /// Check if this is a system broadcast
    #[inline(always)]
    pub const fn is_broadcast(self) -> bool {
        (self.raw & 0x10) != 0
    }

    /// Get priority
    #[inline(always)]
    pub const fn priority(self) -> Priority {
        Priority::from_u8((self.raw >> 2) & 0x03)
    }

    /// Check if acknowledge is requested
    #[inline(always)]
    pub const fn ack_requested(self) -> bool {
        (self.raw & 0x02) != 0
    }

    /// Check if confirm error flag is set
    #[inline(always)]
    pub const fn has_error(self) -> bool {
        (self.raw & 0x01) != 0
    }

    /// Create a new Control Field 1
    pub const fn new(
        standard_frame: bool,
        do_not_repeat: bool,
        broadcast: bool,
        priority: Priority,
        ack_requested: bool,
        has_error: bool,
    ) -> Self {
        let mut raw = 0u8;

        if standard_frame {
            raw |= 0x80;
        }
        if do_not_repeat {
            raw |= 0x20;
        }
        if broadcast {
            raw |= 0x10;
        }
        raw |= (priority.to_u8() & 0x03) << 2;
        if ack_requested {
            raw |= 0x02;
        }
        if has_error {
            raw |= 0x01;
        }

        Self { raw }
    }
}

impl Default for ControlField1 {
    #[inline]
    fn default() -> Self {
        // Standard frame, repeat allowed, broadcast, normal priority, no ack, no error
        Self { raw: 0x94 }
    }
}

/// Control Field 2 of `L_Data` frame
///
/// ```text
/// Bit 7: Destination Address Type (0=individual, 1=group)
/// Bit 6-4: Hop Count (0-7)
/// Bit 3-0: Extended Frame Format (0000=standard)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlField2 {
    raw: u8,
}

impl From<u8> for ControlField2 {
    #[inline(always)]
    fn from(raw: u8) -> Self {
        Self { raw }
    }
}

impl From<ControlField2> for u8 {
    #[inline(always)]
    fn from(ctrl: ControlField2) -> u8 {
        ctrl.raw
    }
}

impl ControlField2 {
    /// Get raw byte value
    #[inline(always)]
    pub const fn raw(self) -> u8 {
        self.raw
    }

    /// Check if destination is group address (true) or individual (false)
    #[inline(always)]
    pub const fn is_group_address(self) -> bool {
        (self.raw & 0x80) != 0
    }

    /// Get hop count (0-7)
    #[inline(always)]
    pub const fn hop_count(self) -> u8 {
        (self.raw >> 4) & 0x07
    }

    /// Get extended frame format
    #[inline(always)]
    pub const fn extended_format(self) -> u8 {
        self.raw & 0x0F
    }

    /// Create a new Control Field 2
    pub const fn new(is_group: bool, hop_count: u8, extended_format: u8) -> Self {
        let mut raw = 0u8;

        if is_group {
            raw |= 0x80;
        }
        raw |= (hop_count & 0x07) << 4;
        raw |= extended_format & 0x0F;

        Self { raw }
    }

    /// Control field 2 addressed to an individual address (for bus-scan probes).
    pub const fn individual(hop_count: u8) -> Self {
        Self::new(false, hop_count, 0)
    }
}

impl Default for ControlField2 {
    #[inline]
    fn default() -> Self {
        // Group address, hop count 6, standard format
        Self { raw: 0xE0 }
    }
}

/// TPCI (Transport Layer Protocol Control Information)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tpci {
    /// Unnumbered Data Packet (UDP)
    UnnumberedData,
    /// Numbered Data Packet (NDP) with sequence number
    NumberedData {
        /// Sequence number (0-15)
        sequence: u8,
    },
    /// Unnumbered Control Packet (UCP)
    UnnumberedControl,
    /// Numbered Control Packet (NCP) with sequence number
    NumberedControl {
        /// Sequence number (0-15)
        sequence: u8,
    },
}

impl Tpci {
    /// Parse TPCI from the first byte of TPCI/APCI field
    pub const fn from_byte(byte: u8) -> Self {
        let tpci = (byte >> 6) & 0x03;
        match tpci {
            0b00 => Self::UnnumberedData,
            0b01 => {
                let sequence = (byte >> 2) & 0x0F;
                Self::NumberedData { sequence }
            }
            0b10 => Self::UnnumberedControl,
            0b11 => {
                let sequence = (byte >> 2) & 0x0F;
                Self::NumberedControl { sequence }
            }
            _ => Self::UnnumberedData, // Unreachable but needed for const
        }
    }

    /// Encode the top TPCI bits (and sequence, if any) into the TPCI byte's
    /// high bits. The low 2 bits are left at 0 for the caller to OR in APCI bits.
    pub const fn to_byte_prefix(self) -> u8 {
        match self {
            Self::UnnumberedData => 0b00 << 6,
            Self::NumberedData { sequence } => (0b01 << 6) | ((sequence & 0x0F) << 2),
            Self::UnnumberedControl => 0b10 << 6,
            Self::NumberedControl { sequence } => (0b11 << 6) | ((sequence & 0x0F) << 2),
        }
    }

    /// Check if this is a data packet
    pub const fn is_data(self) -> bool {
        matches!(self, Self::UnnumberedData | Self::NumberedData { .. })
    }

    /// Check if this is a control packet (`T_Connect`/`T_Disconnect`/`T_Ack`/`T_Nak`)
    pub const fn is_control(self) -> bool {
        !self.is_data()
    }
}

/// Transport-layer control primitives exchanged at connection-oriented
/// communication setup/teardown, carried in the low 2 bits of the byte
/// following a control-type TPCI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpciControl {
    /// `T_Connect` - open a connection-oriented transport layer link
    Connect,
    /// `T_Disconnect` - close a connection-oriented transport layer link
    Disconnect,
    /// `T_Ack` - acknowledge a numbered data packet
    Ack {
        /// Sequence number being acknowledged
        sequence: u8,
    },
    /// `T_Nak` - negatively acknowledge a numbered data packet
    Nak {
        /// Sequence number being rejected
        sequence: u8,
    },
}

impl TpciControl {
    /// Parse a transport-layer control primitive from the TPCI byte.
    ///
    /// Returns `None` if `tpci` is not a control-type TPCI.
    pub const fn from_tpci_byte(byte: u8) -> Option<Self> {
        let tpci = Tpci::from_byte(byte);
        let control_code = byte & 0x03;
        match tpci {
            Tpci::UnnumberedControl => match control_code {
                0b00 => Some(Self::Connect),
                0b01 => Some(Self::Disconnect),
                _ => None,
            },
            Tpci::NumberedControl { sequence } => match control_code {
                0b10 => Some(Self::Ack { sequence }),
                0b11 => Some(Self::Nak { sequence }),
                _ => None,
            },
            _ => None,
        }
    }

    /// Encode this control primitive into its single TPCI byte.
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Connect => Tpci::UnnumberedControl.to_byte_prefix(),
            Self::Disconnect => Tpci::UnnumberedControl.to_byte_prefix() | 0b01,
            Self::Ack { sequence } => Tpci::NumberedControl { sequence }.to_byte_prefix() | 0b10,
            Self::Nak { sequence } => Tpci::NumberedControl { sequence }.to_byte_prefix() | 0b11,
        }
    }
}

/// cEMI `L_Data` frame
///
/// This is the most common cEMI frame type, used for transmitting
/// KNX telegrams over KNXnet/IP.
#[derive(Debug, Clone)]
pub struct LDataFrame<'a> {
    /// Control field 1
    pub ctrl1: ControlField1,
    /// Control field 2
    pub ctrl2: ControlField2,
    /// Source address (individual)
    pub source: IndividualAddress,
    /// Destination address (individual or group)
    pub destination_raw: u16,
    /// NPDU length (data length + 1 for TPCI/APCI)
    pub npdu_length: u8,
    /// TPCI
    pub tpci: Tpci,
    /// APCI (meaningless for control-type TPCI frames)
    pub apci: Apci,
    /// Application data
    pub data: &'a [u8],
}

impl<'a> LDataFrame<'a> {
    /// Minimum size of a data-carrying `L_Data` frame (without additional
    /// data bytes): Control1 + Control2 + Source(2) + Dest(2) + `NPDUlen` +
    /// TPCI + APCI = 9 bytes. Control-type frames (`T_Connect`/`T_Disconnect`/
    /// `T_Ack`/`T_Nak`) have no separate APCI byte and are one byte shorter;
    /// see [`Self::CONTROL_SIZE`].
    pub const MIN_SIZE: usize = 9;

    /// Size of a transport-layer control frame (no APCI byte): Control1 +
    /// Control2 + Source(2) + Dest(2) + `NPDUlen` + TPCI = 8 bytes.
    pub const CONTROL_SIZE: usize = Self::MIN_SIZE - 1;

    /// Parse `L_Data` frame from bytes
    ///
    /// # Errors
    ///
    /// Returns error if buffer is too small or frame is invalid
    #[inline(always)]
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < Self::CONTROL_SIZE {
            return Err(KnxError::buffer_too_small());
        }

        let ctrl1 = ControlField1::from(data[0]);
        let ctrl2 = ControlField2::from(data[1]);
        let source = IndividualAddress::from(u16::from_be_bytes([data[2], data[3]]));
        let destination_raw = u16::from_be_bytes([data[4], data[5]]);
        let npdu_length = data[6];

        let tpci_byte = data[7];
        let tpci = Tpci::from_byte(tpci_byte);

        let (apci, data_start) = if tpci.is_data() {
            if npdu_length >= 2 {
                if data.len() < Self::MIN_SIZE {
                    return Err(KnxError::buffer_too_small());
                }
                (Apci::from_bytes(tpci_byte, data[8]), 9)
            } else {
                // Length-1 APDU: no trailing command byte. Treat it as
                // implicitly zero, matching the reference decoder.
                (Apci::from_single_byte(tpci_byte), 8)
            }
        } else {
            (Apci::Unknown(0), 8)
        };

        let npdu_end = 7 + npdu_length as usize;

        if data.len() < npdu_end || npdu_end < data_start {
            return Err(KnxError::invalid_frame());
        }

        let app_data = &data[data_start..npdu_end];

        Ok(Self {
            ctrl1,
            ctrl2,
            source,
            destination_raw,
            npdu_length,
            tpci,
            apci,
            data: app_data,
        })
    }

    /// Build a group-value `L_Data.req` frame for a short (≤6-bit) value.
    ///
    /// # Errors
    ///
    /// Returns an error if `buf` is too small.
    pub fn build_group_write(
        source: IndividualAddress,
        destination: GroupAddress,
        value: u8,
        buf: &'a mut [u8],
    ) -> Result<usize> {
        Self::build_group(source, destination, Apci::GroupValueWrite, value, &[], buf)
    }

    /// Build a group-value `L_Data.req` frame (read/write/response), with
    /// optional extra data bytes following the inline 6-bit value for
    /// payloads wider than 6 bits.
    ///
    /// # Errors
    ///
    /// Returns an error if `buf` is too small.
    pub fn build_group(
        source: IndividualAddress,
        destination: GroupAddress,
        apci: Apci,
        inline_value: u8,
        extra_data: &[u8],
        buf: &'a mut [u8],
    ) -> Result<usize> {
        let total = Self::MIN_SIZE - 1 + extra_data.len(); // MIN_SIZE already counts 1 apci byte
        if buf.len() < total {
            return Err(KnxError::buffer_too_small());
        }

        buf[0] = ControlField1::default().raw();
        buf[1] = ControlField2::default().raw();
        buf[2..4].copy_from_slice(&source.raw().to_be_bytes());
        buf[4..6].copy_from_slice(&destination.raw().to_be_bytes());
        let npdu_length = 1 + 1 + extra_data.len(); // TPCI + APCI + data
        buf[6] = npdu_length as u8;

        let (tpci_low, apci_byte) = apci.to_bytes(inline_value);
        buf[7] = Tpci::UnnumberedData.to_byte_prefix() | tpci_low;
        buf[8] = apci_byte;
        buf[9..9 + extra_data.len()].copy_from_slice(extra_data);

        Ok(9 + extra_data.len())
    }

    /// Build a connection-oriented numbered-data `L_Data.req` frame addressed
    /// to an individual address, as used by the bus scanner's
    /// `A_DeviceDescriptor_Read`/`A_PropertyValue_Read`/`A_Authorize_Request`
    /// probes over an established `T_Connect`.
    ///
    /// # Errors
    ///
    /// Returns an error if `buf` is too small.
    pub fn build_data(
        source: IndividualAddress,
        destination: IndividualAddress,
        sequence: u8,
        apci: Apci,
        inline_value: u8,
        extra_data: &[u8],
        buf: &mut [u8],
    ) -> Result<usize> {
        let total = Self::MIN_SIZE - 1 + extra_data.len();
        if buf.len() < total {
            return Err(KnxError::buffer_too_small());
        }

        buf[0] = ControlField1::default().raw();
        buf[1] = ControlField2::individual(6).raw();
        buf[2..4].copy_from_slice(&source.raw().to_be_bytes());
        buf[4..6].copy_from_slice(&destination.raw().to_be_bytes());
        let npdu_length = 1 + 1 + extra_data.len();
        buf[6] = npdu_length as u8;

        let (tpci_low, apci_byte) = apci.to_bytes(inline_value);
        buf[7] = Tpci::NumberedData { sequence }.to_byte_prefix() | tpci_low;
        buf[8] = apci_byte;
        buf[9..9 + extra_data.len()].copy_from_slice(extra_data);

        Ok(9 + extra_data.len())
    }

    /// Build a transport-layer control frame (`T_Connect`/`T_Disconnect`/`T_Ack`)
    /// addressed to an individual address, as used by the bus scanner's probe
    /// protocol.
    ///
    /// # Errors
    ///
    /// Returns an error if `buf` is too small.
    pub fn build_control(
        source: IndividualAddress,
        destination: IndividualAddress,
        control: TpciControl,
        buf: &mut [u8],
    ) -> Result<usize> {
        if buf.len() < Self::CONTROL_SIZE {
            return Err(KnxError::buffer_too_small());
        }

        buf[0] = ControlField1::default().raw();
        buf[1] = ControlField2::individual(6).raw();
        buf[2..4].copy_from_slice(&source.raw().to_be_bytes());
        buf[4..6].copy_from_slice(&destination.raw().to_be_bytes());
        buf[6] = 1; // NPDU length: just the TPCI control byte
        buf[7] = control.to_byte();

        Ok(8)
    }

    /// Get destination as group address (if applicable)
    #[inline]
    pub fn destination_group(&self) -> Option<GroupAddress> {
        self.ctrl2
            .is_group_address()
            .then(|| GroupAddress::from(self.destination_raw))
    }

    /// Get destination as individual address (if applicable)
    #[inline]
    pub fn destination_individual(&self) -> Option<IndividualAddress> {
        (!self.ctrl2.is_group_address()).then(|| IndividualAddress::from(self.destination_raw))
    }

    /// Check if this is a group value write
    #[inline(always)]
    pub const fn is_group_write(&self) -> bool {
        matches!(self.apci, Apci::GroupValueWrite)
    }

    /// Check if this is a group value read
    #[inline(always)]
    pub const fn is_group_read(&self) -> bool {
        matches!(self.apci, Apci::GroupValueRead)
    }

    /// Check if this is a group value response
    #[inline(always)]
    pub const fn is_group_response(&self) -> bool {
        matches!(self.apci, Apci::GroupValueResponse)
    }

    /// Interpret this frame's TPCI as a transport-layer control primitive,
    /// if it carries one.
    pub fn as_control(&self) -> Option<TpciControl> {
        if self.tpci.is_control() {
            TpciControl::from_tpci_byte(
                self.tpci.to_byte_prefix() | (self.data.first().copied().unwrap_or(0) & 0x03),
            )
        } else {
            None
        }
    }
}

/// cEMI Frame wrapper
///
/// Represents a complete cEMI frame with message code and payload.
#[derive(Debug)]
pub struct CEMIFrame<'a> {
    /// Message code
    pub message_code: CEMIMessageCode,
    /// Raw frame data (including message code)
    data: &'a [u8],
}

impl<'a> CEMIFrame<'a> {
    /// Minimum cEMI frame size (message code + add info length)
    pub const MIN_SIZE: usize = 2;

    /// Parse a cEMI frame from bytes
    ///
    /// # Errors
    ///
    /// Returns error if buffer is too small or message code is invalid
    #[inline(always)]
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            return Err(KnxError::buffer_too_small());
        }

        let message_code =
            CEMIMessageCode::from_u8(data[0]).ok_or_else(KnxError::invalid_message_code)?;

        Ok(Self { message_code, data })
    }

    /// Build a complete cEMI frame (message code + zero additional info + service info).
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is too small.
    pub fn build(message_code: CEMIMessageCode, service_info: &[u8], buf: &mut [u8]) -> Result<usize> {
        let total = 2 + service_info.len();
        if buf.len() < total {
            return Err(KnxError::buffer_too_small());
        }
        buf[0] = message_code.to_u8();
        buf[1] = 0; // no additional info
        buf[2..total].copy_from_slice(service_info);
        Ok(total)
    }

    /// Get the message code
    #[inline(always)]
    pub const fn message_code(&self) -> CEMIMessageCode {
        self.message_code
    }

    /// Get additional info length
    #[inline(always)]
    pub fn additional_info_length(&self) -> u8 {
        self.data[1]
    }

    /// Get the service information (skipping message code and additional info)
    ///
    /// This returns the `L_Data` payload for data frames.
    #[inline]
    pub fn service_info(&self) -> Result<&[u8]> {
        let add_info_len = self.additional_info_length();
        let service_start = 2 + add_info_len as usize;

        if self.data.len() < service_start {
            return Err(KnxError::invalid_frame());
        }

        Ok(&self.data[service_start..])
    }

    /// Parse as `L_Data` frame (for `L_Data.req`, `L_Data.ind`, `L_Data.con`)
    ///
    /// # Errors
    ///
    /// Returns error if this is not an `L_Data` frame or parsing fails
    pub fn as_ldata(&self) -> Result<LDataFrame<'a>> {
        match self.message_code {
            CEMIMessageCode::LDataReq | CEMIMessageCode::LDataInd | CEMIMessageCode::LDataCon => {
                let add_info_len = self.additional_info_length();
                let service_start = 2 + add_info_len as usize;

                if self.data.len() < service_start {
                    return Err(KnxError::invalid_frame());
                }

                LDataFrame::parse(&self.data[service_start..])
            }
            _ => Err(KnxError::invalid_message_code()),
        }
    }

    /// Check if this is an `L_Data` frame
    pub const fn is_ldata(&self) -> bool {
        matches!(
            self.message_code,
            CEMIMessageCode::LDataReq | CEMIMessageCode::LDataInd | CEMIMessageCode::LDataCon
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_field1() {
        let ctrl = ControlField1::new(true, false, true, Priority::Normal, false, false);
        assert!(ctrl.is_standard_frame());
        assert!(!ctrl.do_not_repeat());
        assert!(ctrl.is_broadcast());
        assert_eq!(ctrl.priority(), Priority::Normal);
        assert!(!ctrl.ack_requested());
        assert!(!ctrl.has_error());
    }

    #[test]
    fn test_control_field1_default() {
        let ctrl = ControlField1::default();
        assert_eq!(ctrl.raw(), 0x94);
        assert!(ctrl.is_standard_frame());
        assert!(!ctrl.do_not_repeat());
        assert!(ctrl.is_broadcast());
        assert_eq!(ctrl.priority(), Priority::Normal);
        assert!(!ctrl.ack_requested());
        assert!(!ctrl.has_error());
    }

    #[test]
    fn test_control_field1_raw() {
        let ctrl = ControlField1::from(0xBCu8);
        assert!(ctrl.is_standard_frame());
        assert!(ctrl.do_not_repeat());
        assert!(ctrl.is_broadcast());
        assert_eq!(ctrl.priority(), Priority::Low);
        assert!(!ctrl.ack_requested());
        assert!(!ctrl.has_error());
    }

    #[test]
    fn test_control_field2() {
        let ctrl = ControlField2::new(true, 6, 0);
        assert!(ctrl.is_group_address());
        assert_eq!(ctrl.hop_count(), 6);
        assert_eq!(ctrl.extended_format(), 0);
    }

    #[test]
    fn test_control_field2_default() {
        let ctrl = ControlField2::default();
        assert_eq!(ctrl.raw(), 0xE0);
        assert!(ctrl.is_group_address());
        assert_eq!(ctrl.hop_count(), 6);
        assert_eq!(ctrl.extended_format(), 0);
    }

    #[test]
    fn test_control_field2_individual_addr() {
        let ctrl = ControlField2::new(false, 5, 0);
        assert!(!ctrl.is_group_address());
        assert_eq!(ctrl.hop_count(), 5);
    }

    #[test]
    fn test_tpci_parse() {
        let tpci = Tpci::from_byte(0b0000_0000);
        assert_eq!(tpci, Tpci::UnnumberedData);
        assert!(tpci.is_data());

        let tpci = Tpci::from_byte(0b0100_1100);
        assert!(matches!(tpci, Tpci::NumberedData { sequence: 3 }));
        assert!(tpci.is_data());

        let tpci = Tpci::from_byte(0b1000_0000);
        assert_eq!(tpci, Tpci::UnnumberedControl);
        assert!(!tpci.is_data());
    }

    #[test]
    fn test_tpci_control_connect_disconnect() {
        let connect_byte = TpciControl::Connect.to_byte();
        assert_eq!(TpciControl::from_tpci_byte(connect_byte), Some(TpciControl::Connect));

        let disconnect_byte = TpciControl::Disconnect.to_byte();
        assert_eq!(
            TpciControl::from_tpci_byte(disconnect_byte),
            Some(TpciControl::Disconnect)
        );
    }

    #[test]
    fn test_tpci_control_ack_roundtrip() {
        let ack = TpciControl::Ack { sequence: 5 };
        let byte = ack.to_byte();
        assert_eq!(TpciControl::from_tpci_byte(byte), Some(ack));
    }

    #[test]
    fn test_ldata_frame_parse_group_write() {
        let data = [
            0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x02, 0x00, 0x81,
        ];

        let frame = LDataFrame::parse(&data).unwrap();
        assert_eq!(frame.source, IndividualAddress::new(1, 1, 1).unwrap());
        assert!(frame.ctrl2.is_group_address());
        assert_eq!(
            frame.destination_group().unwrap(),
            GroupAddress::new(1, 2, 3).unwrap()
        );
        assert!(frame.is_group_write());
    }

    #[test]
    fn test_ldata_frame_parse_group_read() {
        let data = [
            0xBC, 0xE0, 0x12, 0x05, 0x2E, 0x07, 0x02, 0x00, 0x00,
        ];

        let frame = LDataFrame::parse(&data).unwrap();
        assert!(frame.is_group_read());
        assert_eq!(
            frame.destination_group().unwrap(),
            GroupAddress::new(5, 6, 7).unwrap()
        );
    }

    #[test]
    fn test_ldata_build_group_write_roundtrip() {
        let source = IndividualAddress::new(1, 1, 1).unwrap();
        let dest = GroupAddress::new(1, 2, 3).unwrap();
        let mut buf = [0u8; 16];
        let n = LDataFrame::build_group_write(source, dest, 0x01, &mut buf).unwrap();
        let parsed = LDataFrame::parse(&buf[..n]).unwrap();
        assert!(parsed.is_group_write());
        assert_eq!(parsed.destination_group().unwrap(), dest);
    }

    #[test]
    fn test_ldata_build_control_roundtrip() {
        let source = IndividualAddress::new(1, 1, 200).unwrap();
        let dest = IndividualAddress::new(1, 1, 5).unwrap();
        let mut buf = [0u8; 16];
        let n = LDataFrame::build_control(source, dest, TpciControl::Connect, &mut buf).unwrap();
        let parsed = LDataFrame::parse(&buf[..n]).unwrap();
        assert_eq!(parsed.destination_individual().unwrap(), dest);
        assert_eq!(parsed.as_control(), Some(TpciControl::Connect));
    }

    #[test]
    fn test_cemi_frame_parse() {
        let data = [
            0x29, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x02, 0x00, 0x80,
        ];

        let cemi = CEMIFrame::parse(&data).unwrap();
        assert_eq!(cemi.message_code(), CEMIMessageCode::LDataInd);
        assert_eq!(cemi.additional_info_length(), 0);
        assert!(cemi.is_ldata());

        let ldata = cemi.as_ldata().unwrap();
        assert!(ldata.is_group_write());
    }

    #[test]
    fn test_cemi_frame_with_additional_info() {
        let data = [
            0x11, 0x04, 0x01, 0x02, 0x03, 0x04, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x01, 0x00,
            0x80,
        ];

        let cemi = CEMIFrame::parse(&data).unwrap();
        assert_eq!(cemi.additional_info_length(), 4);

        let service_info = cemi.service_info().unwrap();
        assert_eq!(service_info[0], 0xBC);
    }

    #[test]
    fn test_cemi_build_roundtrip() {
        let source = IndividualAddress::new(1, 1, 1).unwrap();
        let dest = GroupAddress::new(1, 2, 3).unwrap();
        let mut ldata_buf = [0u8; 16];
        let n = LDataFrame::build_group_write(source, dest, 0x01, &mut ldata_buf).unwrap();

        let mut buf = [0u8; 32];
        let total = CEMIFrame::build(CEMIMessageCode::LDataReq, &ldata_buf[..n], &mut buf).unwrap();

        let cemi = CEMIFrame::parse(&buf[..total]).unwrap();
        assert_eq!(cemi.message_code(), CEMIMessageCode::LDataReq);
        assert!(cemi.as_ldata().unwrap().is_group_write());
    }

    #[test]
    fn test_cemi_invalid_message_code() {
        let data = [0xFF, 0x00];
        let result = CEMIFrame::parse(&data);
        assert!(result.is_err());
    }

    #[test]
    fn test_ldata_buffer_too_small() {
        let data = [0xBC, 0xE0, 0x11];
        let result = LDataFrame::parse(&data);
        assert!(result.is_err());
    }

    #[test]
    fn test_build_data_device_descriptor_read() {
        let source = IndividualAddress::new(1, 1, 1).unwrap();
        let dest = IndividualAddress::new(1, 1, 5).unwrap();
        let mut buf = [0u8; 16];
        let n =
            LDataFrame::build_data(source, dest, 3, Apci::DeviceDescriptorRead, 0, &[], &mut buf)
                .unwrap();

        let parsed = LDataFrame::parse(&buf[..n]).unwrap();
        assert_eq!(parsed.destination_individual(), Some(dest));
        assert_eq!(parsed.tpci, Tpci::NumberedData { sequence: 3 });
        assert_eq!(parsed.apci, Apci::DeviceDescriptorRead);
    }

    #[test]
    fn test_build_data_property_value_read() {
        let source = IndividualAddress::new(1, 1, 1).unwrap();
        let dest = IndividualAddress::new(1, 1, 5).unwrap();
        let extra = [0x00, 0x0B, 0x10, 0x01]; // object 0, property 11, count 1, start 1
        let mut buf = [0u8; 16];
        let n = LDataFrame::build_data(
            source,
            dest,
            1,
            Apci::PropertyValueRead,
            0,
            &extra,
            &mut buf,
        )
        .unwrap();

        let parsed = LDataFrame::parse(&buf[..n]).unwrap();
        assert_eq!(parsed.apci, Apci::PropertyValueRead);
        assert_eq!(parsed.data, &extra);
    }
}
