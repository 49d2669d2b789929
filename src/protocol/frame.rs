//! KNXnet/IP frame parsing and encoding.
//!
//! This module implements zero-copy parsing of KNXnet/IP frames.
//!
//! # Performance Optimizations
//!
//! This module is heavily optimized for speed:
//! - Zero-copy parsing with lifetimes
//! - `#[inline(always)]` for hot path functions
//! - Branch prediction hints for error paths
//! - Unsafe optimizations where proven safe

use crate::error::{KnxError, Result};
use crate::protocol::constants::*;

/// Compiler hint for unlikely branches (error paths)
#[inline(always)]
#[cold]
const fn unlikely(b: bool) -> bool {
    b
}

/// KNXnet/IP frame header (6 bytes)
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Header Len   │ Protocol Ver │  Service Type ID    │
/// │   (1 byte)   │   (1 byte)   │     (2 bytes)       │
/// ├──────────────┴──────────────┴─────────────────────┤
/// │           Total Length (2 bytes)                   │
/// └────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy)]
pub struct KnxnetIpHeader {
    /// Header length (should be 0x06)
    pub header_length: u8,
    /// Protocol version (should be 0x10 for v1.0)
    pub protocol_version: u8,
    /// Service type identifier
    pub service_type: ServiceType,
    /// Total length of frame (header + body)
    pub total_length: u16,
}

impl KnxnetIpHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 6;

    /// Create a new header
    pub const fn new(service_type: ServiceType, body_length: u16) -> Self {
        Self {
            header_length: HEADER_SIZE_10,
            protocol_version: KNXNETIP_VERSION_10,
            service_type,
            total_length: Self::SIZE as u16 + body_length,
        }
    }

    /// Parse a header from a byte slice
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Buffer is too small
    /// - Header length is invalid
    /// - Protocol version is unsupported
    /// - Service type is unknown
    #[inline(always)]
    pub fn parse(data: &[u8]) -> Result<Self> {
        if unlikely(data.len() < Self::SIZE) {
            return Err(KnxError::buffer_too_small());
        }

        let header_length = data[0];
        let protocol_version = data[1];
        let service_type_raw = u16::from_be_bytes([data[2], data[3]]);
        let total_length = u16::from_be_bytes([data[4], data[5]]);

        if unlikely(header_length != HEADER_SIZE_10) {
            return Err(KnxError::invalid_frame());
        }

        if unlikely(protocol_version != KNXNETIP_VERSION_10) {
            return Err(KnxError::unsupported_version());
        }

        let service_type =
            ServiceType::from_u16(service_type_raw).ok_or_else(KnxError::unexpected_service_type)?;

        Ok(Self {
            header_length,
            protocol_version,
            service_type,
            total_length,
        })
    }

    /// Encode the header into a byte buffer
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is too small.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }

        buf[0] = self.header_length;
        buf[1] = self.protocol_version;
        buf[2..4].copy_from_slice(&self.service_type.to_u16().to_be_bytes());
        buf[4..6].copy_from_slice(&self.total_length.to_be_bytes());

        Ok(Self::SIZE)
    }

    /// Get the expected body length from the header
    pub const fn body_length(&self) -> u16 {
        self.total_length.saturating_sub(Self::SIZE as u16)
    }
}

/// Zero-copy view of a KNXnet/IP frame
///
/// This struct provides a zero-copy view into a KNXnet/IP frame buffer,
/// avoiding allocations by directly referencing the underlying data.
#[derive(Debug)]
pub struct KnxnetIpFrame<'a> {
    /// Reference to the complete frame data
    data: &'a [u8],
    /// Parsed header
    header: KnxnetIpHeader,
}

impl<'a> KnxnetIpFrame<'a> {
    /// Parse a KNXnet/IP frame from a byte slice
    ///
    /// # Errors
    ///
    /// Returns error if buffer is too small, header is invalid, or frame is incomplete.
    #[inline(always)]
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = KnxnetIpHeader::parse(data)?;

        if unlikely(data.len() < header.total_length as usize) {
            return Err(KnxError::invalid_frame());
        }

        Ok(Self { data, header })
    }

    /// Get the frame header
    #[inline(always)]
    pub const fn header(&self) -> &KnxnetIpHeader {
        &self.header
    }

    /// Get the service type
    #[inline(always)]
    pub const fn service_type(&self) -> ServiceType {
        self.header.service_type
    }

    /// Get the frame body (payload after header)
    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        let start = KnxnetIpHeader::SIZE;
        let end = self.header.total_length as usize;
        &self.data[start..end]
    }

    /// Get the complete frame data
    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.header.total_length as usize]
    }
}

/// Builder for creating KNXnet/IP frames
///
/// This builder helps construct valid KNXnet/IP frames with proper headers.
pub struct FrameBuilder<'a> {
    service_type: ServiceType,
    body: &'a [u8],
}

impl<'a> FrameBuilder<'a> {
    /// Create a new frame builder
    pub const fn new(service_type: ServiceType, body: &'a [u8]) -> Self {
        Self { service_type, body }
    }

    /// Build the frame into a buffer
    ///
    /// # Errors
    ///
    /// Returns error if buffer is too small or body is too large.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let total_size = KnxnetIpHeader::SIZE + self.body.len();

        if total_size > MAX_FRAME_SIZE {
            return Err(KnxError::payload_too_large());
        }

        if buf.len() < total_size {
            return Err(KnxError::buffer_too_small());
        }

        let header = KnxnetIpHeader::new(self.service_type, self.body.len() as u16);
        header.encode(buf)?;

        buf[KnxnetIpHeader::SIZE..total_size].copy_from_slice(self.body);

        Ok(total_size)
    }

    /// Build the frame into a freshly allocated `Vec`.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is too large.
    pub fn build_vec(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.size()];
        let n = self.build(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Calculate the total frame size
    pub const fn size(&self) -> usize {
        KnxnetIpHeader::SIZE + self.body.len()
    }
}

/// Host Protocol Address Information (HPAI)
///
/// Structure containing endpoint information (IP address and port).
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Structure Len│ Host Protocol│   IP Address        │
/// │   (1 byte)   │   (1 byte)   │   (4 bytes IPv4)    │
/// ├──────────────┴──────────────┴─────────────────────┤
/// │                Port (2 bytes)                      │
/// └────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hpai {
    /// Structure length (should be 8 for IPv4)
    pub structure_length: u8,
    /// Host protocol code
    pub host_protocol: u8,
    /// IPv4 address (4 bytes)
    pub ip_address: [u8; 4],
    /// UDP port
    pub port: u16,
}

impl Hpai {
    /// Size of HPAI structure for IPv4
    pub const SIZE: usize = 8;

    /// Create a new HPAI for IPv4 UDP
    pub const fn new(ip_address: [u8; 4], port: u16) -> Self {
        Self {
            structure_length: Self::SIZE as u8,
            host_protocol: IPV4_UDP,
            ip_address,
            port,
        }
    }

    /// An HPAI of all-zero fields, meaning "use the sender's address" per the KNX standard.
    pub const UNSPECIFIED: Self = Self::new([0, 0, 0, 0], 0);

    /// Build an HPAI from a `SocketAddrV4`.
    pub fn from_socket_addr(addr: std::net::SocketAddrV4) -> Self {
        Self::new(addr.ip().octets(), addr.port())
    }

    /// Convert this HPAI into a `SocketAddrV4`.
    pub fn to_socket_addr(self) -> std::net::SocketAddrV4 {
        std::net::SocketAddrV4::new(std::net::Ipv4Addr::from(self.ip_address), self.port)
    }

    /// Parse HPAI from bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }

        let structure_length = data[0];
        let host_protocol = data[1];

        if structure_length != Self::SIZE as u8 {
            return Err(KnxError::invalid_frame());
        }

        let ip_address = [data[2], data[3], data[4], data[5]];
        let port = u16::from_be_bytes([data[6], data[7]]);

        Ok(Self {
            structure_length,
            host_protocol,
            ip_address,
            port,
        })
    }

    /// Encode HPAI into bytes
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }

        buf[0] = self.structure_length;
        buf[1] = self.host_protocol;
        buf[2..6].copy_from_slice(&self.ip_address);
        buf[6..8].copy_from_slice(&self.port.to_be_bytes());

        Ok(Self::SIZE)
    }
}

/// Connection Request Information (CRI) for `CONNECT_REQUEST`.
///
/// For tunnelling connections this carries the requested KNX layer
/// (always Link Layer / `TUNNEL_LINKLAYER` for this crate's scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cri {
    /// Connection type code (e.g. `TUNNEL_CONNECTION`)
    pub connection_type: u8,
    /// Connection-type-specific data (for tunnelling: KNX layer byte)
    pub data: [u8; 1],
}

impl Cri {
    /// Size of a tunnelling CRI (4 bytes: len, type, layer, reserved)
    pub const SIZE: usize = 4;

    /// `TUNNEL_LINKLAYER` KNX layer code.
    pub const TUNNEL_LINKLAYER: u8 = 0x02;

    /// Build a CRI for a tunnelling connection request.
    pub const fn tunnel(layer: u8) -> Self {
        Self {
            connection_type: TUNNEL_CONNECTION,
            data: [layer],
        }
    }

    /// Encode the CRI into bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is too small.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::SIZE {
            return Err(KnxError::buffer_too_small());
        }
        buf[0] = Self::SIZE as u8;
        buf[1] = self.connection_type;
        buf[2] = self.data[0];
        buf[3] = 0x00; // reserved
        Ok(Self::SIZE)
    }

    /// Parse a CRI from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is too small or malformed.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(KnxError::buffer_too_small());
        }
        let len = data[0] as usize;
        if data.len() < len || len < 2 {
            return Err(KnxError::invalid_frame());
        }
        let connection_type = data[1];
        let mut payload = [0u8; 1];
        if len > 2 {
            payload[0] = data[2];
        }
        Ok(Self {
            connection_type,
            data: payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parse() {
        let data = [
            0x06, // header length
            0x10, // protocol version
            0x02, 0x01, // service type (SEARCH_REQUEST)
            0x00, 0x0E, // total length (14 bytes)
        ];

        let header = KnxnetIpHeader::parse(&data).unwrap();
        assert_eq!(header.header_length, 0x06);
        assert_eq!(header.protocol_version, 0x10);
        assert_eq!(header.service_type, ServiceType::SearchRequest);
        assert_eq!(header.total_length, 14);
        assert_eq!(header.body_length(), 8);
    }

    #[test]
    fn test_header_encode() {
        let header = KnxnetIpHeader::new(ServiceType::SearchRequest, 8);
        let mut buf = [0u8; 6];
        let size = header.encode(&mut buf).unwrap();

        assert_eq!(size, 6);
        assert_eq!(buf[0], 0x06);
        assert_eq!(buf[1], 0x10);
        assert_eq!(buf[2..4], [0x02, 0x01]);
        assert_eq!(buf[4..6], [0x00, 0x0E]);
    }

    #[test]
    fn test_frame_builder() {
        let body = [0x01, 0x02, 0x03, 0x04];
        let builder = FrameBuilder::new(ServiceType::SearchRequest, &body);

        let mut buf = [0u8; 32];
        let size = builder.build(&mut buf).unwrap();

        assert_eq!(size, 10); // 6 (header) + 4 (body)
        assert_eq!(buf[0], 0x06); // header length
        assert_eq!(buf[1], 0x10); // protocol version
        assert_eq!(buf[4..6], [0x00, 0x0A]); // total length = 10
        assert_eq!(&buf[6..10], &body);
    }

    #[test]
    fn test_frame_builder_vec() {
        let body = [0xAA; 3];
        let builder = FrameBuilder::new(ServiceType::DisconnectRequest, &body);
        let out = builder.build_vec().unwrap();
        assert_eq!(out.len(), 9);
    }

    #[test]
    fn test_hpai_parse() {
        let data = [
            0x08, // structure length
            0x01, // IPv4 UDP
            192, 168, 1, 100, // IP address
            0x0E, 0x57, // port 3671
        ];

        let hpai = Hpai::parse(&data).unwrap();
        assert_eq!(hpai.ip_address, [192, 168, 1, 100]);
        assert_eq!(hpai.port, 3671);
    }

    #[test]
    fn test_hpai_encode() {
        let hpai = Hpai::new([192, 168, 1, 100], 3671);
        let mut buf = [0u8; 8];
        let size = hpai.encode(&mut buf).unwrap();

        assert_eq!(size, 8);
        assert_eq!(buf[0], 0x08);
        assert_eq!(buf[1], 0x01);
        assert_eq!(&buf[2..6], &[192, 168, 1, 100]);
        assert_eq!(&buf[6..8], &[0x0E, 0x57]);
    }

    #[test]
    fn test_hpai_socket_addr_roundtrip() {
        let addr = std::net::SocketAddrV4::new(std::net::Ipv4Addr::new(10, 0, 0, 5), 3671);
        let hpai = Hpai::from_socket_addr(addr);
        assert_eq!(hpai.to_socket_addr(), addr);
    }

    #[test]
    fn test_frame_parse() {
        let data = [
            0x06, 0x10, // header
            0x02, 0x01, // SEARCH_REQUEST
            0x00, 0x0A, // total length = 10
            0x01, 0x02, 0x03, 0x04, // body
        ];

        let frame = KnxnetIpFrame::parse(&data).unwrap();
        assert_eq!(frame.service_type(), ServiceType::SearchRequest);
        assert_eq!(frame.body(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_cri_tunnel_roundtrip() {
        let cri = Cri::tunnel(Cri::TUNNEL_LINKLAYER);
        let mut buf = [0u8; 4];
        cri.encode(&mut buf).unwrap();
        let parsed = Cri::parse(&buf).unwrap();
        assert_eq!(parsed.connection_type, TUNNEL_CONNECTION);
        assert_eq!(parsed.data[0], Cri::TUNNEL_LINKLAYER);
    }
}
