//! Description Information Block (DIB) codec.
//!
//! `SEARCH_RESPONSE` and `DESCRIPTION_RESPONSE` bodies carry a self-describing
//! HPAI followed by zero or more DIBs, each a `{structure_length, type_code, data}`
//! TLV. This module decodes the two DIB types the scanner needs
//! (`DEVICE_INFO`, `SUPP_SVC_FAMILIES`) and preserves any other type code
//! opaquely rather than rejecting the frame, so unfamiliar gateway firmware
//! doesn't break discovery.

use crate::addressing::IndividualAddress;
use crate::error::{KnxError, Result};
use crate::protocol::constants::{DIB_DEVICE_INFO, DIB_MFR_DATA, DIB_SUPP_SVC_FAMILIES};

/// Decoded `DEVICE_INFO` DIB (type 0x01).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfoDib {
    /// KNX medium code (TP1, PL110, RF, KNX IP, ...)
    pub knx_medium: u8,
    /// Device status byte (bit 0: programming mode)
    pub device_status: u8,
    /// Device's individual address on the KNX bus
    pub knx_individual_address: IndividualAddress,
    /// Project installation identifier
    pub project_install_identifier: u16,
    /// Device serial number (6 bytes)
    pub device_serial: [u8; 6],
    /// Device routing multicast address
    pub device_multicast_address: [u8; 4],
    /// Device MAC address (6 bytes)
    pub device_mac_address: [u8; 6],
    /// Friendly name, fixed 30-byte field, NUL-padded
    pub friendly_name: [u8; 30],
}

impl DeviceInfoDib {
    /// Fixed wire size of the `DEVICE_INFO` DIB, including the 2-byte TLV header.
    pub const SIZE: usize = 54;

    /// Friendly name with trailing NUL bytes stripped, as a lossy UTF-8 string.
    pub fn friendly_name_str(&self) -> String {
        let end = self
            .friendly_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.friendly_name.len());
        String::from_utf8_lossy(&self.friendly_name[..end]).into_owned()
    }

    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE - 2 {
            return Err(KnxError::buffer_too_small());
        }

        let knx_medium = data[0];
        let device_status = data[1];
        let knx_individual_address = IndividualAddress::decode(&data[2..4])?;
        let project_install_identifier = u16::from_be_bytes([data[4], data[5]]);

        let mut device_serial = [0u8; 6];
        device_serial.copy_from_slice(&data[6..12]);

        let mut device_multicast_address = [0u8; 4];
        device_multicast_address.copy_from_slice(&data[12..16]);

        let mut device_mac_address = [0u8; 6];
        device_mac_address.copy_from_slice(&data[16..22]);

        let mut friendly_name = [0u8; 30];
        friendly_name.copy_from_slice(&data[22..52]);

        Ok(Self {
            knx_medium,
            device_status,
            knx_individual_address,
            project_install_identifier,
            device_serial,
            device_multicast_address,
            device_mac_address,
            friendly_name,
        })
    }
}

/// One entry of a `SUPP_SVC_FAMILIES` DIB: a service family and the highest
/// version of it the gateway supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceFamily {
    /// Service family identifier
    pub family_id: u8,
    /// Highest supported version of that family
    pub version: u8,
}

/// A single Description Information Block, decoded where recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dib {
    /// `DEVICE_INFO` (0x01)
    DeviceInfo(DeviceInfoDib),
    /// `SUPP_SVC_FAMILIES` (0x02)
    SupportedServiceFamilies(Vec<ServiceFamily>),
    /// Any other DIB type code, preserved opaquely for forward compatibility
    Other {
        /// The raw description type code
        type_code: u8,
        /// The DIB's data bytes, excluding the 2-byte TLV header
        data: Vec<u8>,
    },
}

impl Dib {
    /// Parse one DIB starting at the front of `data`. Returns the parsed DIB
    /// and the total number of bytes consumed (the structure length).
    ///
    /// # Errors
    ///
    /// Returns an error if the structure length is zero or exceeds the
    /// available data, or if a known DIB type's fixed layout doesn't fit.
    pub fn parse_one(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 2 {
            return Err(KnxError::buffer_too_small());
        }

        let structure_length = data[0] as usize;
        if structure_length < 2 || structure_length > data.len() {
            return Err(KnxError::invalid_frame());
        }

        let type_code = data[1];
        let body = &data[2..structure_length];

        let dib = match type_code {
            DIB_DEVICE_INFO => Self::DeviceInfo(DeviceInfoDib::parse(body)?),
            DIB_SUPP_SVC_FAMILIES => {
                let families = body
                    .chunks_exact(2)
                    .map(|pair| ServiceFamily {
                        family_id: pair[0],
                        version: pair[1],
                    })
                    .collect();
                Self::SupportedServiceFamilies(families)
            }
            _ => Self::Other {
                type_code,
                data: body.to_vec(),
            },
        };

        Ok((dib, structure_length))
    }

    /// Parse every DIB present in `data`, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if any individual DIB fails to parse.
    pub fn parse_all(mut data: &[u8]) -> Result<Vec<Self>> {
        let mut dibs = Vec::new();
        while !data.is_empty() {
            let (dib, consumed) = Self::parse_one(data)?;
            dibs.push(dib);
            data = &data[consumed..];
        }
        Ok(dibs)
    }

    /// The DIB's raw description type code.
    pub const fn type_code(&self) -> u8 {
        match self {
            Self::DeviceInfo(_) => DIB_DEVICE_INFO,
            Self::SupportedServiceFamilies(_) => DIB_SUPP_SVC_FAMILIES,
            Self::Other { type_code, .. } => *type_code,
        }
    }

    /// Whether this is manufacturer-specific data (0xFE), a DIB type that
    /// is always preserved opaquely.
    pub fn is_manufacturer_data(&self) -> bool {
        self.type_code() == DIB_MFR_DATA
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device_info_dib() -> Vec<u8> {
        let mut buf = vec![0u8; DeviceInfoDib::SIZE];
        buf[0] = DeviceInfoDib::SIZE as u8;
        buf[1] = DIB_DEVICE_INFO;
        buf[2] = 0x02; // knx_medium
        buf[3] = 0x00; // device_status
        buf[4..6].copy_from_slice(&IndividualAddress::new(15, 15, 255).unwrap().raw().to_be_bytes());
        buf[6..8].copy_from_slice(&0x1234u16.to_be_bytes());
        buf[8..14].copy_from_slice(&[0x00, 0xFA, 0x01, 0x02, 0x03, 0x04]);
        buf[14..18].copy_from_slice(&[224, 0, 23, 12]);
        buf[18..24].copy_from_slice(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05]);
        let name = b"MDT KNX IP Interface";
        buf[24..24 + name.len()].copy_from_slice(name);
        buf
    }

    #[test]
    fn test_parse_device_info() {
        let raw = sample_device_info_dib();
        let (dib, consumed) = Dib::parse_one(&raw).unwrap();
        assert_eq!(consumed, DeviceInfoDib::SIZE);

        let Dib::DeviceInfo(info) = dib else {
            panic!("expected DeviceInfo");
        };
        assert_eq!(info.knx_individual_address, IndividualAddress::new(15, 15, 255).unwrap());
        assert_eq!(info.device_serial, [0x00, 0xFA, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(info.friendly_name_str(), "MDT KNX IP Interface");
    }

    #[test]
    fn test_parse_supported_service_families() {
        let raw = [0x06, DIB_SUPP_SVC_FAMILIES, 0x02, 0x01, 0x03, 0x02];
        let (dib, consumed) = Dib::parse_one(&raw).unwrap();
        assert_eq!(consumed, 6);

        let Dib::SupportedServiceFamilies(families) = dib else {
            panic!("expected SupportedServiceFamilies");
        };
        assert_eq!(families.len(), 2);
        assert_eq!(families[0], ServiceFamily { family_id: 0x02, version: 0x01 });
        assert_eq!(families[1], ServiceFamily { family_id: 0x03, version: 0x02 });
    }

    #[test]
    fn test_unknown_dib_preserved_opaquely() {
        let raw = [0x04, 0xEE, 0xAA, 0xBB];
        let (dib, consumed) = Dib::parse_one(&raw).unwrap();
        assert_eq!(consumed, 4);
        assert!(matches!(dib, Dib::Other { type_code: 0xEE, .. }));
    }

    #[test]
    fn test_parse_all_multiple_dibs() {
        let mut raw = sample_device_info_dib();
        raw.extend_from_slice(&[0x06, DIB_SUPP_SVC_FAMILIES, 0x02, 0x01, 0x03, 0x02]);

        let dibs = Dib::parse_all(&raw).unwrap();
        assert_eq!(dibs.len(), 2);
        assert!(matches!(dibs[0], Dib::DeviceInfo(_)));
        assert!(matches!(dibs[1], Dib::SupportedServiceFamilies(_)));
    }

    #[test]
    fn test_invalid_structure_length() {
        let raw = [0x01, DIB_DEVICE_INFO];
        assert!(Dib::parse_one(&raw).is_err());
    }
}
