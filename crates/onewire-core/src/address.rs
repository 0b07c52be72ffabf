//! Device address (ROM code) type

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::crc::crc8;
use crate::error::OneWireError;

/// Unique 64-bit device address: family code, 6 serial bytes, checksum.
///
/// Bytes are stored in transmission order, so `bytes()[0]` is the family code
/// and `bytes()[7]` is the CRC8 over the first seven bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress([u8; 8]);

impl DeviceAddress {
    /// Wrap raw address bytes as read from the bus
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Build an address from family and serial, computing the checksum byte
    pub fn with_crc(family: u8, serial: [u8; 6]) -> Self {
        let mut bytes = [0u8; 8];
        bytes[0] = family;
        bytes[1..7].copy_from_slice(&serial);
        bytes[7] = crc8(&bytes[..7]);
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn family(&self) -> u8 {
        self.0[0]
    }

    pub fn serial(&self) -> [u8; 6] {
        let mut serial = [0u8; 6];
        serial.copy_from_slice(&self.0[1..7]);
        serial
    }

    pub fn crc(&self) -> u8 {
        self.0[7]
    }

    /// Check that the last byte is the CRC8 of the first seven
    pub fn has_valid_crc(&self) -> bool {
        crc8(&self.0[..7]) == self.0[7]
    }

    /// Key ordering addresses the way a search walks the tree.
    ///
    /// The first bit on the wire (LSB of the family byte) is the most
    /// significant bit of the key, so an enumeration yields addresses in
    /// ascending key order.
    pub fn search_key(&self) -> u64 {
        u64::from_le_bytes(self.0).reverse_bits()
    }
}

impl From<[u8; 8]> for DeviceAddress {
    fn from(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }
}

impl From<DeviceAddress> for [u8; 8] {
    fn from(address: DeviceAddress) -> Self {
        address.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl FromStr for DeviceAddress {
    type Err = OneWireError;

    /// Parse 16 hex digits in transmission order; `:`, `-` and spaces are ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | ' '))
            .collect();
        if digits.len() != 16 || !digits.is_ascii() {
            return Err(OneWireError::InvalidAddress(s.to_string()));
        }

        let mut bytes = [0u8; 8];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|_| OneWireError::InvalidAddress(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for DeviceAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_crc_matches_known_rom() {
        // Example ROM from the Maxim CRC application note
        let address = DeviceAddress::with_crc(0x02, [0x1C, 0xB8, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(address.crc(), 0xA2);
        assert!(address.has_valid_crc());
    }

    #[test]
    fn test_corrupted_crc_detected() {
        let mut bytes = *DeviceAddress::with_crc(0x28, [1, 2, 3, 4, 5, 6]).bytes();
        bytes[7] ^= 0x01;
        assert!(!DeviceAddress::from_bytes(bytes).has_valid_crc());
    }

    #[test]
    fn test_parse_and_display() {
        let address: DeviceAddress = "28:FF:4C:60:91:16:04:8E".parse().unwrap();
        assert_eq!(address.family(), 0x28);
        assert_eq!(address.serial(), [0xFF, 0x4C, 0x60, 0x91, 0x16, 0x04]);
        assert_eq!(address.to_string(), "28FF4C609116048E");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("28FF".parse::<DeviceAddress>().is_err());
        assert!("ZZFF4C609116048E".parse::<DeviceAddress>().is_err());
        assert!("28FF4C609116048E00".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn test_search_key_uses_wire_bit_order() {
        // 0x02 sends a 0 first, 0x01 sends a 1 first
        let a = DeviceAddress::from_bytes([0x02, 0, 0, 0, 0, 0, 0, 0]);
        let b = DeviceAddress::from_bytes([0x01, 0, 0, 0, 0, 0, 0, 0]);
        assert!(a.search_key() < b.search_key());
        assert_eq!(b.search_key(), 1u64 << 63);
    }

    #[test]
    fn test_serde_as_hex_string() {
        let address = DeviceAddress::from_bytes([0x10, 1, 2, 3, 4, 5, 6, 7]);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"1001020304050607\"");
        let back: DeviceAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }
}
