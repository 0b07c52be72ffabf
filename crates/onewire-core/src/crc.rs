//! 1-Wire checksums
//!
//! CRC8 covers device addresses and scratchpads; CRC16 covers packet
//! payloads. Devices transmit the CRC16 inverted, so callers compare against
//! `!crc16(..)` when validating a received frame.

use crc::{Crc, CRC_16_ARC, CRC_8_MAXIM_DOW};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// Dallas/Maxim CRC8 (polynomial x^8 + x^5 + x^4 + 1, reflected, init 0)
pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

/// 1-Wire CRC16 (polynomial x^16 + x^15 + x^2 + 1, reflected, init 0)
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}
