//! Mode S CRC-24 parity.
//!
//! Generator polynomial 0xFFF409. An extended squitter carries pure parity, so
//! a clean frame leaves a zero remainder. Comm-B replies overlay the parity
//! with the transponder address, so the remainder of a clean frame IS the
//! address.

const GENERATOR: u32 = 0xFFF409;

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x800000 != 0 {
                (crc << 1) ^ GENERATOR
            } else {
                crc << 1
            };
            crc &= 0xFFFFFF;
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_crc_table();

/// Polynomial remainder of the payload XOR'd with the trailing 24-bit parity
/// field.
///
/// Returns 0 for a valid DF17 frame and the ICAO address for a valid DF20/21.
/// Frames of 3 bytes or fewer have no payload and return their raw value.
pub fn crc24(data: &[u8]) -> u32 {
    if data.len() <= 3 {
        return data.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32) & 0xFFFFFF;
    }

    let (payload, parity) = data.split_at(data.len() - 3);
    let crc = payload.iter().fold(0u32, |crc, &byte| {
        ((crc << 8) ^ CRC_TABLE[(((crc >> 16) ^ byte as u32) & 0xFF) as usize]) & 0xFFFFFF
    });

    crc ^ ((parity[0] as u32) << 16 | (parity[1] as u32) << 8 | parity[2] as u32)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hex_decode;

    const VALID_SQUITTERS: &[&str] = &[
        "8DA9EE47213B7CF954C820605AD9",
        "8DA9EE475817C1396C22F4C98C5A",
        "8DA9EE4799003E06802403BA26E4",
        "8D4840D6202CC371C32CE0576098",
    ];

    #[test]
    fn test_crc_table_entry_zero() {
        assert_eq!(CRC_TABLE[0], 0);
        assert_eq!(CRC_TABLE[1], GENERATOR);
    }

    #[test]
    fn test_valid_squitter_remainder_zero() {
        for hex in VALID_SQUITTERS {
            let data = hex_decode(hex).unwrap();
            assert_eq!(crc24(&data), 0, "CRC should be 0 for {hex}");
        }
    }

    #[test]
    fn test_corrupted_squitter_nonzero() {
        let mut data = hex_decode(VALID_SQUITTERS[0]).unwrap();
        data[6] ^= 0x10;
        assert_ne!(crc24(&data), 0);
    }

    #[test]
    fn test_comm_b_remainder_is_address() {
        let data = hex_decode("A00002BC000000000000008793E7").unwrap();
        assert_eq!(crc24(&data), 0xA9EE47);
    }
}
