//! Radiotap header parsing
//!
//! Monitor-mode captures on Linux deliver every 802.11 frame behind a radiotap
//! header carrying per-frame radio metadata. Only the standard-namespace fields
//! of the first present word are decoded; everything after the last field we
//! know how to size is skipped using the header length.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Dot11Error, Result};

/// Radiotap header present flags
pub mod present_flags {
    pub const TSFT: u32 = 1 << 0;
    pub const FLAGS: u32 = 1 << 1;
    pub const RATE: u32 = 1 << 2;
    pub const CHANNEL: u32 = 1 << 3;
    pub const FHSS: u32 = 1 << 4;
    pub const DBM_ANTSIGNAL: u32 = 1 << 5;
    pub const DBM_ANTNOISE: u32 = 1 << 6;
    pub const LOCK_QUALITY: u32 = 1 << 7;
    pub const TX_ATTENUATION: u32 = 1 << 8;
    pub const DB_TX_ATTENUATION: u32 = 1 << 9;
    pub const DBM_TX_POWER: u32 = 1 << 10;
    pub const ANTENNA: u32 = 1 << 11;
    pub const DB_ANTSIGNAL: u32 = 1 << 12;
    pub const DB_ANTNOISE: u32 = 1 << 13;
    pub const EXT: u32 = 1 << 31;
}

/// Bits of the radiotap FLAGS field
pub mod frame_flags {
    /// Frame includes the 4-byte FCS at the end
    pub const FCS_AT_END: u8 = 0x10;
}

/// (alignment, size) of the fields for bits 0..=13, in bit order
const FIELD_LAYOUT: [(usize, usize); 14] = [
    (8, 8), // TSFT
    (1, 1), // FLAGS
    (1, 1), // RATE
    (2, 4), // CHANNEL
    (1, 2), // FHSS
    (1, 1), // DBM_ANTSIGNAL
    (1, 1), // DBM_ANTNOISE
    (2, 2), // LOCK_QUALITY
    (2, 2), // TX_ATTENUATION
    (2, 2), // DB_TX_ATTENUATION
    (1, 1), // DBM_TX_POWER
    (1, 1), // ANTENNA
    (1, 1), // DB_ANTSIGNAL
    (1, 1), // DB_ANTNOISE
];

/// Decoded radiotap header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RadiotapHeader {
    pub version: u8,
    /// Total header length, i.e. the offset of the 802.11 frame
    pub length: u16,
    /// First present word
    pub present: u32,
    pub timestamp: Option<u64>,
    pub flags: Option<u8>,
    pub rate: Option<u8>,
    pub channel_frequency: Option<u16>,
    pub channel_flags: Option<u16>,
    pub antenna_signal: Option<i8>,
    pub antenna_noise: Option<i8>,
    pub antenna: Option<u8>,
}

fn align(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

impl RadiotapHeader {
    /// Parse a radiotap header, returning it with the offset of the 802.11 frame
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 8 {
            return Err(Dot11Error::radiotap("Radiotap header too short"));
        }

        let mut buf = data;
        let version = buf.get_u8();
        let _pad = buf.get_u8();
        let length = buf.get_u16_le() as usize;
        let present = buf.get_u32_le();

        if version != 0 {
            return Err(Dot11Error::radiotap(format!("Unsupported radiotap version {}", version)));
        }
        if length < 8 || data.len() < length {
            return Err(Dot11Error::radiotap("Incomplete radiotap header"));
        }

        // Skip any extended present words; their fields live in other namespaces.
        let mut offset = 8;
        let mut word = present;
        while word & present_flags::EXT != 0 {
            if offset + 4 > length {
                return Err(Dot11Error::radiotap("Missing extended present field"));
            }
            word = (&data[offset..offset + 4]).get_u32_le();
            offset += 4;
        }

        let mut header = Self {
            version,
            length: length as u16,
            present,
            ..Default::default()
        };

        let fields = &data[..length];
        for (bit, (alignment, size)) in FIELD_LAYOUT.iter().copied().enumerate() {
            if present & (1 << bit) == 0 {
                continue;
            }
            offset = align(offset, alignment);
            if offset + size > fields.len() {
                return Err(Dot11Error::radiotap(format!("Missing field for present bit {}", bit)));
            }
            let mut field = &fields[offset..offset + size];
            match 1u32 << bit {
                present_flags::TSFT => header.timestamp = Some(field.get_u64_le()),
                present_flags::FLAGS => header.flags = Some(field.get_u8()),
                present_flags::RATE => header.rate = Some(field.get_u8()),
                present_flags::CHANNEL => {
                    header.channel_frequency = Some(field.get_u16_le());
                    header.channel_flags = Some(field.get_u16_le());
                }
                present_flags::DBM_ANTSIGNAL => header.antenna_signal = Some(field.get_i8()),
                present_flags::DBM_ANTNOISE => header.antenna_noise = Some(field.get_i8()),
                present_flags::ANTENNA => header.antenna = Some(field.get_u8()),
                _ => {}
            }
            offset += size;
        }

        Ok((header, length))
    }

    /// Whether the captured frame carries a trailing FCS
    pub fn has_fcs(&self) -> bool {
        self.flags.map_or(false, |f| f & frame_flags::FCS_AT_END != 0)
    }

    /// Serialize the fields this type knows about, with proper alignment.
    ///
    /// Only the first present word is emitted; the length field is recomputed.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut present = 0u32;
        if self.timestamp.is_some() {
            present |= present_flags::TSFT;
        }
        if self.flags.is_some() {
            present |= present_flags::FLAGS;
        }
        if self.rate.is_some() {
            present |= present_flags::RATE;
        }
        if self.channel_frequency.is_some() {
            present |= present_flags::CHANNEL;
        }
        if self.antenna_signal.is_some() {
            present |= present_flags::DBM_ANTSIGNAL;
        }
        if self.antenna_noise.is_some() {
            present |= present_flags::DBM_ANTNOISE;
        }
        if self.antenna.is_some() {
            present |= present_flags::ANTENNA;
        }

        let mut buf = BytesMut::with_capacity(32);
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u16_le(0); // patched below
        buf.put_u32_le(present);

        for (bit, (alignment, _)) in FIELD_LAYOUT.iter().copied().enumerate() {
            if present & (1 << bit) == 0 {
                continue;
            }
            while buf.len() % alignment != 0 {
                buf.put_u8(0);
            }
            match 1u32 << bit {
                present_flags::TSFT => buf.put_u64_le(self.timestamp.unwrap_or(0)),
                present_flags::FLAGS => buf.put_u8(self.flags.unwrap_or(0)),
                present_flags::RATE => buf.put_u8(self.rate.unwrap_or(0)),
                present_flags::CHANNEL => {
                    buf.put_u16_le(self.channel_frequency.unwrap_or(0));
                    buf.put_u16_le(self.channel_flags.unwrap_or(0));
                }
                present_flags::DBM_ANTSIGNAL => buf.put_i8(self.antenna_signal.unwrap_or(0)),
                present_flags::DBM_ANTNOISE => buf.put_i8(self.antenna_noise.unwrap_or(0)),
                present_flags::ANTENNA => buf.put_u8(self.antenna.unwrap_or(0)),
                _ => {}
            }
        }

        let length = buf.len() as u16;
        buf[2..4].copy_from_slice(&length.to_le_bytes());
        buf.to_vec()
    }
}

/// Split a radiotap-prefixed capture into its header and the 802.11 frame
pub fn split_radiotap(data: &[u8]) -> Result<(RadiotapHeader, &[u8])> {
    let (header, length) = RadiotapHeader::from_bytes(data)?;
    Ok((header, &data[length..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signal_after_tsft_and_channel() {
        // TSFT, FLAGS, RATE, CHANNEL, DBM_ANTSIGNAL
        let data: Vec<u8> = vec![
            0x00, 0x00, 0x17, 0x00, // version, pad, length = 23
            0x2f, 0x00, 0x00, 0x00, // present
            1, 2, 3, 4, 5, 6, 7, 8, // TSFT
            0x10, // flags: FCS at end
            0x02, // rate
            0x85, 0x09, 0xa0, 0x00, // channel 2437 MHz, flags 0x00a0
            0xc4, // -60 dBm
        ];
        let (header, len) = RadiotapHeader::from_bytes(&data).unwrap();
        assert_eq!(len, 23);
        assert_eq!(header.timestamp, Some(0x0807060504030201));
        assert_eq!(header.channel_frequency, Some(2437));
        assert_eq!(header.antenna_signal, Some(-60));
        assert!(header.has_fcs());
    }

    #[test]
    fn test_channel_field_is_aligned() {
        // FLAGS then CHANNEL: one byte of padding before the channel field
        let data: Vec<u8> = vec![
            0x00, 0x00, 0x0e, 0x00, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x6c, 0x09, 0x80, 0x00,
        ];
        let (header, _) = RadiotapHeader::from_bytes(&data).unwrap();
        assert_eq!(header.flags, Some(0));
        assert_eq!(header.channel_frequency, Some(2412));
        assert_eq!(header.antenna_signal, None);
    }

    #[test]
    fn test_extended_present_words_are_skipped() {
        let data: Vec<u8> = vec![
            0x00, 0x00, 0x0d, 0x00, // length 13
            0x20, 0x00, 0x00, 0x80, // DBM_ANTSIGNAL + EXT
            0x00, 0x00, 0x00, 0x00, // second present word
            0xb0, // -80 dBm
        ];
        let (header, len) = RadiotapHeader::from_bytes(&data).unwrap();
        assert_eq!(len, 13);
        assert_eq!(header.antenna_signal, Some(-80));
    }

    #[test]
    fn test_truncated_header_is_rejected() {
        assert!(RadiotapHeader::from_bytes(&[0x00, 0x00, 0x20]).is_err());
        let data = [0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(RadiotapHeader::from_bytes(&data).is_err());
    }

    #[test]
    fn test_to_bytes_parses_back() {
        let header = RadiotapHeader {
            flags: Some(0),
            channel_frequency: Some(5180),
            channel_flags: Some(0x0140),
            antenna_signal: Some(-42),
            ..Default::default()
        };
        let bytes = header.to_bytes();
        let (parsed, len) = RadiotapHeader::from_bytes(&bytes).unwrap();
        assert_eq!(len, bytes.len());
        assert_eq!(parsed.antenna_signal, Some(-42));
        assert_eq!(parsed.channel_frequency, Some(5180));
        assert!(!parsed.has_fcs());
    }
}
