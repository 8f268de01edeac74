//! IEEE 802.11 MAC header parsing

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Dot11Error, Result};

/// Shortest 802.11 frame we accept: frame control, duration and addr1 (ACK/CTS)
pub const MIN_HEADER_LEN: usize = 10;

/// A 48-bit link-layer address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    fn read(data: &[u8], offset: usize) -> Option<Self> {
        data.get(offset..offset + 6).map(|bytes| {
            let mut addr = [0u8; 6];
            addr.copy_from_slice(bytes);
            MacAddr(addr)
        })
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

/// IEEE 802.11 frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    /// Management frames (beacon, probe, auth, etc.)
    Management = 0,
    /// Control frames (RTS, CTS, ACK, etc.)
    Control = 1,
    /// Data frames
    Data = 2,
    /// Extension frames
    Extension = 3,
}

/// Management frame subtypes the inspector cares about
pub mod management_subtype {
    pub const ASSOC_REQUEST: u8 = 0;
    pub const ASSOC_RESPONSE: u8 = 1;
    pub const REASSOC_REQUEST: u8 = 2;
    pub const REASSOC_RESPONSE: u8 = 3;
    pub const PROBE_REQUEST: u8 = 4;
    pub const PROBE_RESPONSE: u8 = 5;
    pub const BEACON: u8 = 8;
}

/// Decoded frame control field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameControl(pub u16);

impl FrameControl {
    pub fn protocol_version(&self) -> u8 {
        (self.0 & 0x3) as u8
    }

    pub fn frame_type(&self) -> FrameType {
        match (self.0 >> 2) & 0x3 {
            0 => FrameType::Management,
            1 => FrameType::Control,
            2 => FrameType::Data,
            _ => FrameType::Extension,
        }
    }

    /// Raw two-bit type code
    pub fn type_code(&self) -> u8 {
        ((self.0 >> 2) & 0x3) as u8
    }

    pub fn subtype(&self) -> u8 {
        ((self.0 >> 4) & 0xF) as u8
    }

    pub fn to_ds(&self) -> bool {
        self.0 & 0x0100 != 0
    }

    pub fn from_ds(&self) -> bool {
        self.0 & 0x0200 != 0
    }

    pub fn protected(&self) -> bool {
        self.0 & 0x4000 != 0
    }

    pub fn order(&self) -> bool {
        self.0 & 0x8000 != 0
    }
}

/// A parsed 802.11 frame borrowing the captured bytes
#[derive(Debug, Clone)]
pub struct Frame80211<'a> {
    pub control: FrameControl,
    /// Receiver address
    pub addr1: Option<MacAddr>,
    /// Transmitter address
    pub addr2: Option<MacAddr>,
    pub addr3: Option<MacAddr>,
    pub addr4: Option<MacAddr>,
    pub sequence: Option<u16>,
    /// Frame body after the MAC header, FCS excluded
    pub body: &'a [u8],
}

impl<'a> Frame80211<'a> {
    /// Parse the MAC header of `data`.
    ///
    /// `fcs_present` strips the trailing four FCS bytes from the body. Frames
    /// shorter than [`MIN_HEADER_LEN`] or with a non-zero protocol version are
    /// rejected; every other field is optional.
    pub fn parse(data: &'a [u8], fcs_present: bool) -> Result<Self> {
        if data.len() < MIN_HEADER_LEN {
            return Err(Dot11Error::frame("Frame too short for 802.11 header"));
        }

        let control = FrameControl(u16::from_le_bytes([data[0], data[1]]));
        if control.protocol_version() != 0 {
            return Err(Dot11Error::frame(format!(
                "Unknown protocol version {}",
                control.protocol_version()
            )));
        }

        let data = if fcs_present && data.len() >= MIN_HEADER_LEN + 4 {
            &data[..data.len() - 4]
        } else {
            data
        };

        let header_len = Self::header_length(control);
        let has_addr3 = !matches!(control.frame_type(), FrameType::Control);
        let has_addr4 = control.frame_type() == FrameType::Data && control.to_ds() && control.from_ds();

        let sequence = if has_addr3 {
            data.get(22..24).map(|b| u16::from_le_bytes([b[0], b[1]]) >> 4)
        } else {
            None
        };

        Ok(Self {
            control,
            addr1: MacAddr::read(data, 4),
            addr2: if header_len > MIN_HEADER_LEN { MacAddr::read(data, 10) } else { None },
            addr3: if has_addr3 { MacAddr::read(data, 16) } else { None },
            addr4: if has_addr4 { MacAddr::read(data, 24) } else { None },
            sequence,
            body: data.get(header_len..).unwrap_or(&[]),
        })
    }

    /// MAC header length implied by the frame control field
    fn header_length(control: FrameControl) -> usize {
        match control.frame_type() {
            FrameType::Management => 24,
            FrameType::Control => match control.subtype() {
                // CTS, ACK
                12 | 13 => 10,
                // RTS, PS-Poll, CF-End, block ack (request), wrapper
                _ => 16,
            },
            FrameType::Data => {
                let mut len = 24;
                if control.to_ds() && control.from_ds() {
                    len += 6;
                }
                // QoS data subtypes
                if control.subtype() & 0x8 != 0 {
                    len += 2;
                    if control.order() {
                        len += 4;
                    }
                }
                len
            }
            FrameType::Extension => 24,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        self.control.frame_type()
    }

    pub fn subtype(&self) -> u8 {
        self.control.subtype()
    }

    pub fn is_management(&self) -> bool {
        self.frame_type() == FrameType::Management
    }

    /// Check if frame is data
    pub fn is_data(&self) -> bool {
        self.frame_type() == FrameType::Data
    }

    /// Fixed fields of a management frame that carries information elements.
    ///
    /// Returns `None` for frames whose body has no element list.
    pub fn management_body(&self) -> Option<ManagementBody<'a>> {
        if !self.is_management() {
            return None;
        }
        use management_subtype::*;

        // (offset of the capability field, offset of the first element)
        let (capability_at, elements_at) = match self.subtype() {
            ASSOC_REQUEST => (Some(0), 4),
            ASSOC_RESPONSE | REASSOC_RESPONSE => (Some(0), 6),
            REASSOC_REQUEST => (Some(0), 10),
            PROBE_REQUEST => (None, 0),
            PROBE_RESPONSE | BEACON => (Some(10), 12),
            _ => return None,
        };

        let body = self.body;
        let capability = capability_at
            .and_then(|at| body.get(at..at + 2))
            .map(|b| Capability(u16::from_le_bytes([b[0], b[1]])));

        Some(ManagementBody {
            capability,
            elements: body.get(elements_at..).unwrap_or(&[]),
        })
    }
}

impl fmt::Display for Frame80211<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |a: Option<MacAddr>| a.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "802.11 {:?} frame (subtype={}), body={}, src={}, dst={}",
            self.frame_type(),
            self.subtype(),
            self.body.len(),
            show(self.addr2),
            show(self.addr1)
        )
    }
}

/// Capability information field of beacons, probe responses and association frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability(pub u16);

impl Capability {
    pub const ESS: u16 = 0x0001;
    pub const IBSS: u16 = 0x0002;
    pub const PRIVACY: u16 = 0x0010;

    /// The privacy bit: the BSS requires some form of encryption
    pub fn privacy(&self) -> bool {
        self.0 & Self::PRIVACY != 0
    }
}

/// Fixed fields and element list of a management frame
#[derive(Debug, Clone, Copy)]
pub struct ManagementBody<'a> {
    pub capability: Option<Capability>,
    /// Raw information elements
    pub elements: &'a [u8],
}

impl<'a> ManagementBody<'a> {
    pub fn elements(&self) -> crate::element::Elements<'a> {
        crate::element::Elements::new(self.elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon(capability: u16, elements: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x80, 0x00, 0x00, 0x00];
        frame.extend_from_slice(&[0xff; 6]);
        frame.extend_from_slice(&[0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        frame.extend_from_slice(&[0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        frame.extend_from_slice(&[0x10, 0x00]);
        frame.extend_from_slice(&[0u8; 8]);
        frame.extend_from_slice(&[0x64, 0x00]);
        frame.extend_from_slice(&capability.to_le_bytes());
        frame.extend_from_slice(elements);
        frame
    }

    #[test]
    fn test_parse_beacon_header() {
        let data = beacon(0x0411, &[0x00, 0x03, b'l', b'a', b'b']);
        let frame = Frame80211::parse(&data, false).unwrap();

        assert!(frame.is_beacon());
        assert_eq!(frame.addr1.unwrap().to_string(), "ff:ff:ff:ff:ff:ff");
        assert!(frame.addr1.unwrap().is_broadcast());
        assert_eq!(frame.addr2.unwrap().to_string(), "02:11:22:33:44:55");
        assert_eq!(frame.sequence, Some(1));

        let body = frame.management_body().unwrap();
        assert!(body.capability.unwrap().privacy());
        assert_eq!(body.elements, &[0x00, 0x03, b'l', b'a', b'b']);
    }

    #[test]
    fn test_ack_has_only_receiver_address() {
        let data = [0xd4, 0x00, 0x00, 0x00, 1, 2, 3, 4, 5, 6];
        let frame = Frame80211::parse(&data, false).unwrap();

        assert_eq!(frame.frame_type(), FrameType::Control);
        assert_eq!(frame.subtype(), 13);
        assert!(frame.addr1.is_some());
        assert!(frame.addr2.is_none());
        assert!(frame.management_body().is_none());
    }

    #[test]
    fn test_short_and_unknown_version_frames_are_rejected() {
        assert!(Frame80211::parse(&[0x80, 0x00, 0x00], false).is_err());
        let mut data = beacon(0, &[]);
        data[0] |= 0x01;
        assert!(Frame80211::parse(&data, false).is_err());
    }

    #[test]
    fn test_fcs_is_stripped_from_body() {
        let mut data = beacon(0x0001, &[0x00, 0x00]);
        data.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let frame = Frame80211::parse(&data, true).unwrap();
        assert_eq!(frame.management_body().unwrap().elements, &[0x00, 0x00]);
    }

    #[test]
    fn test_qos_data_header_length() {
        // QoS data, to-DS
        let mut data = vec![0x88, 0x01, 0x00, 0x00];
        data.extend_from_slice(&[0xaa; 18]);
        data.extend_from_slice(&[0x00, 0x00]); // sequence
        data.extend_from_slice(&[0x00, 0x00]); // QoS control
        data.extend_from_slice(&[0xaa, 0xaa, 0x03]);
        let frame = Frame80211::parse(&data, false).unwrap();
        assert!(frame.is_data());
        assert_eq!(frame.body, &[0xaa, 0xaa, 0x03]);
        assert!(frame.addr4.is_none());
    }
}
