//! # dot11 - IEEE 802.11 frame inspection and interface control
//!
//! Building blocks for passive wireless capture:
//!
//! - **radiotap**: per-frame radio metadata prepended by monitor-mode drivers
//! - **frame**: the 802.11 MAC header and management frame fixed fields
//! - **element**: information elements, SSIDs and RSN/WPA key management
//! - **payload**: IP and transport addressing in unprotected data frames
//! - **phy**: switching an interface between managed and monitor mode

pub mod element;
pub mod error;
pub mod frame;
pub mod payload;
pub mod phy;
pub mod radiotap;

pub use element::{Elements, KeyManagement, SecurityElement, SuiteList};
pub use error::{Dot11Error, Result};
pub use frame::{Capability, Frame80211, FrameControl, FrameType, MacAddr, ManagementBody};
pub use payload::{ip_summary, IpSummary};
pub use phy::{InterfaceController, InterfaceMode, IwLinkControl, LinkControl, MonitorModeGuard, PhyError};
pub use radiotap::RadiotapHeader;

/// Bare 802.11 frames
pub const LINKTYPE_IEEE802_11: i32 = 105;

/// 802.11 frames behind a radiotap header
pub const LINKTYPE_IEEE802_11_RADIOTAP: i32 = 127;

/// A captured frame split into its radio metadata and MAC frame
#[derive(Debug, Clone)]
pub struct Dot11Capture<'a> {
    pub radiotap: Option<RadiotapHeader>,
    pub frame: Frame80211<'a>,
}

impl<'a> Dot11Capture<'a> {
    /// Decode `data` captured on a link of type `link_type`
    pub fn parse(data: &'a [u8], link_type: i32) -> Result<Self> {
        match link_type {
            LINKTYPE_IEEE802_11_RADIOTAP => {
                let (radiotap, rest) = radiotap::split_radiotap(data)?;
                let frame = Frame80211::parse(rest, radiotap.has_fcs())?;
                Ok(Self { radiotap: Some(radiotap), frame })
            }
            LINKTYPE_IEEE802_11 => Ok(Self {
                radiotap: None,
                frame: Frame80211::parse(data, false)?,
            }),
            other => Err(Dot11Error::UnsupportedLinkType(other)),
        }
    }

    /// Antenna signal in dBm, when the driver reported it
    pub fn signal_dbm(&self) -> Option<i8> {
        self.radiotap.as_ref().and_then(|r| r.antenna_signal)
    }
}
