//! Frame classification
//!
//! Turns one captured frame into an [`Observation`]. Classification is pure:
//! the capture time and the current position are supplied by the caller.
//! Only a frame without a usable 802.11 header is skipped; every individual
//! field that cannot be extracted is simply left empty.

use bytes::Bytes;
use chrono::NaiveDateTime;
use dot11::{Dot11Capture, Frame80211, KeyManagement, ManagementBody, SecurityElement};

use crate::gps::Position;
use crate::observation::{
    AuthMode, EncryptionType, FrameClass, Observation, ProjectId, Security, SniffType,
};
use crate::HIDDEN_NETWORK_NAME;

/// A frame as delivered by the capture source
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub data: Bytes,
    /// pcap link-layer header type
    pub link_type: i32,
}

impl CapturedFrame {
    pub fn new(data: impl Into<Bytes>, link_type: i32) -> Self {
        Self { data: data.into(), link_type }
    }
}

/// Run-wide values stamped onto every observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyContext {
    pub project_id: ProjectId,
    pub sniff_type: SniffType,
}

/// Classify a captured frame.
///
/// Returns `None` when the frame has no recognizable 802.11 header.
pub fn classify(
    frame: &CapturedFrame,
    context: &ClassifyContext,
    capture_time: NaiveDateTime,
    position: Option<Position>,
) -> Option<Observation> {
    let capture = match Dot11Capture::parse(&frame.data, frame.link_type) {
        Ok(capture) => capture,
        Err(e) => {
            log::trace!("Skipping frame: {}", e);
            return None;
        }
    };

    let mac = &capture.frame;
    let management = mac.management_body();
    let (src_ip, dst_ip, src_port, dst_port) = ip_fields(mac);

    Some(Observation {
        project_id: context.project_id,
        capture_time,
        src_addr: mac.addr2,
        dst_addr: mac.addr1,
        network_name: management.as_ref().map(network_name),
        security: management.as_ref().and_then(security),
        signal_dbm: capture.signal_dbm(),
        content_length: frame.data.len(),
        frame_class: FrameClass::from_type_code(mac.control.type_code()),
        frame_subtype: mac.subtype().to_string(),
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        position,
        sniff_type: context.sniff_type,
    })
}

/// Network name of a frame that advertises or requests one.
///
/// Missing, empty and all-NUL SSIDs all read as hidden.
fn network_name(body: &ManagementBody<'_>) -> String {
    let ssid = match body.elements().ssid() {
        Some(ssid) if !ssid.iter().all(|&b| b == 0) => ssid,
        _ => return HIDDEN_NETWORK_NAME.to_string(),
    };

    let name: String = String::from_utf8_lossy(ssid)
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect();

    if name.is_empty() {
        HIDDEN_NETWORK_NAME.to_string()
    } else {
        name
    }
}

/// Encryption posture of a frame carrying information elements
fn security(body: &ManagementBody<'_>) -> Option<Security> {
    if body.elements.is_empty() {
        return None;
    }

    let privacy = body.capability.map_or(false, |c| c.privacy());
    if !privacy {
        return Some(Security::public());
    }

    // Privacy without RSN or WPA is legacy WEP, reported as public
    let security = match body.elements().security() {
        Some(SecurityElement::Rsn(suites)) => {
            if suites.contains(KeyManagement::Sae) {
                Security::new(EncryptionType::Wpa3, AuthMode::Enterprise)
            } else if suites.contains(KeyManagement::Psk) {
                Security::new(EncryptionType::Wpa2, AuthMode::Psk)
            } else if suites.contains(KeyManagement::Ieee8021x) {
                Security::new(EncryptionType::Wpa2, AuthMode::Enterprise)
            } else {
                Security::new(EncryptionType::Wpa2, AuthMode::Psk)
            }
        }
        Some(SecurityElement::Wpa(suites)) => {
            if suites.contains(KeyManagement::Psk) {
                Security::new(EncryptionType::Wpa, AuthMode::Psk)
            } else if suites.contains(KeyManagement::Ieee8021x) {
                Security::new(EncryptionType::Wpa, AuthMode::Enterprise)
            } else {
                Security::new(EncryptionType::Wpa, AuthMode::Psk)
            }
        }
        None => Security::public(),
    };
    Some(security)
}

type IpFields = (
    Option<std::net::IpAddr>,
    Option<std::net::IpAddr>,
    Option<u16>,
    Option<u16>,
);

fn ip_fields(mac: &Frame80211<'_>) -> IpFields {
    if !mac.is_data() || mac.control.protected() {
        return (None, None, None, None);
    }
    match dot11::ip_summary(mac.body) {
        Some(ip) => (
            Some(ip.src),
            Some(ip.dst),
            ip.ports.map(|(s, _)| s),
            ip.ports.map(|(_, d)| d),
        ),
        None => (None, None, None, None),
    }
}
