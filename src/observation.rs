//! Observation records
//!
//! One [`Observation`] is produced for every captured frame that carries a
//! valid 802.11 header. It is what the console prints and what the store
//! persists.

use chrono::NaiveDateTime;
use dot11::MacAddr;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::gps::Position;
use crate::{SniffError, HIDDEN_NETWORK_NAME, TIME_FORMAT};

/// Which side of the perimeter the capture was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SniffType {
    #[default]
    Internal,
    External,
}

impl SniffType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SniffType::Internal => "internal",
            SniffType::External => "external",
        }
    }
}

impl fmt::Display for SniffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SniffType {
    type Err = SniffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(SniffType::Internal),
            "external" => Ok(SniffType::External),
            other => Err(SniffError::Config(format!("Unknown sniff type: {}", other))),
        }
    }
}

/// Encryption posture advertised by a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionType {
    Public,
    #[serde(rename = "WPA")]
    Wpa,
    #[serde(rename = "WPA2")]
    Wpa2,
    #[serde(rename = "WPA3")]
    Wpa3,
}

impl EncryptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionType::Public => "Public",
            EncryptionType::Wpa => "WPA",
            EncryptionType::Wpa2 => "WPA2",
            EncryptionType::Wpa3 => "WPA3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    #[serde(rename = "PSK")]
    Psk,
    Enterprise,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Psk => "PSK",
            AuthMode::Enterprise => "Enterprise",
        }
    }
}

/// Encryption type with the authentication mode that goes with it.
///
/// An auth mode never exists without an encryption type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    pub encryption: EncryptionType,
    pub auth: Option<AuthMode>,
}

impl Security {
    pub const fn new(encryption: EncryptionType, auth: AuthMode) -> Self {
        Self { encryption, auth: Some(auth) }
    }

    pub const fn public() -> Self {
        Self { encryption: EncryptionType::Public, auth: None }
    }
}

/// Coarse 802.11 frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameClass {
    Management,
    Control,
    Data,
    Unknown,
}

impl FrameClass {
    /// Map the two-bit frame type code
    pub fn from_type_code(code: u8) -> Self {
        match code {
            0 => FrameClass::Management,
            1 => FrameClass::Control,
            2 => FrameClass::Data,
            _ => FrameClass::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameClass::Management => "management",
            FrameClass::Control => "control",
            FrameClass::Data => "data",
            FrameClass::Unknown => "unknown",
        }
    }
}

/// Storage-assigned project identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(pub i64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata extracted from one captured frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub project_id: ProjectId,
    pub capture_time: NaiveDateTime,
    /// Transmitter address (addr2)
    pub src_addr: Option<MacAddr>,
    /// Receiver address (addr1)
    pub dst_addr: Option<MacAddr>,
    /// Advertised SSID; `None` renders as [`HIDDEN_NETWORK_NAME`]
    pub network_name: Option<String>,
    pub security: Option<Security>,
    pub signal_dbm: Option<i8>,
    /// Captured length including the radiotap header
    pub content_length: usize,
    pub frame_class: FrameClass,
    pub frame_subtype: String,
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub position: Option<Position>,
    pub sniff_type: SniffType,
}

impl Observation {
    pub fn network_name_or_hidden(&self) -> &str {
        match self.network_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => HIDDEN_NETWORK_NAME,
        }
    }

    pub fn encryption(&self) -> Option<EncryptionType> {
        self.security.map(|s| s.encryption)
    }

    pub fn auth_mode(&self) -> Option<AuthMode> {
        self.security.and_then(|s| s.auth)
    }

    pub fn gps_lat(&self) -> Option<f64> {
        self.position.map(|p| p.lat)
    }

    pub fn gps_lon(&self) -> Option<f64> {
        self.position.map(|p| p.lon)
    }

    pub fn formatted_time(&self) -> String {
        self.capture_time.format(TIME_FORMAT).to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    pub(crate) fn sample_observation() -> Observation {
        Observation {
            project_id: ProjectId(7),
            capture_time: NaiveDate::from_ymd_opt(2024, 5, 1)
                .and_then(|d| d.and_hms_opt(12, 30, 5))
                .unwrap(),
            src_addr: Some(MacAddr([0x02, 0x11, 0x22, 0x33, 0x44, 0x55])),
            dst_addr: Some(MacAddr([0xff; 6])),
            network_name: Some("lab".to_string()),
            security: Some(Security::new(EncryptionType::Wpa2, AuthMode::Psk)),
            signal_dbm: Some(-60),
            content_length: 120,
            frame_class: FrameClass::Management,
            frame_subtype: "8".to_string(),
            src_ip: None,
            dst_ip: None,
            src_port: None,
            dst_port: None,
            position: None,
            sniff_type: SniffType::Internal,
        }
    }

    #[test]
    fn test_hidden_name_rendering() {
        let mut obs = sample_observation();
        assert_eq!(obs.network_name_or_hidden(), "lab");
        obs.network_name = None;
        assert_eq!(obs.network_name_or_hidden(), HIDDEN_NETWORK_NAME);
        obs.network_name = Some(String::new());
        assert_eq!(obs.network_name_or_hidden(), HIDDEN_NETWORK_NAME);
    }

    #[test]
    fn test_security_accessors() {
        let mut obs = sample_observation();
        assert_eq!(obs.encryption(), Some(EncryptionType::Wpa2));
        assert_eq!(obs.auth_mode(), Some(AuthMode::Psk));

        obs.security = Some(Security::public());
        assert_eq!(obs.encryption().map(|e| e.as_str()), Some("Public"));
        assert_eq!(obs.auth_mode(), None);
    }

    #[test]
    fn test_position_is_both_or_neither() {
        let mut obs = sample_observation();
        assert_eq!((obs.gps_lat(), obs.gps_lon()), (None, None));
        obs.position = Some(Position { lat: 47.6, lon: -122.3 });
        assert_eq!((obs.gps_lat(), obs.gps_lon()), (Some(47.6), Some(-122.3)));
    }

    #[test]
    fn test_sniff_type_parsing() {
        assert_eq!("external".parse::<SniffType>().unwrap(), SniffType::External);
        assert!("outside".parse::<SniffType>().is_err());
    }

    #[test]
    fn test_formatted_time() {
        assert_eq!(sample_observation().formatted_time(), "2024-05-01 12:30:05");
    }

    #[test]
    fn test_frame_class_codes() {
        assert_eq!(FrameClass::from_type_code(2), FrameClass::Data);
        assert_eq!(FrameClass::from_type_code(3).as_str(), "unknown");
    }
}
