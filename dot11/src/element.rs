//! Information elements and the security suites they advertise

use bytes::Buf;

/// Element identifiers
pub mod element_id {
    pub const SSID: u8 = 0;
    pub const RSN: u8 = 48;
    pub const VENDOR_SPECIFIC: u8 = 221;
}

/// IEEE 802.11 suite OUI, used by RSN suite selectors
pub const IEEE_OUI: [u8; 3] = [0x00, 0x0f, 0xac];

/// Microsoft OUI, used by the pre-RSN WPA element
pub const WPA_OUI: [u8; 3] = [0x00, 0x50, 0xf2];

/// Vendor type of the WPA element under [`WPA_OUI`]
pub const WPA_VENDOR_TYPE: u8 = 1;

/// A single tagged element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    pub id: u8,
    pub data: &'a [u8],
}

/// Iterator over a management frame's element list.
///
/// Stops at the first element whose declared length overruns the buffer.
#[derive(Debug, Clone)]
pub struct Elements<'a> {
    remaining: &'a [u8],
}

impl<'a> Elements<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { remaining: data }
    }

    /// First SSID element, if any
    pub fn ssid(&self) -> Option<&'a [u8]> {
        self.clone()
            .find(|e| e.id == element_id::SSID)
            .map(|e| e.data)
    }

    /// First RSN or WPA element, in element order
    pub fn security(&self) -> Option<SecurityElement> {
        self.clone().find_map(|e| match e.id {
            element_id::RSN => Some(SecurityElement::Rsn(SuiteList::parse(e.data, IEEE_OUI))),
            element_id::VENDOR_SPECIFIC if is_wpa_element(e.data) => {
                Some(SecurityElement::Wpa(SuiteList::parse(&e.data[4..], WPA_OUI)))
            }
            _ => None,
        })
    }
}

impl<'a> Iterator for Elements<'a> {
    type Item = Element<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.len() < 2 {
            return None;
        }
        let id = self.remaining[0];
        let len = self.remaining[1] as usize;
        let end = 2 + len;
        if end > self.remaining.len() {
            self.remaining = &[];
            return None;
        }
        let data = &self.remaining[2..end];
        self.remaining = &self.remaining[end..];
        Some(Element { id, data })
    }
}

fn is_wpa_element(data: &[u8]) -> bool {
    data.len() >= 4 && data[..3] == WPA_OUI && data[3] == WPA_VENDOR_TYPE
}

/// Authentication and key management suites
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyManagement {
    /// 802.1X authentication, including FT and Suite-B variants
    Ieee8021x,
    /// Pre-shared key, including FT and SHA-256 variants
    Psk,
    /// Simultaneous authentication of equals
    Sae,
    Other(u8),
}

impl KeyManagement {
    fn from_rsn(suite_type: u8) -> Self {
        match suite_type {
            1 | 3 | 5 | 11 | 12 | 13 => Self::Ieee8021x,
            2 | 4 | 6 => Self::Psk,
            8 | 9 | 24 | 25 => Self::Sae,
            other => Self::Other(other),
        }
    }

    fn from_wpa(suite_type: u8) -> Self {
        match suite_type {
            1 => Self::Ieee8021x,
            2 => Self::Psk,
            other => Self::Other(other),
        }
    }
}

/// The AKM suites of an RSN or WPA element.
///
/// Truncated elements keep whatever suites were fully present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteList {
    pub akm: Vec<KeyManagement>,
}

impl SuiteList {
    fn parse(data: &[u8], oui: [u8; 3]) -> Self {
        let mut buf = data;
        let mut list = Self::default();

        // version + group cipher
        if buf.remaining() < 6 {
            return list;
        }
        buf.advance(6);

        if buf.remaining() < 2 {
            return list;
        }
        let pairwise = buf.get_u16_le() as usize;
        if buf.remaining() < pairwise * 4 {
            return list;
        }
        buf.advance(pairwise * 4);

        if buf.remaining() < 2 {
            return list;
        }
        let count = buf.get_u16_le() as usize;
        for _ in 0..count {
            if buf.remaining() < 4 {
                break;
            }
            let mut suite = [0u8; 4];
            buf.copy_to_slice(&mut suite);
            if suite[..3] != oui {
                continue;
            }
            list.akm.push(if oui == WPA_OUI {
                KeyManagement::from_wpa(suite[3])
            } else {
                KeyManagement::from_rsn(suite[3])
            });
        }
        list
    }

    pub fn contains(&self, akm: KeyManagement) -> bool {
        self.akm.contains(&akm)
    }
}

/// The security element that decides a BSS's posture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityElement {
    Rsn(SuiteList),
    Wpa(SuiteList),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsn_body(akm_types: &[u8]) -> Vec<u8> {
        let mut body = vec![0x01, 0x00, 0x00, 0x0f, 0xac, 0x04, 0x01, 0x00, 0x00, 0x0f, 0xac, 0x04];
        body.extend_from_slice(&(akm_types.len() as u16).to_le_bytes());
        for t in akm_types {
            body.extend_from_slice(&[0x00, 0x0f, 0xac, *t]);
        }
        body.extend_from_slice(&[0x00, 0x00]);
        body
    }

    fn element(id: u8, body: &[u8]) -> Vec<u8> {
        let mut e = vec![id, body.len() as u8];
        e.extend_from_slice(body);
        e
    }

    #[test]
    fn test_iterate_elements() {
        let mut data = element(0, b"cafe");
        data.extend(element(1, &[0x82, 0x84]));
        let ids: Vec<u8> = Elements::new(&data).map(|e| e.id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(Elements::new(&data).ssid(), Some(&b"cafe"[..]));
    }

    #[test]
    fn test_overrunning_element_stops_iteration() {
        let data = [0x00, 0x04, b'a', b'b', 0x30, 0xff, 0x01];
        let elements: Vec<_> = Elements::new(&data).collect();
        assert_eq!(elements.len(), 1);
        assert!(Elements::new(&data).security().is_none());
    }

    #[test]
    fn test_rsn_akm_suites() {
        let data = element(48, &rsn_body(&[2, 8]));
        match Elements::new(&data).security() {
            Some(SecurityElement::Rsn(suites)) => {
                assert_eq!(suites.akm, vec![KeyManagement::Psk, KeyManagement::Sae]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_wpa_vendor_element() {
        let mut body = vec![0x00, 0x50, 0xf2, 0x01, 0x01, 0x00, 0x00, 0x50, 0xf2, 0x02];
        body.extend_from_slice(&[0x01, 0x00, 0x00, 0x50, 0xf2, 0x02]);
        body.extend_from_slice(&[0x01, 0x00, 0x00, 0x50, 0xf2, 0x01]);
        let data = element(221, &body);
        assert_eq!(
            Elements::new(&data).security(),
            Some(SecurityElement::Wpa(SuiteList { akm: vec![KeyManagement::Ieee8021x] }))
        );
    }

    #[test]
    fn test_other_vendor_elements_are_ignored() {
        // WMM element: Microsoft OUI, vendor type 2
        let mut data = element(221, &[0x00, 0x50, 0xf2, 0x02, 0x01, 0x01]);
        data.extend(element(48, &rsn_body(&[1])));
        match Elements::new(&data).security() {
            Some(SecurityElement::Rsn(suites)) => assert!(suites.contains(KeyManagement::Ieee8021x)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncated_rsn_has_no_suites() {
        let data = element(48, &[0x01, 0x00, 0x00, 0x0f]);
        assert_eq!(
            Elements::new(&data).security(),
            Some(SecurityElement::Rsn(SuiteList::default()))
        );
    }
}
