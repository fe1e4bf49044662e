//! Information element walker
//!
//! Management frame bodies end in a chain of `id(1) len(1) data(len)`
//! elements. [`ElementWalker`] iterates them without copying, and
//! [`classify`] maps every element, vendor-specific ones included, to a
//! closed [`ElementKind`].

use crate::{Dot11Error, Result};

/// Element identifiers
pub mod id {
    pub const SSID: u8 = 0;
    pub const RATES: u8 = 1;
    pub const FH_PARMS: u8 = 2;
    pub const DS_PARMS: u8 = 3;
    pub const CF_PARMS: u8 = 4;
    pub const TIM: u8 = 5;
    pub const IBSS_PARMS: u8 = 6;
    pub const COUNTRY: u8 = 7;
    pub const CHALLENGE: u8 = 16;
    pub const ERP: u8 = 42;
    pub const HT_CAP: u8 = 45;
    pub const RSN: u8 = 48;
    pub const XRATES: u8 = 50;
    pub const HT_INFO: u8 = 61;
    pub const VENDOR: u8 = 221;
}

pub const WPA_OUI: [u8; 3] = [0x00, 0x50, 0xf2];
pub const WPA_OUI_TYPE: u8 = 0x01;
pub const WME_OUI: [u8; 3] = WPA_OUI;
pub const WME_OUI_TYPE: u8 = 0x02;
pub const WME_INFO_OUI_SUBTYPE: u8 = 0x00;
pub const WME_PARAM_OUI_SUBTYPE: u8 = 0x01;
pub const ATH_OUI: [u8; 3] = [0x00, 0x03, 0x7f];
pub const ATH_OUI_TYPE: u8 = 0x01;
pub const BCM_OUI: [u8; 3] = [0x00, 0x90, 0x4c];
pub const BCM_OUI_HTCAP: u8 = 51;
pub const BCM_OUI_HTINFO: u8 = 52;

/// OUI + type prefix of a vendor element
pub const VENDOR_HDR_LEN: usize = 4;

/// ERP element bits
pub const ERP_NON_ERP_PRESENT: u8 = 0x01;
pub const ERP_USE_PROTECTION: u8 = 0x02;
pub const ERP_LONG_PREAMBLE: u8 = 0x04;

/// Atheros capability bits
pub const ATH_CAP_TURBO_PRIME: u8 = 0x01;
pub const ATH_CAP_FAST_FRAME: u8 = 0x02;
pub const ATH_CAP_COMPRESSION: u8 = 0x04;

/// Closed classification of an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Ssid,
    Rates,
    FhParams,
    DsParams,
    CfParams,
    Tim,
    IbssParams,
    Country,
    Challenge,
    Erp,
    HtCap,
    HtInfo,
    Rsn,
    ExtRates,
    Wpa,
    WmeInfo,
    WmeParam,
    Atheros,
    /// Pre-standard HT capability in a vendor element
    VendorHtCap,
    /// Pre-standard HT information in a vendor element
    VendorHtInfo,
    UnknownVendor,
    Unknown(u8),
}

impl ElementKind {
    pub fn is_vendor(&self) -> bool {
        matches!(
            self,
            Self::Wpa
                | Self::WmeInfo
                | Self::WmeParam
                | Self::Atheros
                | Self::VendorHtCap
                | Self::VendorHtInfo
                | Self::UnknownVendor
        )
    }
}

/// Classify an element from its id and data
pub fn classify(element_id: u8, data: &[u8]) -> ElementKind {
    match element_id {
        id::SSID => ElementKind::Ssid,
        id::RATES => ElementKind::Rates,
        id::FH_PARMS => ElementKind::FhParams,
        id::DS_PARMS => ElementKind::DsParams,
        id::CF_PARMS => ElementKind::CfParams,
        id::TIM => ElementKind::Tim,
        id::IBSS_PARMS => ElementKind::IbssParams,
        id::COUNTRY => ElementKind::Country,
        id::CHALLENGE => ElementKind::Challenge,
        id::ERP => ElementKind::Erp,
        id::HT_CAP => ElementKind::HtCap,
        id::HT_INFO => ElementKind::HtInfo,
        id::RSN => ElementKind::Rsn,
        id::XRATES => ElementKind::ExtRates,
        id::VENDOR => classify_vendor(data),
        other => ElementKind::Unknown(other),
    }
}

fn classify_vendor(data: &[u8]) -> ElementKind {
    if data.len() < VENDOR_HDR_LEN {
        return ElementKind::UnknownVendor;
    }
    let oui = [data[0], data[1], data[2]];
    let oui_type = data[3];

    match (oui, oui_type) {
        (WPA_OUI, WPA_OUI_TYPE) => ElementKind::Wpa,
        (WME_OUI, WME_OUI_TYPE) => match data.get(4) {
            Some(&WME_INFO_OUI_SUBTYPE) => ElementKind::WmeInfo,
            Some(&WME_PARAM_OUI_SUBTYPE) => ElementKind::WmeParam,
            _ => ElementKind::UnknownVendor,
        },
        (ATH_OUI, ATH_OUI_TYPE) => ElementKind::Atheros,
        (BCM_OUI, BCM_OUI_HTCAP) => ElementKind::VendorHtCap,
        (BCM_OUI, BCM_OUI_HTINFO) => ElementKind::VendorHtInfo,
        _ => ElementKind::UnknownVendor,
    }
}

/// Borrowed view of one element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element<'a> {
    pub id: u8,
    pub kind: ElementKind,
    /// Element data without the two-byte header
    pub data: &'a [u8],
    /// Whole element including the header
    pub raw: &'a [u8],
}

impl<'a> Element<'a> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Data following the OUI and type of a vendor element
    pub fn vendor_payload(&self) -> &'a [u8] {
        self.data.get(VENDOR_HDR_LEN..).unwrap_or(&[])
    }
}

/// Iterator over an element chain
///
/// Yields `Err(Truncated)` once for an element whose length runs past the
/// buffer and then stops. A single trailing byte is ignored.
#[derive(Debug, Clone)]
pub struct ElementWalker<'a> {
    buf: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> ElementWalker<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0, done: false }
    }
}

impl<'a> Iterator for ElementWalker<'a> {
    type Item = Result<Element<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.buf.len() - self.pos < 2 {
            return None;
        }

        let start = self.pos;
        let element_id = self.buf[start];
        let len = self.buf[start + 1] as usize;
        let end = start + 2 + len;

        if end > self.buf.len() {
            self.done = true;
            return Some(Err(Dot11Error::Truncated {
                needed: end - start,
                available: self.buf.len() - start,
            }));
        }

        self.pos = end;
        let data = &self.buf[start + 2..end];
        Some(Ok(Element {
            id: element_id,
            kind: classify(element_id, data),
            data,
            raw: &self.buf[start..end],
        }))
    }
}

/// Walk the elements in `buf`
pub fn walk(buf: &[u8]) -> ElementWalker<'_> {
    ElementWalker::new(buf)
}

/// Find the first element of a kind; truncation ends the search
pub fn find(buf: &[u8], kind: ElementKind) -> Option<Element<'_>> {
    walk(buf).map_while(|e| e.ok()).find(|e| e.kind == kind)
}

/// Atheros vendor capability element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AthCaps {
    pub capability: u8,
    pub default_key_index: u16,
}

impl AthCaps {
    /// Parse an Atheros element: OUI(3) type(1) subtype(1) version(1) caps(1) defkeyix(2)
    pub fn parse(element: &Element<'_>) -> Option<Self> {
        let payload = element.vendor_payload();
        if payload.len() < 5 {
            return None;
        }
        Some(Self {
            capability: payload[2],
            default_key_index: u16::from_le_bytes([payload[3], payload[4]]),
        })
    }

    pub fn fast_frames(&self) -> bool {
        self.capability & ATH_CAP_FAST_FRAME != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vendor(oui: [u8; 3], oui_type: u8, rest: &[u8]) -> Vec<u8> {
        let mut data = oui.to_vec();
        data.push(oui_type);
        data.extend_from_slice(rest);
        data
    }

    #[test]
    fn test_walk_chain() {
        let buf = [id::SSID, 3, b'a', b'b', b'c', id::RATES, 2, 0x82, 0x84, id::DS_PARMS, 1, 6];
        let elements: Vec<_> = walk(&buf).collect::<Result<_>>().unwrap();

        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].kind, ElementKind::Ssid);
        assert_eq!(elements[0].data, b"abc");
        assert_eq!(elements[1].kind, ElementKind::Rates);
        assert_eq!(elements[1].raw, &[id::RATES, 2, 0x82, 0x84]);
        assert_eq!(elements[2].kind, ElementKind::DsParams);
        assert_eq!(elements[2].data, &[6]);
    }

    #[test]
    fn test_walk_truncated_element() {
        let buf = [id::SSID, 1, b'x', id::RATES, 8, 0x82];
        let mut walker = walk(&buf);

        assert!(walker.next().unwrap().is_ok());
        assert!(matches!(walker.next(), Some(Err(Dot11Error::Truncated { .. }))));
        assert!(walker.next().is_none());
    }

    #[test]
    fn test_walk_trailing_byte_ignored() {
        let buf = [id::SSID, 0, 0xdd];
        let elements: Vec<_> = walk(&buf).collect();
        assert_eq!(elements.len(), 1);
        assert!(elements[0].as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_classify_vendor_elements() {
        assert_eq!(classify(id::VENDOR, &vendor(WPA_OUI, WPA_OUI_TYPE, &[1, 0])), ElementKind::Wpa);
        assert_eq!(
            classify(id::VENDOR, &vendor(WME_OUI, WME_OUI_TYPE, &[WME_INFO_OUI_SUBTYPE, 1, 0])),
            ElementKind::WmeInfo
        );
        assert_eq!(
            classify(id::VENDOR, &vendor(WME_OUI, WME_OUI_TYPE, &[WME_PARAM_OUI_SUBTYPE, 1])),
            ElementKind::WmeParam
        );
        assert_eq!(classify(id::VENDOR, &vendor(WME_OUI, WME_OUI_TYPE, &[])), ElementKind::UnknownVendor);
        assert_eq!(classify(id::VENDOR, &vendor(ATH_OUI, ATH_OUI_TYPE, &[1])), ElementKind::Atheros);
        assert_eq!(classify(id::VENDOR, &vendor(BCM_OUI, BCM_OUI_HTCAP, &[])), ElementKind::VendorHtCap);
        assert_eq!(classify(id::VENDOR, &vendor(BCM_OUI, BCM_OUI_HTINFO, &[])), ElementKind::VendorHtInfo);
        assert_eq!(classify(id::VENDOR, &[0x00, 0x50]), ElementKind::UnknownVendor);
        assert_eq!(classify(200, &[]), ElementKind::Unknown(200));
    }

    #[test]
    fn test_find_and_ath_caps() {
        let mut buf = vec![id::SSID, 0, id::VENDOR, 9];
        buf.extend_from_slice(&vendor(ATH_OUI, ATH_OUI_TYPE, &[1, 0, ATH_CAP_FAST_FRAME, 0x10, 0x00]));

        let element = find(&buf, ElementKind::Atheros).unwrap();
        assert!(element.kind.is_vendor());
        let caps = AthCaps::parse(&element).unwrap();
        assert!(caps.fast_frames());
        assert_eq!(caps.default_key_index, 0x10);
        assert!(find(&buf, ElementKind::Rsn).is_none());
    }
}
