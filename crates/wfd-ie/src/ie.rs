use tracing::warn;

use crate::IeError;

/// Vendor-specific element id carrying WFD data.
pub const WFD_IE_ID: u8 = 0xdd;
/// WFA OUI plus the WFD 1.0 type byte, big-endian on the wire.
pub const WFD_IE_OUI_1_0: u32 = 0x506f_9a0a;
/// Maximum IE payload past the OUI. An IE length byte covers OUI + data,
/// so the hard cap of 255 leaves 251 for sub-element bytes.
pub const WFD_IE_DATA_MAX: usize = 251;

const IE_HEADER: usize = 6;
const SUB_HEADER: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubelementId {
    DeviceInfo = 0,
    AssociatedBssid = 1,
    AudioFormats = 2,
    VideoFormats = 3,
    Formats3d = 4,
    ContentProtection = 5,
    CoupledSink = 6,
    ExtendedCapability = 7,
    LocalIp = 8,
    SessionInfo = 9,
    AlternativeMac = 10,
}

impl SubelementId {
    pub fn from_raw(id: u8) -> Option<Self> {
        Some(match id {
            0 => Self::DeviceInfo,
            1 => Self::AssociatedBssid,
            2 => Self::AudioFormats,
            3 => Self::VideoFormats,
            4 => Self::Formats3d,
            5 => Self::ContentProtection,
            6 => Self::CoupledSink,
            7 => Self::ExtendedCapability,
            8 => Self::LocalIp,
            9 => Self::SessionInfo,
            10 => Self::AlternativeMac,
            _ => None?,
        })
    }
}

/// One reassembled TLV from the IE payload stream.
///
/// `id` is kept raw so unsupported sub-elements survive a decode/encode
/// round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subelement {
    pub id: u8,
    pub data: Vec<u8>,
}

impl Subelement {
    pub fn new(id: SubelementId, data: Vec<u8>) -> Self {
        Self { id: id as u8, data }
    }
}

/// Serialise `subs` as a sequence of WFD IEs.
///
/// The sub-element stream is chunked at 251 payload bytes per IE; a
/// sub-element that does not fit continues in the next IE (same element id,
/// same OUI, no repeated sub-element header).
pub fn encode(subs: &[Subelement]) -> Vec<u8> {
    let mut payload = Vec::new();
    for sub in subs {
        payload.push(sub.id);
        payload.extend_from_slice(&(sub.data.len() as u16).to_be_bytes());
        payload.extend_from_slice(&sub.data);
    }

    let mut out = Vec::with_capacity(payload.len() + IE_HEADER);
    let mut chunks = payload.chunks(WFD_IE_DATA_MAX);
    // an empty sub-element list still yields one empty IE
    let first = chunks.next().unwrap_or(&[]);
    push_ie(&mut out, first);
    for chunk in chunks {
        push_ie(&mut out, chunk);
    }
    out
}

fn push_ie(out: &mut Vec<u8>, data: &[u8]) {
    out.push(WFD_IE_ID);
    out.push((data.len() + 4) as u8);
    out.extend_from_slice(&WFD_IE_OUI_1_0.to_be_bytes());
    out.extend_from_slice(data);
}

/// Parse a buffer of consecutive WFD IEs back into sub-elements.
///
/// A sub-element whose declared length exceeds the bytes left in its IE is
/// treated as continued: the next IE (which must repeat element id and OUI)
/// supplies the remaining bytes without a new sub-element header. Input
/// ending inside such a continuation is an error. Sub-element ids outside
/// the assigned range are reported but iteration continues.
pub fn decode(mut input: &[u8]) -> Result<Vec<Subelement>, IeError> {
    // validate every IE header and reassemble the sub-element stream;
    // continuation across IEs carries no new header, so reassembly is
    // concatenation of the IE payloads
    let mut payload = Vec::with_capacity(input.len());
    while !input.is_empty() {
        if input.len() < IE_HEADER {
            return Err(IeError::ShortBuffer);
        }
        if input[0] != WFD_IE_ID {
            return Err(IeError::UnknownElementId(input[0]));
        }
        let length = input[1] as usize;
        if length < 4 || length - 4 > WFD_IE_DATA_MAX {
            return Err(IeError::LengthOverflow(length));
        }
        let oui = u32::from_be_bytes([input[2], input[3], input[4], input[5]]);
        if oui != WFD_IE_OUI_1_0 {
            return Err(IeError::UnknownOui(oui));
        }
        if input.len() < 2 + length {
            return Err(IeError::LengthOverflow(length));
        }

        payload.extend_from_slice(&input[IE_HEADER..2 + length]);
        input = &input[2 + length..];
    }

    let mut subs = Vec::new();
    let mut data = payload.as_slice();
    while !data.is_empty() {
        if data.len() < SUB_HEADER {
            return Err(IeError::ShortBuffer);
        }
        let id = data[0];
        let declared = u16::from_be_bytes([data[1], data[2]]) as usize;
        data = &data[SUB_HEADER..];

        if data.len() < declared {
            // a continued sub-element whose trailing IEs never came
            return Err(IeError::TrailingContinuation);
        }
        finish_sub(&mut subs, Subelement { id, data: data[..declared].to_vec() });
        data = &data[declared..];
    }
    Ok(subs)
}

fn finish_sub(subs: &mut Vec<Subelement>, sub: Subelement) {
    if SubelementId::from_raw(sub.id).is_none() {
        warn!(id = sub.id, len = sub.data.len(), "ie: unsupported sub-element");
    }
    subs.push(sub);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{DeviceInfo, DeviceInfoFlags, DeviceRole};

    #[test]
    fn device_info_wire_format() {
        let info = DeviceInfo {
            role: DeviceRole::PrimarySink,
            flags: DeviceInfoFlags::AVAILABLE,
            ctrl_port: crate::DEFAULT_CTRL_PORT,
            max_throughput: 200,
        };
        let bytes = encode(&[info.to_subelement()]);
        assert_eq!(
            bytes,
            [0xdd, 0x0d, 0x50, 0x6f, 0x9a, 0x0a, 0x00, 0x00, 0x06, 0x00, 0x11, 0x1c, 0x44, 0x00,
             0xc8]
        );

        let subs = decode(&bytes).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(DeviceInfo::from_subelement(&subs[0]).unwrap(), info);
    }

    #[test]
    fn round_trip_multiple_subelements() {
        let subs = vec![
            Subelement::new(SubelementId::DeviceInfo, vec![0, 0x11, 0x1c, 0x44, 0, 200]),
            Subelement::new(SubelementId::AssociatedBssid, vec![1, 2, 3, 4, 5, 6]),
            Subelement::new(SubelementId::SessionInfo, vec![9; 40]),
        ];
        assert_eq!(decode(&encode(&subs)).unwrap(), subs);
    }

    #[test]
    fn round_trip_across_ie_split() {
        // 600 payload bytes force a span across three IEs
        let subs = vec![
            Subelement::new(SubelementId::DeviceInfo, vec![0, 0x11, 0x1c, 0x44, 0, 200]),
            Subelement::new(SubelementId::SessionInfo, (0..600u32).map(|i| i as u8).collect()),
            Subelement::new(SubelementId::AlternativeMac, vec![6, 5, 4, 3, 2, 1]),
        ];
        let bytes = encode(&subs);
        // every IE header repeats element id and OUI
        assert_eq!(bytes[0], WFD_IE_ID);
        let second_ie = 2 + bytes[1] as usize;
        assert_eq!(bytes[second_ie], WFD_IE_ID);
        assert_eq!(
            u32::from_be_bytes(bytes[second_ie + 2..second_ie + 6].try_into().unwrap()),
            WFD_IE_OUI_1_0
        );
        assert_eq!(decode(&bytes).unwrap(), subs);
    }

    #[test]
    fn split_exactly_at_ie_boundary() {
        // first sub-element fills IE 0 to the byte
        let subs = vec![
            Subelement::new(SubelementId::SessionInfo, vec![7; WFD_IE_DATA_MAX - SUB_HEADER]),
            Subelement::new(SubelementId::AssociatedBssid, vec![1, 2, 3, 4, 5, 6]),
        ];
        assert_eq!(decode(&encode(&subs)).unwrap(), subs);
    }

    #[test]
    fn subelement_header_split_across_ies() {
        // 250 bytes of first sub-element leave one byte of IE 0 for the
        // next header; the remaining two header bytes open IE 1
        let subs = vec![
            Subelement::new(SubelementId::SessionInfo, vec![1; 247]),
            Subelement::new(SubelementId::AssociatedBssid, vec![1, 2, 3, 4, 5, 6]),
        ];
        let bytes = encode(&subs);
        assert!(bytes.len() > 2 + 255);
        assert_eq!(decode(&bytes).unwrap(), subs);
    }

    #[test]
    fn unsupported_subelement_is_not_fatal() {
        let subs = vec![Subelement { id: 200, data: vec![1, 2, 3] }];
        assert_eq!(decode(&encode(&subs)).unwrap(), subs);
    }

    #[test]
    fn rejects_foreign_element() {
        let mut bytes = encode(&[Subelement::new(SubelementId::DeviceInfo, vec![0; 6])]);
        bytes[0] = 0x30;
        assert_eq!(decode(&bytes), Err(IeError::UnknownElementId(0x30)));
    }

    #[test]
    fn rejects_foreign_oui() {
        let mut bytes = encode(&[Subelement::new(SubelementId::DeviceInfo, vec![0; 6])]);
        bytes[2] = 0x00;
        assert!(matches!(decode(&bytes), Err(IeError::UnknownOui(_))));
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = encode(&[Subelement::new(SubelementId::DeviceInfo, vec![0; 6])]);
        assert!(decode(&bytes[..bytes.len() - 2]).is_err());
        assert_eq!(decode(&bytes[..3]), Err(IeError::ShortBuffer));
    }

    #[test]
    fn rejects_dangling_continuation() {
        let subs = vec![Subelement::new(SubelementId::SessionInfo, vec![3; 400])];
        let bytes = encode(&subs);
        let first_ie = 2 + bytes[1] as usize;
        assert_eq!(decode(&bytes[..first_ie]), Err(IeError::TrailingContinuation));
    }

    #[test]
    fn empty_input_and_empty_list() {
        assert_eq!(decode(&[]).unwrap(), vec![]);
        let bytes = encode(&[]);
        assert_eq!(bytes, [0xdd, 0x04, 0x50, 0x6f, 0x9a, 0x0a]);
        assert_eq!(decode(&bytes).unwrap(), vec![]);
    }
}
