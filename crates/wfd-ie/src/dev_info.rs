use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{IeError, Subelement, SubelementId};

/// RTSP control port a WFD session defaults to.
pub const DEFAULT_CTRL_PORT: u16 = 7236;

const ROLE_MASK: u16 = 0x0003;

/// WFD session role, the low two bits of the device-info word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u16)]
pub enum DeviceRole {
    #[default]
    Source = 0x0000,
    PrimarySink = 0x0001,
    SecondarySink = 0x0002,
    Dual = 0x0003,
}

impl DeviceRole {
    fn from_raw(v: u16) -> Self {
        match v & ROLE_MASK {
            0x0001 => Self::PrimarySink,
            0x0002 => Self::SecondarySink,
            0x0003 => Self::Dual,
            _ => Self::Source,
        }
    }
}

bitflags! {
    /// Capability bits of the device-info word, role excluded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct DeviceInfoFlags: u16 {
        /// Supports a coupled sink while operating as source.
        const SOURCE_COUPLED_SINK = 0x0004;
        /// Supports a coupled sink while operating as sink.
        const SINK_COUPLED_SINK = 0x0008;
        /// Available for WFD session establishment.
        const AVAILABLE = 0x0010;
        /// WFD service discovery.
        const WSD = 0x0040;
        /// Prefers TDLS over P2P connectivity.
        const PREFER_TDLS = 0x0080;
        /// Content protection via HDCP 2.x.
        const CONTENT_PROTECTION = 0x0100;
        /// Separate time-synchronisation support.
        const TIME_SYNC = 0x0200;
        /// Sink cannot render audio.
        const NO_AUDIO = 0x0400;
        /// Source can stream audio-only content.
        const AUDIO_ONLY = 0x0800;
        /// Persistent TDLS group support.
        const PERSISTENT_TDLS = 0x1000;
        /// Persistent TDLS group re-invoke support.
        const TDLS_REINVOKE = 0x2000;
    }
}

/// Decoded device-information sub-element.
///
/// Wire layout is three big-endian `u16`s: the packed device-info word, the
/// RTSP control port, and the maximum throughput in Mbps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub role: DeviceRole,
    pub flags: DeviceInfoFlags,
    pub ctrl_port: u16,
    pub max_throughput: u16,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            role: DeviceRole::Source,
            flags: DeviceInfoFlags::empty(),
            ctrl_port: DEFAULT_CTRL_PORT,
            max_throughput: 0,
        }
    }
}

impl DeviceInfo {
    pub fn to_subelement(&self) -> Subelement {
        let word = self.role as u16 | self.flags.bits();
        let mut data = Vec::with_capacity(6);
        data.extend_from_slice(&word.to_be_bytes());
        data.extend_from_slice(&self.ctrl_port.to_be_bytes());
        data.extend_from_slice(&self.max_throughput.to_be_bytes());
        Subelement::new(SubelementId::DeviceInfo, data)
    }

    pub fn from_subelement(sub: &Subelement) -> Result<Self, IeError> {
        if sub.id != SubelementId::DeviceInfo as u8 || sub.data.len() != 6 {
            return Err(IeError::SubelementSize(sub.data.len(), SubelementId::DeviceInfo));
        }
        let word = u16::from_be_bytes([sub.data[0], sub.data[1]]);
        Ok(Self {
            role: DeviceRole::from_raw(word),
            flags: DeviceInfoFlags::from_bits_truncate(word),
            ctrl_port: u16::from_be_bytes([sub.data[2], sub.data[3]]),
            max_throughput: u16::from_be_bytes([sub.data[4], sub.data[5]]),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn word_packing() {
        let info = DeviceInfo {
            role: DeviceRole::Dual,
            flags: DeviceInfoFlags::AVAILABLE |
                DeviceInfoFlags::CONTENT_PROTECTION |
                DeviceInfoFlags::TDLS_REINVOKE,
            ctrl_port: DEFAULT_CTRL_PORT,
            max_throughput: 300,
        };
        let sub = info.to_subelement();
        assert_eq!(&sub.data[..2], &0x2113u16.to_be_bytes());
        assert_eq!(DeviceInfo::from_subelement(&sub).unwrap(), info);
    }

    #[test]
    fn role_is_masked_out_of_flags() {
        let sub = Subelement::new(
            SubelementId::DeviceInfo,
            vec![0x00, 0x03, 0x1c, 0x44, 0x00, 0x00],
        );
        let info = DeviceInfo::from_subelement(&sub).unwrap();
        assert_eq!(info.role, DeviceRole::Dual);
        assert!(info.flags.is_empty());
    }

    #[test]
    fn rejects_wrong_size() {
        let sub = Subelement::new(SubelementId::DeviceInfo, vec![0; 5]);
        assert!(DeviceInfo::from_subelement(&sub).is_err());
    }
}
