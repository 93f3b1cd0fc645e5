use nom::number::Endianness;

/// Byte order of a TIFF stream, taken from its `II`/`MM` signature.
#[cfg_attr(feature = "json_dump", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Unknown,
    Little,
    Big,
}

pub(crate) const TIFF_LE: [u8; 4] = [0x49, 0x49, 0x2a, 0x00];
pub(crate) const TIFF_BE: [u8; 4] = [0x4d, 0x4d, 0x00, 0x2a];

/// Detects the byte order from a TIFF signature at the start of `buf`.
///
/// Returns [`ByteOrder::Unknown`] for short or unrecognized input.
pub fn binary_order(buf: &[u8]) -> ByteOrder {
    match buf.get(..4) {
        Some(sig) if sig == TIFF_LE => ByteOrder::Little,
        Some(sig) if sig == TIFF_BE => ByteOrder::Big,
        _ => ByteOrder::Unknown,
    }
}

// Integer getters return 0 for an Unknown order or a buffer that is too
// short, mirroring a zero-value field.
impl ByteOrder {
    pub fn u16(self, buf: &[u8]) -> u16 {
        let Some(b) = buf.get(..2).and_then(|b| <[u8; 2]>::try_from(b).ok()) else {
            return 0;
        };
        match self {
            ByteOrder::Little => u16::from_le_bytes(b),
            ByteOrder::Big => u16::from_be_bytes(b),
            ByteOrder::Unknown => 0,
        }
    }

    pub fn u32(self, buf: &[u8]) -> u32 {
        let Some(b) = buf.get(..4).and_then(|b| <[u8; 4]>::try_from(b).ok()) else {
            return 0;
        };
        match self {
            ByteOrder::Little => u32::from_le_bytes(b),
            ByteOrder::Big => u32::from_be_bytes(b),
            ByteOrder::Unknown => 0,
        }
    }

    pub fn u64(self, buf: &[u8]) -> u64 {
        let Some(b) = buf.get(..8).and_then(|b| <[u8; 8]>::try_from(b).ok()) else {
            return 0;
        };
        match self {
            ByteOrder::Little => u64::from_le_bytes(b),
            ByteOrder::Big => u64::from_be_bytes(b),
            ByteOrder::Unknown => 0,
        }
    }

    pub fn i16(self, buf: &[u8]) -> i16 {
        self.u16(buf) as i16
    }

    pub fn i32(self, buf: &[u8]) -> i32 {
        self.u32(buf) as i32
    }

    /// Encodes `v` the way it sits in an IFD entry's value field, so that an
    /// embedded value can be decoded with the same getters as a deferred one.
    pub fn put_u32(self, v: u32) -> [u8; 4] {
        match self {
            ByteOrder::Big => v.to_be_bytes(),
            _ => v.to_le_bytes(),
        }
    }

    pub(crate) fn nom_endian(self) -> Endianness {
        match self {
            ByteOrder::Big => Endianness::Big,
            _ => Endianness::Little,
        }
    }
}

impl std::fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ByteOrder::Unknown => "unknown",
            ByteOrder::Little => "little",
            ByteOrder::Big => "big",
        };
        s.fmt(f)
    }
}
