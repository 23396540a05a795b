//! Numeric element types storable in a volume.
//!
//! A volume is generic over its element type; the file layer needs a
//! runtime tag for headers and a fixed little-endian byte codec for
//! moving elements between block buffers and disk.

use std::fmt;

/// Runtime tag identifying a volume's element type in file headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElementType {
    /// Unsigned 8-bit integer.
    U8 = 0,
    /// Signed 8-bit integer.
    I8 = 1,
    /// Unsigned 16-bit integer.
    U16 = 2,
    /// Signed 16-bit integer.
    I16 = 3,
    /// Unsigned 32-bit integer.
    U32 = 4,
    /// Signed 32-bit integer.
    I32 = 5,
    /// 32-bit float.
    F32 = 6,
    /// 64-bit float.
    F64 = 7,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            ElementType::U8 | ElementType::I8 => 1,
            ElementType::U16 | ElementType::I16 => 2,
            ElementType::U32 | ElementType::I32 | ElementType::F32 => 4,
            ElementType::F64 => 8,
        }
    }

    /// Convert from the header type code.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ElementType::U8),
            1 => Some(ElementType::I8),
            2 => Some(ElementType::U16),
            3 => Some(ElementType::I16),
            4 => Some(ElementType::U32),
            5 => Some(ElementType::I32),
            6 => Some(ElementType::F32),
            7 => Some(ElementType::F64),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::U8 => "u8",
            ElementType::I8 => "i8",
            ElementType::U16 => "u16",
            ElementType::I16 => "i16",
            ElementType::U32 => "u32",
            ElementType::I32 => "i32",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
        };
        write!(f, "{}", name)
    }
}

/// A numeric type that can live in a cached volume.
///
/// Implementations provide the little-endian codec used by the file
/// layer; block buffers hold elements directly.
pub trait Element: Copy + Default + PartialEq + fmt::Debug + 'static {
    /// The runtime tag written into file headers.
    const KIND: ElementType;

    /// Encode into exactly `Self::KIND.size()` bytes.
    fn write_le(self, buf: &mut [u8]);

    /// Decode from exactly `Self::KIND.size()` bytes.
    fn read_le(buf: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($ty:ty, $kind:expr) => {
        impl Element for $ty {
            const KIND: ElementType = $kind;

            fn write_le(self, buf: &mut [u8]) {
                buf.copy_from_slice(&self.to_le_bytes());
            }

            fn read_le(buf: &[u8]) -> Self {
                <$ty>::from_le_bytes(buf.try_into().expect("element byte width"))
            }
        }
    };
}

impl_element!(u8, ElementType::U8);
impl_element!(i8, ElementType::I8);
impl_element!(u16, ElementType::U16);
impl_element!(i16, ElementType::I16);
impl_element!(u32, ElementType::U32);
impl_element!(i32, ElementType::I32);
impl_element!(f32, ElementType::F32);
impl_element!(f64, ElementType::F64);
