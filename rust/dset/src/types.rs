//! Element kinds, type-code schemes and array shapes
//!
//! The engine supports a closed set of fixed-width numeric kinds plus one
//! variable-length string kind. Integer codes for these kinds are owned by
//! the binding layer, so they are expressed through a [`TagScheme`] rather
//! than baked into [`TypeTag`].

use std::fmt;
use std::str::FromStr;

use crate::error::{DatasetError, Result};

/// Element kind of a column
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Complex64,
    Complex128,
    String,
}

impl TypeTag {
    /// Every supported kind, in native code order.
    pub const ALL: [TypeTag; 13] = [
        TypeTag::Int8,
        TypeTag::Int16,
        TypeTag::Int32,
        TypeTag::Int64,
        TypeTag::UInt8,
        TypeTag::UInt16,
        TypeTag::UInt32,
        TypeTag::UInt64,
        TypeTag::Float32,
        TypeTag::Float64,
        TypeTag::Complex64,
        TypeTag::Complex128,
        TypeTag::String,
    ];

    /// Byte width of one element, or `None` for the string kind.
    pub const fn width(self) -> Option<usize> {
        match self {
            TypeTag::Int8 | TypeTag::UInt8 => Some(1),
            TypeTag::Int16 | TypeTag::UInt16 => Some(2),
            TypeTag::Int32 | TypeTag::UInt32 | TypeTag::Float32 => Some(4),
            TypeTag::Int64 | TypeTag::UInt64 | TypeTag::Float64 | TypeTag::Complex64 => Some(8),
            TypeTag::Complex128 => Some(16),
            TypeTag::String => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            TypeTag::Int8 => "int8",
            TypeTag::Int16 => "int16",
            TypeTag::Int32 => "int32",
            TypeTag::Int64 => "int64",
            TypeTag::UInt8 => "uint8",
            TypeTag::UInt16 => "uint16",
            TypeTag::UInt32 => "uint32",
            TypeTag::UInt64 => "uint64",
            TypeTag::Float32 => "float32",
            TypeTag::Float64 => "float64",
            TypeTag::Complex64 => "complex64",
            TypeTag::Complex128 => "complex128",
            TypeTag::String => "string",
        }
    }

    pub const fn is_string(self) -> bool {
        matches!(self, TypeTag::String)
    }

    pub const fn is_complex(self) -> bool {
        matches!(self, TypeTag::Complex64 | TypeTag::Complex128)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mapping between [`TypeTag`]s and the integer codes a binding passes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagScheme {
    /// Engine-native codes: 1..=13 in [`TypeTag::ALL`] order.
    #[default]
    Native,
    /// NumPy type numbers on LP64 platforms; strings use the object code.
    Numpy,
}

impl TagScheme {
    pub const fn encode(self, tag: TypeTag) -> u8 {
        match self {
            TagScheme::Native => match tag {
                TypeTag::Int8 => 1,
                TypeTag::Int16 => 2,
                TypeTag::Int32 => 3,
                TypeTag::Int64 => 4,
                TypeTag::UInt8 => 5,
                TypeTag::UInt16 => 6,
                TypeTag::UInt32 => 7,
                TypeTag::UInt64 => 8,
                TypeTag::Float32 => 9,
                TypeTag::Float64 => 10,
                TypeTag::Complex64 => 11,
                TypeTag::Complex128 => 12,
                TypeTag::String => 13,
            },
            TagScheme::Numpy => match tag {
                TypeTag::Int8 => 1,
                TypeTag::UInt8 => 2,
                TypeTag::Int16 => 3,
                TypeTag::UInt16 => 4,
                TypeTag::Int32 => 5,
                TypeTag::UInt32 => 6,
                TypeTag::Int64 => 7,
                TypeTag::UInt64 => 8,
                TypeTag::Float32 => 11,
                TypeTag::Float64 => 12,
                TypeTag::Complex64 => 14,
                TypeTag::Complex128 => 15,
                TypeTag::String => 17,
            },
        }
    }

    pub fn decode(self, code: i32) -> Result<TypeTag> {
        TypeTag::ALL
            .iter()
            .copied()
            .find(|tag| i32::from(self.encode(*tag)) == code)
            .ok_or_else(|| {
                DatasetError::InvalidType(format!("type code {code} is not defined in the {self:?} scheme"))
            })
    }
}

impl FromStr for TagScheme {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "numpy" | "npy" => Self::Numpy,
            _ => Self::Native,
        })
    }
}

/// Single-precision complex element (two `f32`, real part first).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Complex64 {
    pub re: f32,
    pub im: f32,
}

/// Double-precision complex element (two `f64`, real part first).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Complex128 {
    pub re: f64,
    pub im: f64,
}

/// Plain element types that can be viewed in place inside numeric columns.
///
/// # Safety
///
/// Implementors must have no padding, accept every bit pattern (all-zero
/// included) and have `size_of::<Self>()` equal to `TAG.width()`, with an
/// alignment no greater than 16.
pub unsafe trait Element: Copy + Default + fmt::Debug + Send + Sync + 'static {
    const TAG: TypeTag;
}

macro_rules! impl_element {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            unsafe impl Element for $ty {
                const TAG: TypeTag = TypeTag::$tag;
            }
        )*
    };
}

impl_element! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    Complex64 => Complex64,
    Complex128 => Complex128,
}

/// Per-row cell shape of a column: empty for scalars.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Shape(Vec<u32>);

impl Shape {
    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    pub fn new(dims: impl Into<Vec<u32>>) -> Self {
        Self(dims.into())
    }

    pub fn dims(&self) -> &[u32] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of elements in one cell; `None` on overflow.
    pub fn element_count(&self) -> Option<usize> {
        self.0
            .iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(*dim as usize))
    }
}

impl From<&[u8]> for Shape {
    fn from(dims: &[u8]) -> Self {
        Self(dims.iter().map(|d| u32::from(*d)).collect())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        if self.0.len() == 1 {
            f.write_str(",")?;
        }
        f.write_str(")")
    }
}
