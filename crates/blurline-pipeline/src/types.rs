use num_traits::AsPrimitive;

/// The width and signedness of an integer expression.
///
/// Values are carried in an `i64` during evaluation and wrapped back to the
/// declared width after every operation, so narrowing is a two's complement
/// truncation and never a saturation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "RawScalarType")
)]
pub struct ScalarType {
    bits: u8,
    signed: bool,
}

#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawScalarType {
    bits: u8,
    signed: bool,
}

#[cfg(feature = "serde")]
impl TryFrom<RawScalarType> for ScalarType {
    type Error = String;

    fn try_from(raw: RawScalarType) -> Result<Self, Self::Error> {
        ScalarType::new(raw.bits, raw.signed)
            .ok_or_else(|| format!("unsupported scalar width {}, expected 8, 16 or 32", raw.bits))
    }
}

impl ScalarType {
    /// Unsigned 8-bit integer.
    pub const U8: ScalarType = ScalarType::new_unchecked(8, false);
    /// Unsigned 16-bit integer.
    pub const U16: ScalarType = ScalarType::new_unchecked(16, false);
    /// Unsigned 32-bit integer.
    pub const U32: ScalarType = ScalarType::new_unchecked(32, false);
    /// Signed 8-bit integer.
    pub const I8: ScalarType = ScalarType::new_unchecked(8, true);
    /// Signed 16-bit integer.
    pub const I16: ScalarType = ScalarType::new_unchecked(16, true);
    /// Signed 32-bit integer. Coordinates always have this type.
    pub const I32: ScalarType = ScalarType::new_unchecked(32, true);

    const fn new_unchecked(bits: u8, signed: bool) -> Self {
        Self { bits, signed }
    }

    /// Create a scalar type; only 8, 16 and 32 bits are supported.
    pub fn new(bits: u8, signed: bool) -> Option<Self> {
        matches!(bits, 8 | 16 | 32).then_some(Self { bits, signed })
    }

    /// Number of bits.
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Whether the type is signed.
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Smallest representable value.
    pub fn min_value(&self) -> i64 {
        if self.signed {
            -(1i64 << (self.bits - 1))
        } else {
            0
        }
    }

    /// Largest representable value.
    pub fn max_value(&self) -> i64 {
        if self.signed {
            (1i64 << (self.bits - 1)) - 1
        } else {
            (1i64 << self.bits) - 1
        }
    }

    /// Whether `value` is representable without wrapping.
    pub fn contains(&self, value: i64) -> bool {
        (self.min_value()..=self.max_value()).contains(&value)
    }

    /// Wrap a wide value to this type, keeping the low `bits` bits.
    ///
    /// ```
    /// use blurline_pipeline::ScalarType;
    ///
    /// assert_eq!(ScalarType::U8.wrap(300), 44);
    /// assert_eq!(ScalarType::I8.wrap(200), -56);
    /// ```
    #[inline]
    pub fn wrap(&self, value: i64) -> i64 {
        let modulus = 1i64 << self.bits;
        let low = value & (modulus - 1);
        if self.signed && low > self.max_value() {
            low - modulus
        } else {
            low
        }
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let prefix = if self.signed { "int" } else { "uint" };
        write!(f, "{prefix}{}", self.bits)
    }
}

/// Sample types that can be bound as pipeline inputs or realized as outputs.
pub trait Pixel: Copy + Send + Sync + 'static {
    /// The scalar type the sample corresponds to.
    const TYPE: ScalarType;

    /// Widen the sample to an evaluation value.
    fn to_value(self) -> i64;

    /// Narrow an evaluation value, already wrapped to [`Pixel::TYPE`], to a sample.
    fn from_value(value: i64) -> Self;
}

macro_rules! impl_pixel {
    ($($ty:ty => $scalar:expr),* $(,)?) => {
        $(
            impl Pixel for $ty {
                const TYPE: ScalarType = $scalar;

                #[inline]
                fn to_value(self) -> i64 {
                    self.as_()
                }

                #[inline]
                fn from_value(value: i64) -> Self {
                    value.as_()
                }
            }
        )*
    };
}

impl_pixel! {
    u8 => ScalarType::U8,
    u16 => ScalarType::U16,
    u32 => ScalarType::U32,
    i8 => ScalarType::I8,
    i16 => ScalarType::I16,
    i32 => ScalarType::I32,
}

#[cfg(test)]
mod tests {
    use super::{Pixel, ScalarType};

    #[test]
    fn wrap_is_modular() {
        assert_eq!(ScalarType::U8.wrap(300), 44);
        assert_eq!(ScalarType::U8.wrap(255), 255);
        assert_eq!(ScalarType::U8.wrap(256), 0);
        assert_eq!(ScalarType::U8.wrap(-1), 255);
        assert_eq!(ScalarType::U16.wrap(70_000), 70_000 - 65_536);
        assert_eq!(ScalarType::I32.wrap(i32::MAX as i64 + 1), i32::MIN as i64);
        assert_eq!(ScalarType::I16.wrap(-40_000), 25_536);
    }

    #[test]
    fn ranges() {
        assert_eq!(ScalarType::U8.max_value(), 255);
        assert_eq!(ScalarType::I8.min_value(), -128);
        assert_eq!(ScalarType::U32.max_value(), u32::MAX as i64);
        assert!(ScalarType::U16.contains(765));
        assert!(!ScalarType::U8.contains(765));
        assert_eq!(ScalarType::new(12, false), None);
        assert_eq!(ScalarType::new(16, false), Some(ScalarType::U16));
    }

    #[test]
    fn display() {
        assert_eq!(ScalarType::U8.to_string(), "uint8");
        assert_eq!(ScalarType::I32.to_string(), "int32");
    }

    #[test]
    fn pixel_roundtrip_of_wrapped_values() {
        assert_eq!(u8::from_value(ScalarType::U8.wrap(300)), 44);
        assert_eq!(i8::from_value(-56), -56);
        assert_eq!(200u8.to_value(), 200);
        assert_eq!(<u16 as Pixel>::TYPE, ScalarType::U16);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserialize_rejects_unsupported_widths() -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(&ScalarType::I16)?;
        assert_eq!(serde_json::from_str::<ScalarType>(&json)?, ScalarType::I16);

        for json in [r#"{"bits":64,"signed":false}"#, r#"{"bits":0,"signed":true}"#] {
            assert!(serde_json::from_str::<ScalarType>(json).is_err());
        }
        Ok(())
    }
}
