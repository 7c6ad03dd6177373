/// A typed NM field value.
///
/// The tag numbers are part of the wire format and must not change.
#[derive(Clone, Debug, PartialEq)]
pub enum NmValue {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Bool(bool),
    Char(u8),
    SChar(i8),
    UChar(u8),
    Float(f32),
    Double(f64),
    Str(String),
    Blob(Vec<u8>),
}

impl NmValue {
    pub fn tag(&self) -> u8 {
        match self {
            Self::Int8(_) => 1,
            Self::UInt8(_) => 2,
            Self::Int16(_) => 3,
            Self::UInt16(_) => 4,
            Self::Int32(_) => 5,
            Self::UInt32(_) => 6,
            Self::Int64(_) => 7,
            Self::UInt64(_) => 8,
            Self::Bool(_) => 9,
            Self::Char(_) => 10,
            Self::SChar(_) => 11,
            Self::UChar(_) => 12,
            Self::Float(_) => 13,
            Self::Double(_) => 14,
            Self::Str(_) => 15,
            Self::Blob(_) => 16,
        }
    }

    /// Width of the fixed-size encoding for `tag`, when it has one.
    /// Strings and blobs are length-prefixed instead.
    pub(crate) fn fixed_size(tag: u8) -> Option<usize> {
        match tag {
            1 | 2 | 9 | 10 | 11 | 12 => Some(1),
            3 | 4 => Some(2),
            5 | 6 | 13 => Some(4),
            7 | 8 | 14 => Some(8),
            _ => None,
        }
    }

    pub(crate) fn valid_tag(tag: u8) -> bool {
        (1..=16).contains(&tag)
    }
}

macro_rules! nm_as {
    ($fn_name:ident, $variant:ident, $ty:ty) => {
        impl NmValue {
            pub fn $fn_name(&self) -> Option<$ty> {
                match self {
                    Self::$variant(v) => Some(*v),
                    _ => None,
                }
            }
        }
    };
}

nm_as!(as_i8, Int8, i8);
nm_as!(as_u8, UInt8, u8);
nm_as!(as_i16, Int16, i16);
nm_as!(as_u16, UInt16, u16);
nm_as!(as_i32, Int32, i32);
nm_as!(as_u32, UInt32, u32);
nm_as!(as_i64, Int64, i64);
nm_as!(as_u64, UInt64, u64);
nm_as!(as_bool, Bool, bool);
nm_as!(as_char, Char, u8);
nm_as!(as_schar, SChar, i8);
nm_as!(as_uchar, UChar, u8);
nm_as!(as_f32, Float, f32);
nm_as!(as_f64, Double, f64);

impl NmValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_cover_one_through_sixteen() {
        let values = [
            NmValue::Int8(0),
            NmValue::UInt8(0),
            NmValue::Int16(0),
            NmValue::UInt16(0),
            NmValue::Int32(0),
            NmValue::UInt32(0),
            NmValue::Int64(0),
            NmValue::UInt64(0),
            NmValue::Bool(false),
            NmValue::Char(0),
            NmValue::SChar(0),
            NmValue::UChar(0),
            NmValue::Float(0.0),
            NmValue::Double(0.0),
            NmValue::Str(String::new()),
            NmValue::Blob(Vec::new()),
        ];
        let tags: Vec<u8> = values.iter().map(NmValue::tag).collect();
        assert_eq!(tags, (1..=16).collect::<Vec<u8>>());
    }

    #[test]
    fn converters_are_type_strict() {
        let v = NmValue::Int32(-31);
        assert_eq!(v.as_i32(), Some(-31));
        assert_eq!(v.as_u32(), None);
        assert_eq!(v.as_str(), None);
    }
}
