//! ## [Data Types](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/1d61ee78-4466-4141-8276-f45153484619)

use std::fmt::Debug;

use super::*;

/// [Property Data Types](https://learn.microsoft.com/en-us/openspecs/exchange_server_protocols/MS-OXCDATA/0c77892e-288e-435a-9c49-be1c20c7afdb)
#[repr(u16)]
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub enum PropertyType {
    /// `PtypNull`
    #[default]
    Null = 0x0001,
    /// `PtypInteger16`
    Integer16 = 0x0002,
    /// `PtypInteger32`
    Integer32 = 0x0003,
    /// `PtypFloating32`
    Floating32 = 0x0004,
    /// `PtypFloating64`
    Floating64 = 0x0005,
    /// `PtypCurrency`: scaled by 10,000
    Currency = 0x0006,
    /// `PtypFloatingTime`: days since December 30, 1899
    FloatingTime = 0x0007,
    /// `PtypErrorCode`
    ErrorCode = 0x000A,
    /// `PtypBoolean`
    Boolean = 0x000B,
    /// `PtypObject`: the value is a subnode holding the object's storage
    Object = 0x000D,
    /// `PtypInteger64`
    Integer64 = 0x0014,
    /// `PtypString8`: multibyte characters in the message code page
    String8 = 0x001E,
    /// `PtypString`: UTF-16LE
    Unicode = 0x001F,
    /// `PtypTime`: 100-nanosecond intervals since January 1, 1601
    Time = 0x0040,
    /// `PtypGuid`
    Guid = 0x0048,
    /// `PtypBinary`
    Binary = 0x0102,

    MultipleInteger16 = 0x1002,
    MultipleInteger32 = 0x1003,
    MultipleFloating32 = 0x1004,
    MultipleFloating64 = 0x1005,
    MultipleCurrency = 0x1006,
    MultipleFloatingTime = 0x1007,
    MultipleInteger64 = 0x1014,
    MultipleString8 = 0x101E,
    MultipleUnicode = 0x101F,
    MultipleTime = 0x1040,
    MultipleGuid = 0x1048,
    MultipleBinary = 0x1102,
}

impl PropertyType {
    /// Width of a fixed-size value, or `None` for variable-size types.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Boolean => Some(1),
            Self::Integer16 => Some(2),
            Self::Integer32 | Self::Floating32 | Self::ErrorCode => Some(4),
            Self::Floating64
            | Self::Currency
            | Self::FloatingTime
            | Self::Integer64
            | Self::Time => Some(8),
            Self::Guid => Some(16),
            _ => None,
        }
    }

    /// Values of these types fit in `dwValueHnid` and are stored in place.
    pub fn is_inline(self) -> bool {
        self.fixed_size().is_some_and(|size| size <= 4)
    }

    pub fn is_multi_valued(self) -> bool {
        u16::from(self) & 0x1000 != 0
    }
}

impl TryFrom<u16> for PropertyType {
    type Error = LtpError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::Null),
            0x0002 => Ok(Self::Integer16),
            0x0003 => Ok(Self::Integer32),
            0x0004 => Ok(Self::Floating32),
            0x0005 => Ok(Self::Floating64),
            0x0006 => Ok(Self::Currency),
            0x0007 => Ok(Self::FloatingTime),
            0x000A => Ok(Self::ErrorCode),
            0x000B => Ok(Self::Boolean),
            0x000D => Ok(Self::Object),
            0x0014 => Ok(Self::Integer64),
            0x001E => Ok(Self::String8),
            0x001F => Ok(Self::Unicode),
            0x0040 => Ok(Self::Time),
            0x0048 => Ok(Self::Guid),
            0x0102 => Ok(Self::Binary),

            0x1002 => Ok(Self::MultipleInteger16),
            0x1003 => Ok(Self::MultipleInteger32),
            0x1004 => Ok(Self::MultipleFloating32),
            0x1005 => Ok(Self::MultipleFloating64),
            0x1006 => Ok(Self::MultipleCurrency),
            0x1007 => Ok(Self::MultipleFloatingTime),
            0x1014 => Ok(Self::MultipleInteger64),
            0x101E => Ok(Self::MultipleString8),
            0x101F => Ok(Self::MultipleUnicode),
            0x1040 => Ok(Self::MultipleTime),
            0x1048 => Ok(Self::MultipleGuid),
            0x1102 => Ok(Self::MultipleBinary),

            invalid => Err(LtpError::InvalidPropertyType(invalid)),
        }
    }
}

impl From<PropertyType> for u16 {
    fn from(value: PropertyType) -> Self {
        value as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_types() {
        for prop_type in [
            PropertyType::Null,
            PropertyType::Integer16,
            PropertyType::Integer32,
            PropertyType::Floating32,
            PropertyType::ErrorCode,
            PropertyType::Boolean,
        ] {
            assert!(prop_type.is_inline(), "{prop_type:?}");
        }

        for prop_type in [
            PropertyType::Integer64,
            PropertyType::Time,
            PropertyType::Guid,
            PropertyType::Unicode,
            PropertyType::Binary,
            PropertyType::Object,
        ] {
            assert!(!prop_type.is_inline(), "{prop_type:?}");
        }
    }

    #[test]
    fn test_round_trip_tag() {
        assert_eq!(PropertyType::try_from(0x0102).unwrap(), PropertyType::Binary);
        assert!(PropertyType::try_from(0x101F).unwrap().is_multi_valued());
        let Err(LtpError::InvalidPropertyType(0x0099)) = PropertyType::try_from(0x0099) else {
            panic!("0x0099 is not a property type");
        };
    }
}
