//! Resource record TYPE and CLASS codes.
//!
//! Both code spaces are open-ended on the wire, so they are modelled as
//! newtypes over `u16` with a fixed table of well-known mnemonics. Codes
//! without a mnemonic display as `<N>`.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

macro_rules! rr_registry {
    ( $(#[$attr:meta])* $name:ident, $unknown:ident;
      $( ($variant:ident => $value:literal, $mnemonic:literal) )* ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u16);

        #[allow(dead_code)]
        impl $name {
            $(
                pub const $variant: $name = $name($value);
            )*

            /// All codes with a well-known mnemonic, in table order.
            pub const KNOWN: &'static [$name] = &[$($name($value)),*];

            pub fn mnemonic(self) -> Option<&'static str> {
                match self.0 {
                    $( $value => Some($mnemonic), )*
                    _ => None,
                }
            }

            pub fn from_mnemonic(s: &str) -> Option<Self> {
                match s.to_ascii_uppercase().as_str() {
                    $( $mnemonic => Some($name($value)), )*
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.mnemonic() {
                    Some(m) => f.write_str(m),
                    None => write!(f, "<{}>", self.0),
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::from_mnemonic(s).ok_or_else(|| Error::$unknown(s.to_string()))
            }
        }

        impl From<u16> for $name {
            fn from(value: u16) -> Self {
                $name(value)
            }
        }

        impl From<$name> for u16 {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

rr_registry! {
    /// Resource record TYPE (and QTYPE) code.
    RRType, UnknownType;
    (A => 1, "A")
    (NS => 2, "NS")
    (MD => 3, "MD")
    (MF => 4, "MF")
    (CNAME => 5, "CNAME")
    (SOA => 6, "SOA")
    (MB => 7, "MB")
    (MG => 8, "MG")
    (MR => 9, "MR")
    (NULL => 10, "NULL")
    (WKS => 11, "WKS")
    (PTR => 12, "PTR")
    (HINFO => 13, "HINFO")
    (MINFO => 14, "MINFO")
    (MX => 15, "MX")
    (TXT => 16, "TXT")
    (RP => 17, "RP")
    (AFSDB => 18, "AFSDB")
    (X25 => 19, "X25")
    (ISDN => 20, "ISDN")
    (RT => 21, "RT")
    (NSAP => 22, "NSAP")
    (PX => 26, "PX")
    (GPOS => 27, "GPOS")
    (AAAA => 28, "AAAA")
    (LOC => 29, "LOC")
    (SRV => 33, "SRV")
    (NAPTR => 35, "NAPTR")
    (KX => 36, "KX")
    (CERT => 37, "CERT")
    (DNAME => 39, "DNAME")
    (APL => 42, "APL")
    (SSHFP => 44, "SSHFP")
    (TLSA => 52, "TLSA")
    (SMIMEA => 53, "SMIMEA")
    (HIP => 55, "HIP")
    (OPENPGPKEY => 61, "OPENPGPKEY")
    (SVCB => 64, "SVCB")
    (HTTPS => 65, "HTTPS")
    (SPF => 99, "SPF")
    (EUI48 => 108, "EUI48")
    (EUI64 => 109, "EUI64")
    (IXFR => 251, "IXFR")
    (AXFR => 252, "AXFR")
    (MAILB => 253, "MAILB")
    (MAILA => 254, "MAILA")
    (ANY => 255, "ANY")
    (URI => 256, "URI")
    (CAA => 257, "CAA")
}

rr_registry! {
    /// Resource record CLASS (and QCLASS) code.
    RRClass, UnknownClass;
    (IN => 1, "IN")
    (CS => 2, "CS")
    (CH => 3, "CH")
    (HS => 4, "HS")
    (NONE => 254, "NONE")
    (ANY => 255, "ANY")
}
