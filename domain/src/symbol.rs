use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallstr::SmallString;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolParseError(String);

impl Display for SymbolParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Unable to parse Symbol from '{}', expected BASE/QUOTE", self.0)
    }
}

impl std::error::Error for SymbolParseError {}

/// Canonical internal symbol form, always `BASE/QUOTE` uppercase.
/// Exchange-native spellings (e.g. `BTCUSDT`) are normalized to this form on
/// ingest and denormalized back on egress by the driver that owns the pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(SmallString<[u8; 16]>);

impl Symbol {
    pub fn new(base: &str, quote: &str) -> Self {
        let mut buf = SmallString::<[u8; 16]>::new();
        buf.push_str(&base.to_ascii_uppercase());
        buf.push('/');
        buf.push_str(&quote.to_ascii_uppercase());
        Self(buf)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn base(&self) -> &str {
        self.split().0
    }

    pub fn quote(&self) -> &str {
        self.split().1
    }

    fn split(&self) -> (&str, &str) {
        let s = self.0.as_str();
        s.split_once('/')
            .unwrap_or_else(|| panic!("invariant violated: Symbol '{s}' has no separator"))
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Symbol {
    type Err = SymbolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| SymbolParseError(s.to_owned()))?;
        if base.is_empty() || quote.is_empty() {
            return Err(SymbolParseError(s.to_owned()));
        }
        Ok(Self::new(base, quote))
    }
}

impl Serialize for Symbol {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SymbolVisitor;

        impl<'de> Visitor<'de> for SymbolVisitor {
            type Value = Symbol;

            fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "a string in BASE/QUOTE form")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Symbol::from_str(v).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(SymbolVisitor)
    }
}
