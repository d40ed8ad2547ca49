use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallstr::SmallString;

/// Lowercase interned venue name, e.g. `binance`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeId(SmallString<[u8; 16]>);

impl ExchangeId {
    pub fn new(name: &str) -> Self {
        Self(SmallString::from(name.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for ExchangeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExchangeId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for ExchangeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_on_construction() {
        assert_eq!(ExchangeId::new("BiNaNcE").as_str(), "binance");
    }

    #[test]
    fn display_round_trips() {
        let id = ExchangeId::new("binance");
        assert_eq!(id.to_string(), "binance");
    }
}
