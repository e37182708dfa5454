//! Time-to-live values accepted either as seconds (`3600`) or as a
//! suffixed string (`"90s"`, `"15m"`, `"24h"`, `"30d"`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ttl(pub u64);

impl Ttl {
    pub fn seconds(self) -> u64 {
        self.0
    }

    pub fn as_duration(self) -> chrono::Duration {
        chrono::Duration::seconds(self.0.min(i64::MAX as u64) as i64)
    }
}

pub fn parse(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (digits, mult) = match raw.chars().last()? {
        's' => (&raw[..raw.len() - 1], 1),
        'm' => (&raw[..raw.len() - 1], 60),
        'h' => (&raw[..raw.len() - 1], 3600),
        'd' => (&raw[..raw.len() - 1], 86_400),
        c if c.is_ascii_digit() => (raw, 1),
        _ => return None,
    };
    digits.parse::<u64>().ok()?.checked_mul(mult)
}

impl Serialize for Ttl {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for Ttl {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        match Raw::deserialize(d)? {
            Raw::Secs(s) => Ok(Ttl(s)),
            Raw::Text(t) => parse(&t)
                .map(Ttl)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid ttl '{t}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(parse("90s"), Some(90));
        assert_eq!(parse("15m"), Some(900));
        assert_eq!(parse("24h"), Some(86_400));
        assert_eq!(parse("30d"), Some(2_592_000));
        assert_eq!(parse("3600"), Some(3600));
        assert_eq!(parse("1w"), None);
        assert_eq!(parse("h"), None);
    }

    #[test]
    fn test_deserialize_number_or_string() {
        let a: Ttl = serde_json::from_str("120").unwrap();
        let b: Ttl = serde_json::from_str("\"2m\"").unwrap();
        assert_eq!(a, b);
        assert!(serde_json::from_str::<Ttl>("\"soon\"").is_err());
    }
}
