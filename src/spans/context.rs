//! Trace identifiers and the `traceparent` carrier format

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CarrierError {
    #[error("traceparent must have four '-' separated fields")]
    Shape,
    #[error("unsupported traceparent version {0:?}")]
    Version(String),
    #[error("invalid trace id {0:?}")]
    TraceId(String),
    #[error("invalid span id {0:?}")]
    SpanId(String),
    #[error("invalid trace flags {0:?}")]
    Flags(String),
}

/// 128-bit trace identifier, never zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(u128);

impl TraceId {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let id: u128 = rng.gen();
            if id != 0 {
                return Self(id);
            }
        }
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for TraceId {
    type Err = CarrierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_u128(s, 32)
            .filter(|id| *id != 0)
            .map(Self)
            .ok_or_else(|| CarrierError::TraceId(s.to_string()))
    }
}

/// 64-bit span identifier, never zero. Travels to the browser as 16 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpanId(u64);

impl SpanId {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let id: u64 = rng.gen();
            if id != 0 {
                return Self(id);
            }
        }
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = CarrierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_u128(s, 16)
            .and_then(|id| u64::try_from(id).ok())
            .filter(|id| *id != 0)
            .map(Self)
            .ok_or_else(|| CarrierError::SpanId(s.to_string()))
    }
}

impl TryFrom<String> for SpanId {
    type Error = CarrierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SpanId> for String {
    fn from(id: SpanId) -> Self {
        id.to_string()
    }
}

fn parse_hex_u128(s: &str, len: usize) -> Option<u128> {
    if s.len() != len || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u128::from_str_radix(s, 16).ok()
}

/// Identity of one span within a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: bool,
}

impl TraceContext {
    pub fn to_carrier(self) -> Carrier {
        let flags = u8::from(self.sampled);
        Carrier(format!("00-{}-{}-{flags:02x}", self.trace_id, self.span_id))
    }

    pub fn from_carrier(carrier: &Carrier) -> Result<Self, CarrierError> {
        let parts: Vec<&str> = carrier.as_str().trim().split('-').collect();
        let [version, trace_id, span_id, flags] = parts.as_slice() else {
            return Err(CarrierError::Shape);
        };

        if *version != "00" {
            return Err(CarrierError::Version((*version).to_string()));
        }
        let trace_id: TraceId = trace_id.parse()?;
        let span_id: SpanId = span_id.parse()?;
        let flags = parse_hex_u128(flags, 2)
            .ok_or_else(|| CarrierError::Flags((*flags).to_string()))?;

        Ok(Self {
            trace_id,
            span_id,
            sampled: flags & 0x01 == 1,
        })
    }
}

/// Serialized trace context (W3C `traceparent`) that lets a later request
/// continue the same trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Carrier(String);

impl Carrier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Carrier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_parse_w3c_example() {
        let ctx = TraceContext::from_carrier(&Carrier::from(SAMPLE.to_string())).unwrap();
        assert_eq!(ctx.trace_id.to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.span_id.to_string(), "00f067aa0ba902b7");
        assert!(ctx.sampled);
        assert_eq!(ctx.to_carrier().as_str(), SAMPLE);
    }

    #[test]
    fn test_rejects_malformed() {
        let cases = [
            ("", CarrierError::Shape),
            ("00-abc", CarrierError::Shape),
            (
                "01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
                CarrierError::Version("01".to_string()),
            ),
            (
                "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
                CarrierError::TraceId("00000000000000000000000000000000".to_string()),
            ),
            (
                "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
                CarrierError::SpanId("0000000000000000".to_string()),
            ),
            (
                "00-4bf92f3577b34da6a3ce929d0e0e4736-+0f067aa0ba902b7-01",
                CarrierError::SpanId("+0f067aa0ba902b7".to_string()),
            ),
            (
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-zz",
                CarrierError::Flags("zz".to_string()),
            ),
        ];
        for (input, expected) in cases {
            let err = TraceContext::from_carrier(&Carrier::from(input.to_string())).unwrap_err();
            assert_eq!(err, expected, "input {input:?}");
        }
    }

    #[test]
    fn test_span_id_json_is_hex_string() {
        let id: SpanId = "00f067aa0ba902b7".parse().unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""00f067aa0ba902b7""#);
        let back: SpanId = serde_json::from_str(r#""00f067aa0ba902b7""#).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<SpanId>(r#""nope""#).is_err());
    }

    proptest! {
        #[test]
        fn prop_parse_never_panics(s in ".{0,80}") {
            let _ = TraceContext::from_carrier(&Carrier::from(s));
        }

        #[test]
        fn prop_generated_contexts_survive_carrier(trace in 1u128.., span in 1u64.., sampled: bool) {
            let ctx = TraceContext { trace_id: TraceId(trace), span_id: SpanId(span), sampled };
            prop_assert_eq!(TraceContext::from_carrier(&ctx.to_carrier()).unwrap(), ctx);
        }
    }
}
