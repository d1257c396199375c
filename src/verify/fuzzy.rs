//! Values compared with a tolerance instead of exactly.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::{self, Display};

/// A duration (or any time-like float) with an absolute tolerance.
///
/// Both sides are treated as closed intervals `[value - t, value + t]`;
/// two durations are equal when the intervals overlap.
#[derive(Debug, Clone, Copy)]
pub struct FuzzyDuration {
    pub value: f64,
    pub tolerance: f64,
}

impl FuzzyDuration {
    pub fn new(value: f64, tolerance: f64) -> Self {
        Self { value, tolerance }
    }
}

impl PartialEq for FuzzyDuration {
    fn eq(&self, other: &Self) -> bool {
        (self.value - other.value).abs() <= self.tolerance + other.tolerance
    }
}

impl Display for FuzzyDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tolerance == 0.0 {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{}+/-{}", self.value, self.tolerance)
        }
    }
}

/// An integer with a tolerance given in percent of its own value.
#[derive(Debug, Clone, Copy)]
pub struct FuzzyInt {
    pub value: i64,
    pub tolerance_percent: u32,
}

impl FuzzyInt {
    pub fn new(value: i64, tolerance_percent: u32) -> Self {
        Self { value, tolerance_percent }
    }

    fn slack(&self) -> f64 {
        (self.value as f64).abs() * self.tolerance_percent as f64 / 100.0
    }
}

impl PartialEq for FuzzyInt {
    fn eq(&self, other: &Self) -> bool {
        self.value.abs_diff(other.value) as f64 <= self.slack() + other.slack()
    }
}

impl Display for FuzzyInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tolerance_percent == 0 {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{}+/-{}%", self.value, self.tolerance_percent)
        }
    }
}

/// `"30000/1001"` -> 29.97..., `"25"` -> 25.0. A zero denominator yields `None`.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 { None } else { Some(num / den) }
        }
        None => raw.trim().parse().ok(),
    }
}

/// One compared attribute.
///
/// Values of the same kind compare with their own rules; values of
/// different kinds (including [`AttributeValue::Missing`] against anything
/// else) are never equal.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Missing,
    Text(String),
    Int(i64),
    Duration(FuzzyDuration),
    FuzzyInt(FuzzyInt),
    Resolution(u32, u32),
    Histogram(BTreeMap<String, usize>),
}

impl AttributeValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, AttributeValue::Missing)
    }

    pub fn text(value: Option<&str>) -> Self {
        value.map_or(AttributeValue::Missing, |v| AttributeValue::Text(v.to_string()))
    }

    /// Parse a numeric ffprobe string into a duration with `tolerance`.
    /// Unparseable values are kept as text so they still compare strictly.
    pub fn duration(value: Option<&str>, tolerance: f64) -> Self {
        match value {
            None => AttributeValue::Missing,
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(v) => AttributeValue::Duration(FuzzyDuration::new(v, tolerance)),
                Err(_) => AttributeValue::Text(raw.to_string()),
            },
        }
    }

    pub fn fuzzy_int(value: Option<&str>, tolerance_percent: u32) -> Self {
        match value {
            None => AttributeValue::Missing,
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(v) => AttributeValue::FuzzyInt(FuzzyInt::new(v, tolerance_percent)),
                Err(_) => AttributeValue::Text(raw.to_string()),
            },
        }
    }

    pub fn int(value: Option<i64>) -> Self {
        value.map_or(AttributeValue::Missing, AttributeValue::Int)
    }
}

impl Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Missing => write!(f, "missing"),
            AttributeValue::Text(v) => write!(f, "{}", v),
            AttributeValue::Int(v) => write!(f, "{}", v),
            AttributeValue::Duration(v) => write!(f, "{}", v),
            AttributeValue::FuzzyInt(v) => write!(f, "{}", v),
            AttributeValue::Resolution(w, h) => write!(f, "{}x{}", w, h),
            AttributeValue::Histogram(counts) => {
                let parts: Vec<String> = counts.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            AttributeValue::Missing => serializer.serialize_none(),
            AttributeValue::Int(v) => serializer.serialize_i64(*v),
            AttributeValue::Resolution(w, h) => [*w, *h].serialize(serializer),
            AttributeValue::Histogram(counts) => counts.serialize(serializer),
            other => serializer.collect_str(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_intervals_overlap() {
        assert_eq!(FuzzyDuration::new(100.0, 10.0), FuzzyDuration::new(108.0, 0.0));
        assert_eq!(FuzzyDuration::new(100.0, 10.0), FuzzyDuration::new(110.0, 0.0));
        assert_ne!(FuzzyDuration::new(100.0, 5.0), FuzzyDuration::new(120.0, 5.0));
        assert_eq!(FuzzyDuration::new(100.0, 5.0), FuzzyDuration::new(110.0, 5.0));
    }

    #[test]
    fn test_fuzzy_int_uses_percentages() {
        assert_eq!(FuzzyInt::new(1_000_000, 5), FuzzyInt::new(1_040_000, 0));
        assert_ne!(FuzzyInt::new(1_000_000, 5), FuzzyInt::new(1_200_000, 5));
        assert_eq!(FuzzyInt::new(7, 0), FuzzyInt::new(7, 0));
    }

    #[test]
    fn test_fuzzy_int_extremes_do_not_overflow() {
        let max = AttributeValue::fuzzy_int(Some("9223372036854775807"), 5);
        let min = AttributeValue::fuzzy_int(Some("-9223372036854775808"), 5);
        assert_ne!(max, min);
        assert_eq!(min, min.clone());
        assert_eq!(FuzzyInt::new(i64::MAX, 5), FuzzyInt::new(i64::MAX - 1000, 0));
    }

    #[test]
    fn test_display() {
        assert_eq!(FuzzyDuration::new(12.5, 0.0).to_string(), "12.5");
        assert_eq!(FuzzyDuration::new(12.5, 10.0).to_string(), "12.5+/-10");
        assert_eq!(FuzzyInt::new(128000, 5).to_string(), "128000+/-5%");
    }

    #[test]
    fn test_frame_rate_parsing() {
        assert_eq!(parse_frame_rate("25/2"), Some(12.5));
        assert_eq!(parse_frame_rate("30"), Some(30.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("fast"), None);
    }

    #[test]
    fn test_mixed_kinds_compare_strictly() {
        let duration = AttributeValue::duration(Some("10.0"), 1.0);
        assert_ne!(duration, AttributeValue::Missing);
        assert_ne!(duration, AttributeValue::Text("10.0".to_string()));
        assert_eq!(AttributeValue::Missing, AttributeValue::Missing);
        assert_eq!(AttributeValue::duration(Some("N/A"), 1.0), AttributeValue::Text("N/A".to_string()));
    }

    #[test]
    fn test_serialized_shapes() {
        let mut counts = BTreeMap::new();
        counts.insert("audio".to_string(), 2);
        assert_eq!(serde_json::to_string(&AttributeValue::Histogram(counts)).unwrap(), r#"{"audio":2}"#);
        assert_eq!(serde_json::to_string(&AttributeValue::Missing).unwrap(), "null");
        assert_eq!(
            serde_json::to_string(&AttributeValue::duration(Some("5.5"), 0.05)).unwrap(),
            r#""5.5+/-0.05""#
        );
    }
}
