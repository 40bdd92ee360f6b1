//! Scalar conversions across the spreadsheet / XML boundary.
//!
//! | Type      | Spreadsheet          | XML                      |
//! |-----------|----------------------|--------------------------|
//! | Duration  | `hh[:mm[:ss]]`       | `PT1H30M`                |
//! | Date      | `2020-01-01`         | `2020-01-01`             |
//! | DateTime  | `2020-01-01`         | `2020-01-01T00:00:00`    |
//! | Boolean   | `Yes` / `No`         | `true` / `false`         |
//!
//! Values that do not fit a type's pattern pass through unchanged, except
//! booleans, whose failures surface as `None`.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::schema::TypeTag;

static CLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)(?::(\d{1,2}))?(?::(\d{1,2}))?$").expect("clock pattern"));

static ISO_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$").expect("duration pattern")
});

static YEAR_LEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}").expect("year pattern"));

const EIDR_PREFIX: &str = "10.5240";
const EIDR_URN: &str = "urn:eidr:10.5240:";
const EIDR_CID: &str = "md:cid:eidr-s:";

/// Which end of a window a date-time field bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Start,
    End,
}

impl Boundary {
    /// `End*` fields round up to the last second of the day.
    pub fn of_field(field: &str) -> Self {
        if field.starts_with("End") {
            Boundary::End
        } else {
            Boundary::Start
        }
    }

    fn rounded_time(self) -> &'static str {
        match self {
            Boundary::Start => "00:00:00",
            Boundary::End => "23:59:59",
        }
    }
}

/// Type tag plus the local field name it was looked up for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeHint {
    pub tag: TypeTag,
    pub field: String,
}

impl TypeHint {
    pub fn new(tag: TypeTag, field: impl Into<String>) -> Self {
        Self {
            tag,
            field: field.into(),
        }
    }

    pub fn string() -> Self {
        Self::new(TypeTag::String, "")
    }
}

/// Spreadsheet value to XML value. `None` means the value cannot be
/// represented in the target type.
pub fn to_internal(raw: &str, hint: &TypeHint) -> Option<String> {
    let raw = raw.trim();
    match hint.tag {
        TypeTag::String => Some(raw.to_string()),
        TypeTag::Duration => Some(clock_to_duration(raw).unwrap_or_else(|| raw.to_string())),
        TypeTag::Date => Some(strip_time(raw).to_string()),
        TypeTag::DateTime => Some(round_date(raw, Boundary::of_field(&hint.field))),
        TypeTag::Boolean => match raw.to_ascii_lowercase().as_str() {
            "yes" => Some("true".to_string()),
            "no" => Some("false".to_string()),
            _ => None,
        },
    }
}

/// XML value to spreadsheet value.
pub fn to_external(value: &str, hint: &TypeHint) -> String {
    let value = value.trim();
    match hint.tag {
        TypeTag::String => value.to_string(),
        TypeTag::Duration => duration_to_clock(value).unwrap_or_else(|| value.to_string()),
        TypeTag::Date => strip_time(value).to_string(),
        TypeTag::DateTime => unround_date(value, Boundary::of_field(&hint.field)),
        TypeTag::Boolean => match value.to_ascii_lowercase().as_str() {
            "true" | "1" => "Yes".to_string(),
            "false" | "0" => "No".to_string(),
            _ => value.to_string(),
        },
    }
}

// =============================================================================
// Durations
// =============================================================================

/// Numeric capture group; absent is zero, unparsable (overflow) is `None`.
fn number(caps: &Captures<'_>, i: usize) -> Option<u64> {
    match caps.get(i) {
        Some(m) => m.as_str().parse().ok(),
        None => Some(0),
    }
}

fn clock_to_duration(raw: &str) -> Option<String> {
    let caps = CLOCK.captures(raw)?;
    let (h, m, s) = (number(&caps, 1)?, number(&caps, 2)?, number(&caps, 3)?);
    if m >= 60 || s >= 60 {
        return None;
    }
    if h == 0 && m == 0 && s == 0 {
        return Some("PT0S".to_string());
    }

    let mut out = String::from("PT");
    if h > 0 {
        out.push_str(&format!("{}H", h));
    }
    if m > 0 {
        out.push_str(&format!("{}M", m));
    }
    if s > 0 {
        out.push_str(&format!("{}S", s));
    }
    Some(out)
}

fn duration_to_clock(value: &str) -> Option<String> {
    if value == "P" || value.ends_with('T') {
        return None;
    }
    let caps = ISO_DURATION.captures(value)?;
    let hours = number(&caps, 1)?.checked_mul(24)?.checked_add(number(&caps, 2)?)?;
    let (minutes, seconds) = (number(&caps, 3)?, number(&caps, 4)?);

    let mut parts = vec![hours, minutes, seconds];
    while parts.len() > 1 && parts.last() == Some(&0) {
        parts.pop();
    }
    Some(
        parts
            .iter()
            .map(|p| format!("{:02}", p))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

// =============================================================================
// Dates
// =============================================================================

fn is_plain_date(value: &str) -> bool {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// `2020-01-01T10:00:00` → `2020-01-01`; anything else unchanged.
fn strip_time(value: &str) -> &str {
    match value.split_once(['T', ' ']) {
        Some((date, _)) if is_plain_date(date) => date,
        _ => value,
    }
}

fn round_date(value: &str, boundary: Boundary) -> String {
    if is_plain_date(value) {
        format!("{}T{}", value, boundary.rounded_time())
    } else {
        value.to_string()
    }
}

/// Strip the time only when it is the rounding this boundary would add.
fn unround_date(value: &str, boundary: Boundary) -> String {
    match value.split_once('T') {
        Some((date, time))
            if is_plain_date(date) && time.trim_end_matches('Z') == boundary.rounded_time() =>
        {
            date.to_string()
        }
        _ => value.to_string(),
    }
}

/// Start/End cells holding a date rather than a condition keyword.
pub fn is_year_leading(value: &str) -> bool {
    YEAR_LEADING.is_match(value.trim())
}

// =============================================================================
// Identifiers
// =============================================================================

/// `md:cid:eidr-s:X` or `urn:eidr:10.5240:X` → `10.5240/X`.
pub fn compact_eidr(id: &str) -> String {
    let id = id.trim();
    if let Some(suffix) = id.strip_prefix(EIDR_CID).or_else(|| id.strip_prefix(EIDR_URN)) {
        return format!("{}/{}", EIDR_PREFIX, suffix);
    }
    id.to_string()
}

/// `10.5240/X` → `md:cid:eidr-s:X`, the content-ID form used on assets.
pub fn expand_eidr(id: &str) -> String {
    let id = id.trim();
    match id.strip_prefix(EIDR_PREFIX).and_then(|rest| rest.strip_prefix('/')) {
        Some(suffix) => format!("{}{}", EIDR_CID, suffix),
        None => id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hint(tag: TypeTag, field: &str) -> TypeHint {
        TypeHint::new(tag, field)
    }

    #[test]
    fn test_duration_to_xml() {
        let h = hint(TypeTag::Duration, "RunLength");
        assert_eq!(to_internal("48", &h).unwrap(), "PT48H");
        assert_eq!(to_internal("01:30", &h).unwrap(), "PT1H30M");
        assert_eq!(to_internal("00:00:45", &h).unwrap(), "PT45S");
        assert_eq!(to_internal("0", &h).unwrap(), "PT0S");
        assert_eq!(to_internal("two hours", &h).unwrap(), "two hours");
    }

    #[test]
    fn test_duration_to_sheet_drops_trailing_zero_fields() {
        let h = hint(TypeTag::Duration, "Duration");
        assert_eq!(to_external("PT48H", &h), "48");
        assert_eq!(to_external("PT1H30M", &h), "01:30");
        assert_eq!(to_external("PT1H0M5S", &h), "01:00:05");
        assert_eq!(to_external("P1DT2H", &h), "26");
        assert_eq!(to_external("PT0S", &h), "00");
        assert_eq!(to_external("P1Y", &h), "P1Y");
    }

    #[test]
    fn test_oversized_durations_pass_through() {
        let h = hint(TypeTag::Duration, "RunLength");
        assert_eq!(
            to_internal("99999999999999999999:00:00", &h).unwrap(),
            "99999999999999999999:00:00"
        );
        assert_eq!(to_external("P999999999999999999D", &h), "P999999999999999999D");
        assert_eq!(to_external("PT99999999999999999999H", &h), "PT99999999999999999999H");
    }

    #[test]
    fn test_datetime_rounding_by_boundary() {
        let start = hint(TypeTag::DateTime, "Start");
        let end = hint(TypeTag::DateTime, "End");
        assert_eq!(to_internal("2020-01-01", &start).unwrap(), "2020-01-01T00:00:00");
        assert_eq!(to_internal("2021-12-31", &end).unwrap(), "2021-12-31T23:59:59");
        assert_eq!(to_internal("2020-01-01T10:00:00", &start).unwrap(), "2020-01-01T10:00:00");

        assert_eq!(to_external("2020-01-01T00:00:00", &start), "2020-01-01");
        assert_eq!(to_external("2021-12-31T23:59:59", &end), "2021-12-31");
        assert_eq!(to_external("2021-12-31T23:59:59", &start), "2021-12-31T23:59:59");
    }

    #[test]
    fn test_date_strips_time() {
        let h = hint(TypeTag::Date, "Date");
        assert_eq!(to_external("2010-05-01T00:00:00", &h), "2010-05-01");
        assert_eq!(to_internal("2010-05-01", &h).unwrap(), "2010-05-01");
        assert_eq!(to_external("2010", &h), "2010");
    }

    #[test]
    fn test_boolean_vocabulary() {
        let h = hint(TypeTag::Boolean, "ExceptionFlag");
        assert_eq!(to_internal("Yes", &h).as_deref(), Some("true"));
        assert_eq!(to_internal("no", &h).as_deref(), Some("false"));
        assert_eq!(to_internal("maybe", &h), None);
        assert_eq!(to_external("true", &h), "Yes");
        assert_eq!(to_external("false", &h), "No");
    }

    #[test]
    fn test_eidr_rewriting() {
        assert_eq!(compact_eidr("md:cid:eidr-s:ABCD-1234"), "10.5240/ABCD-1234");
        assert_eq!(compact_eidr("urn:eidr:10.5240:ABCD-1234"), "10.5240/ABCD-1234");
        assert_eq!(compact_eidr("md:cid:org:studio:42"), "md:cid:org:studio:42");
        assert_eq!(expand_eidr("10.5240/ABCD-1234"), "md:cid:eidr-s:ABCD-1234");
        assert_eq!(expand_eidr("md:cid:org:studio:42"), "md:cid:org:studio:42");
    }

    #[test]
    fn test_year_leading() {
        assert!(is_year_leading("2020-01-01"));
        assert!(!is_year_leading("Immediate"));
        assert!(!is_year_leading(""));
    }
}
