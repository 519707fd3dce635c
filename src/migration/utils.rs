//! Pure normalization helpers shared by the entity transformers

use chrono::NaiveDate;

/// Separator between assembled note parts.
pub const NOTE_SEPARATOR: &str = " | ";

/// Name parts recovered from source fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedName {
    pub first: Option<String>,
    pub last: Option<String>,
    pub middle_initial: Option<String>,
}

impl ParsedName {
    pub fn is_empty(&self) -> bool {
        self.first.is_none() && self.last.is_none()
    }
}

/// Parse a single full-name field. "Last, First Middle" is tried first
/// (comma form), then "First [M] Last": a middle initial is only
/// recognized as a lone letter token, so multi-word surnames like
/// "Juan Dela Cruz" keep the whole tail as the last name.
pub fn parse_full_name(raw: &str) -> ParsedName {
    let s = raw.trim();
    if s.is_empty() {
        return ParsedName::default();
    }

    if let Some((last, rest)) = s.split_once(',') {
        let mut tokens = rest.split_whitespace();
        let first = tokens.next().map(str::to_string);
        let middle_initial = tokens.next().map(truncate_initial);
        return ParsedName {
            first,
            last: non_empty(last),
            middle_initial,
        };
    }

    let tokens: Vec<&str> = s.split_whitespace().collect();
    match tokens.len() {
        1 => ParsedName {
            first: None,
            last: Some(tokens[0].to_string()),
            middle_initial: None,
        },
        2 => ParsedName {
            first: Some(tokens[0].to_string()),
            last: Some(tokens[1].to_string()),
            middle_initial: None,
        },
        _ => {
            if is_initial(tokens[1]) {
                ParsedName {
                    first: Some(tokens[0].to_string()),
                    last: Some(tokens[2..].join(" ")),
                    middle_initial: Some(truncate_initial(tokens[1])),
                }
            } else {
                ParsedName {
                    first: Some(tokens[0].to_string()),
                    last: Some(tokens[1..].join(" ")),
                    middle_initial: None,
                }
            }
        }
    }
}

fn is_initial(token: &str) -> bool {
    let t = token.trim_end_matches('.');
    t.chars().count() == 1 && t.chars().all(char::is_alphabetic)
}

/// Middle initials are stored as a single character.
fn truncate_initial(token: &str) -> String {
    token.trim_end_matches('.').chars().take(1).collect()
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Compose a property address. An explicit pre-composed field wins;
/// otherwise block/lot/phase/street parts are joined with ", ",
/// absent parts omitted. Bare part values get their label prefixed
/// ("1" under Block becomes "Block 1"); values the source already
/// labeled pass through unchanged.
pub fn compose_address(
    explicit: Option<&str>,
    block: Option<&str>,
    lot: Option<&str>,
    phase: Option<&str>,
    street: Option<&str>,
) -> Option<String> {
    if let Some(addr) = explicit.and_then(non_empty) {
        return Some(addr);
    }

    let mut parts = Vec::new();
    for (label, value) in [("Block", block), ("Lot", lot), ("Phase", phase)] {
        if let Some(v) = value.and_then(non_empty) {
            parts.push(labeled(label, &v));
        }
    }
    if let Some(v) = street.and_then(non_empty) {
        parts.push(v);
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

fn labeled(label: &str, value: &str) -> String {
    if value.len() >= label.len()
        && value.is_char_boundary(label.len())
        && value[..label.len()].eq_ignore_ascii_case(label)
    {
        value.to_string()
    } else {
        format!("{} {}", label, value)
    }
}

/// Lenient integer parse: strips every non-digit character first
/// ("12 yrs" -> 12, "1,500" -> 1500). Failure is absent, never zero.
pub fn parse_int_lenient(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    let negative = trimmed.starts_with('-');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let value: i64 = digits.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Total date parse: ISO `YYYY-MM-DD` (time suffix ignored), then
/// `MM/DD/YYYY`, then `MM/DD/YY` with two-digit years taken as 2000s,
/// then a handful of spelled-out formats seen in exports. `None` on
/// total failure - never panics.
pub fn parse_date_or_null(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if s.len() >= 10 && s.is_char_boundary(10) {
        if let Ok(d) = NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d") {
            return Some(d);
        }
    }

    // Short-year check must run before %m/%d/%Y: chrono's %Y leniently
    // accepts 2-digit years verbatim (e.g. "24" -> year 0024).
    if let Some(d) = parse_short_year_date(s) {
        return Some(d);
    }

    if let Ok(d) = NaiveDate::parse_from_str(s, "%m/%d/%Y") {
        return Some(d);
    }

    for fmt in ["%Y/%m/%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    None
}

/// MM/DD/YY with the century pinned to 2000.
fn parse_short_year_date(s: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() != 3 || parts[2].trim().len() != 2 {
        return None;
    }
    let month: u32 = parts[0].trim().parse().ok()?;
    let day: u32 = parts[1].trim().parse().ok()?;
    let year: i32 = parts[2].trim().parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

/// Join optional note parts with the fixed separator, keeping the given
/// order. The order is part of the contract - re-running the transform
/// must rebuild byte-identical notes.
pub fn assemble_notes(parts: Vec<Option<String>>) -> Option<String> {
    let present: Vec<String> = parts.into_iter().flatten().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.join(NOTE_SEPARATOR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_name_comma_form() {
        let name = parse_full_name("Dela Cruz, Juan M");
        assert_eq!(name.last.as_deref(), Some("Dela Cruz"));
        assert_eq!(name.first.as_deref(), Some("Juan"));
        assert_eq!(name.middle_initial.as_deref(), Some("M"));
    }

    #[test]
    fn test_parse_full_name_plain_form() {
        let name = parse_full_name("Juan Dela Cruz");
        assert_eq!(name.first.as_deref(), Some("Juan"));
        assert_eq!(name.last.as_deref(), Some("Dela Cruz"));
        assert_eq!(name.middle_initial, None);
    }

    #[test]
    fn test_parse_full_name_with_initial_token() {
        let name = parse_full_name("Maria S. Santos");
        assert_eq!(name.first.as_deref(), Some("Maria"));
        assert_eq!(name.middle_initial.as_deref(), Some("S"));
        assert_eq!(name.last.as_deref(), Some("Santos"));
    }

    #[test]
    fn test_parse_full_name_middle_truncated() {
        let name = parse_full_name("Santos, Maria Sol");
        assert_eq!(name.middle_initial.as_deref(), Some("S"));
    }

    #[test]
    fn test_parse_full_name_degenerate() {
        assert!(parse_full_name("").is_empty());
        assert!(parse_full_name("   ").is_empty());

        let single = parse_full_name("Reyes");
        assert_eq!(single.last.as_deref(), Some("Reyes"));
        assert_eq!(single.first, None);
    }

    #[test]
    fn test_compose_address_prefers_explicit() {
        assert_eq!(
            compose_address(Some(" 12 Main St "), Some("1"), None, None, None),
            Some("12 Main St".to_string())
        );
    }

    #[test]
    fn test_compose_address_from_parts() {
        assert_eq!(
            compose_address(None, Some("1"), Some("2"), Some("3"), Some("Sampaguita St")),
            Some("Block 1, Lot 2, Phase 3, Sampaguita St".to_string())
        );

        // absent parts are omitted, not rendered as blanks
        assert_eq!(
            compose_address(None, Some("1"), Some("2"), None, None),
            Some("Block 1, Lot 2".to_string())
        );

        assert_eq!(compose_address(None, None, None, None, None), None);
    }

    #[test]
    fn test_compose_address_pre_labeled_parts() {
        assert_eq!(
            compose_address(None, Some("Block 7"), Some("Lot 12"), None, None),
            Some("Block 7, Lot 12".to_string())
        );
    }

    #[test]
    fn test_parse_int_lenient() {
        assert_eq!(parse_int_lenient("12 yrs"), Some(12));
        assert_eq!(parse_int_lenient("1,500"), Some(1500));
        assert_eq!(parse_int_lenient("-42"), Some(-42));
        assert_eq!(parse_int_lenient("n/a"), None);
        assert_eq!(parse_int_lenient(""), None);
    }

    #[test]
    fn test_parse_date_iso() {
        assert_eq!(
            parse_date_or_null("2024-03-15"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        // time suffix from API timestamps is ignored
        assert_eq!(
            parse_date_or_null("2024-03-15T08:30:00.000Z"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
    }

    #[test]
    fn test_parse_date_us_forms() {
        assert_eq!(
            parse_date_or_null("03/15/2024"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        // two-digit years are 2000s
        assert_eq!(
            parse_date_or_null("03/15/24"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
    }

    #[test]
    fn test_parse_date_total() {
        assert_eq!(parse_date_or_null("not-a-date"), None);
        assert_eq!(parse_date_or_null(""), None);
        assert_eq!(parse_date_or_null("13/45/2024"), None);
        assert_eq!(parse_date_or_null("ありがとう"), None);
    }

    #[test]
    fn test_assemble_notes_fixed_order() {
        let notes = assemble_notes(vec![
            Some("Contact: 0917 123 4567".to_string()),
            None,
            Some("Years of residency: 12".to_string()),
        ]);
        assert_eq!(
            notes.as_deref(),
            Some("Contact: 0917 123 4567 | Years of residency: 12")
        );

        assert_eq!(assemble_notes(vec![None, None]), None);
    }
}
