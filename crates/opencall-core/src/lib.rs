//! Core domain model and text/date heuristics for the open-call crawler.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "opencall-core";

/// Prefix for gallery identifiers derived from external sources.
pub const EXTERNAL_GALLERY_PREFIX: &str = "__external_";

/// Listing titles are clamped to this many characters before persistence.
pub const MAX_THEME_CHARS: usize = 200;

/// Where a gallery/email record originated. Ordering encodes trust:
/// data a gallery entered about itself outranks scraped or inferred data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailSource {
    InternalGallery,
    ExternalDirectory,
    OpenCall,
    WebsiteDiscovery,
}

impl EmailSource {
    /// Merge priority; higher wins a conflict.
    pub fn rank(self) -> u8 {
        match self {
            EmailSource::InternalGallery => 4,
            EmailSource::ExternalDirectory => 3,
            EmailSource::OpenCall => 2,
            EmailSource::WebsiteDiscovery => 1,
        }
    }

    pub fn default_quality_score(self) -> i32 {
        match self {
            EmailSource::InternalGallery => 100,
            EmailSource::ExternalDirectory => 60,
            EmailSource::OpenCall => 50,
            EmailSource::WebsiteDiscovery => 70,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmailSource::InternalGallery => "internal_gallery",
            EmailSource::ExternalDirectory => "external_directory",
            EmailSource::OpenCall => "open_call",
            EmailSource::WebsiteDiscovery => "website_discovery",
        }
    }

    pub fn from_str_loose(value: &str) -> Option<Self> {
        match value {
            "internal_gallery" => Some(EmailSource::InternalGallery),
            "external_directory" => Some(EmailSource::ExternalDirectory),
            "open_call" => Some(EmailSource::OpenCall),
            "website_discovery" => Some(EmailSource::WebsiteDiscovery),
            _ => None,
        }
    }
}

/// Ephemeral candidate produced by a source fetcher, consumed by the
/// crawl orchestrator. A candidate without a parseable deadline is never
/// constructed; fetchers drop such listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawledOpenCall {
    pub source: String,
    pub gallery: String,
    pub gallery_id: String,
    pub city: String,
    pub country: String,
    pub theme: String,
    pub deadline: NaiveDate,
    pub external_email: Option<String>,
    pub external_url: Option<String>,
    pub gallery_website: Option<String>,
    pub gallery_description: Option<String>,
}

/// Persisted open-call row. Content is never updated in place; re-imports
/// are prevented by dedup, and only lifecycle cleanup mutates the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCallRecord {
    pub id: Uuid,
    pub is_external: bool,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub call: CrawledOpenCall,
}

/// Persisted gallery email directory row, keyed on `email`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub email: String,
    pub gallery_name: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub language: String,
    pub source: EmailSource,
    pub gallery_id: Option<String>,
    pub website: Option<String>,
    pub quality_score: i32,
    pub is_active: bool,
    pub is_blocked: bool,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Working record for the identity merge. Same shape as a directory entry
/// without timestamps/flags; `email` may be absent until discovery fills it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryCandidate {
    pub gallery_name: String,
    pub email: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub source: EmailSource,
    pub gallery_id: Option<String>,
    pub website: Option<String>,
    pub quality_score: i32,
}

impl DirectoryCandidate {
    pub fn from_source(gallery_name: impl Into<String>, source: EmailSource) -> Self {
        Self {
            gallery_name: gallery_name.into(),
            email: None,
            country: None,
            city: None,
            source,
            gallery_id: None,
            website: None,
            quality_score: source.default_quality_score(),
        }
    }
}

/// Stable identifier for a gallery we only know from an external source.
pub fn external_gallery_id(source: &str, gallery_name: &str) -> String {
    let slug = normalize(gallery_name).replace(' ', "-");
    let slug = if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    };
    format!("{EXTERNAL_GALLERY_PREFIX}{source}_{slug}")
}

/// Clamp a listing title to [`MAX_THEME_CHARS`] on a character boundary.
pub fn truncate_theme(title: &str) -> String {
    title.trim().chars().take(MAX_THEME_CHARS).collect()
}

/// Outbound-mail language for a directory entry, inferred from country.
pub fn infer_language(country: Option<&str>) -> &'static str {
    match normalize(country.unwrap_or_default()).as_str() {
        "kr" | "korea" | "south korea" | "한국" | "대한민국" => "ko",
        "jp" | "japan" | "日本" => "ja",
        "fr" | "france" => "fr",
        "de" | "germany" => "de",
        "it" | "italy" => "it",
        "es" | "spain" => "es",
        _ => "en",
    }
}

// ---------------------------------------------------------------------------
// Text normalization

fn keep_for_matching(c: char) -> bool {
    c.is_ascii_lowercase()
        || c.is_ascii_digit()
        || ('\u{AC00}'..='\u{D7AF}').contains(&c) // Hangul syllables
        || ('\u{1100}'..='\u{11FF}').contains(&c) // Hangul jamo
        || ('\u{3040}'..='\u{30FF}').contains(&c) // Hiragana + Katakana
        || ('\u{4E00}'..='\u{9FFF}').contains(&c) // CJK ideographs
}

/// Canonical form used for keyword containment checks and identity keys:
/// lowercased, `&` mapped to "and", punctuation stripped, whitespace
/// collapsed. Total on any input; empty in, empty out.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .replace('&', " and ")
        .chars()
        .map(|c| if keep_for_matching(c) { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

static SCRIPT_STYLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)>").expect("valid regex")
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

/// Remove CDATA wrappers from feed payloads.
pub fn strip_cdata(text: &str) -> String {
    text.replace("<![CDATA[", "").replace("]]>", "")
}

/// Strip script/style blocks, tags, CDATA wrappers, and the five common
/// HTML entities so markup never reaches the classifiers or date parser.
pub fn strip_html(text: &str) -> String {
    let text = strip_cdata(text);
    let text = SCRIPT_STYLE_RE.replace_all(&text, " ");
    let text = TAG_RE.replace_all(&text, " ");
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Deadline parsing

static FULL_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(20\d{2})\s*[.\-/년]\s*(\d{1,2})\s*[.\-/월]\s*(\d{1,2})").expect("valid regex")
});
static SHORT_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})\s*[.\-/월]\s*(\d{1,2})").expect("valid regex"));

fn full_dates(text: &str) -> Vec<NaiveDate> {
    FULL_DATE_RE
        .captures_iter(text)
        .filter_map(|cap| {
            let year: i32 = cap[1].parse().ok()?;
            let month: u32 = cap[2].parse().ok()?;
            let day: u32 = cap[3].parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        })
        .collect()
}

/// Resolve a month/day with no year: assume the next occurrence. A date
/// already past this year rolls to next year. Known limitation: a listing
/// whose deadline genuinely passed is resurrected as "next year" — the
/// heuristic cannot tell an upcoming deadline from a stale one.
fn resolve_short_date(month: u32, day: u32, today: NaiveDate) -> Option<NaiveDate> {
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
    if this_year >= today {
        Some(this_year)
    } else {
        NaiveDate::from_ymd_opt(today.year() + 1, month, day)
    }
}

fn short_dates(text: &str, today: NaiveDate) -> Vec<NaiveDate> {
    SHORT_DATE_RE
        .captures_iter(text)
        .filter_map(|cap| {
            let month: u32 = cap[1].parse().ok()?;
            let day: u32 = cap[2].parse().ok()?;
            resolve_short_date(month, day, today)
        })
        .collect()
}

/// Extract a deadline from free-form text. Strategies are tried in order,
/// first success wins:
///
/// 1. a full-date range — the last `YYYY.MM.DD`-like date found (the end
///    of "2026.01.10 ~ 2026.03.01" is the meaningful deadline);
/// 2. a single full date;
/// 3. a short range without year — the latest of all resolved short dates;
/// 4. a single short date.
///
/// Short dates use next-occurrence year inference (see
/// [`resolve_short_date`]). Returns `None` when nothing date-like is found;
/// such listings are not imported.
pub fn parse_deadline(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let fulls = full_dates(text);
    if fulls.len() >= 2 {
        return fulls.last().copied();
    }
    if let Some(only) = fulls.first() {
        return Some(*only);
    }

    // Full-date spans are blanked first so MM.DD inside YYYY.MM.DD cannot
    // re-match as a short date.
    let stripped = FULL_DATE_RE.replace_all(text, " ");
    let shorts = short_dates(&stripped, today);
    if shorts.len() >= 2 {
        return shorts.into_iter().max();
    }
    shorts.into_iter().next()
}

/// RFC-822 publish-date fallback for RSS items.
pub fn parse_rfc822_date(text: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc2822(text.trim())
        .ok()
        .map(|dt| dt.date_naive())
}

/// True iff the deadline, interpreted as end-of-day UTC, has not passed.
/// Re-evaluated on every run; never persisted as a flag.
pub fn is_deadline_active(deadline: NaiveDate, now: DateTime<Utc>) -> bool {
    match deadline.and_hms_opt(23, 59, 59) {
        Some(end_of_day) => end_of_day.and_utc() >= now,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn normalize_lowercases_and_strips_punctuation() {
        assert_eq!(
            normalize("Open Call: Artists & Curators!"),
            "open call artists and curators"
        );
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("  --  "), "");
    }

    #[test]
    fn normalize_keeps_korean_and_japanese_scripts() {
        assert_eq!(normalize("2026 공모전 (서울)"), "2026 공모전 서울");
        assert_eq!(normalize("アーティスト募集!"), "アーティスト募集");
    }

    #[test]
    fn strip_html_removes_script_blocks_tags_and_entities() {
        let html = "<div><script>var x = 1;</script><p>Call &amp; Submit</p></div>";
        assert_eq!(strip_html(html), "Call & Submit");
        assert_eq!(strip_html("<![CDATA[공모 안내]]>"), "공모 안내");
    }

    #[test]
    fn full_date_range_takes_last_date() {
        let today = date(2025, 12, 1);
        assert_eq!(
            parse_deadline("Apply by 2026.01.10 ~ 2026.03.01", today),
            Some(date(2026, 3, 1))
        );
    }

    #[test]
    fn single_full_date_in_korean_format() {
        let today = date(2025, 12, 1);
        assert_eq!(
            parse_deadline("마감: 2026년 3월 15일", today),
            Some(date(2026, 3, 15))
        );
    }

    #[test]
    fn short_date_already_past_rolls_to_next_year() {
        let today = date(2026, 6, 1);
        assert_eq!(parse_deadline("deadline 05-01", today), Some(date(2027, 5, 1)));
        assert_eq!(parse_deadline("deadline 12-01", today), Some(date(2026, 12, 1)));
    }

    #[test]
    fn short_range_takes_latest_resolved_date() {
        let today = date(2026, 6, 1);
        assert_eq!(parse_deadline("접수 7.1 - 8.20", today), Some(date(2026, 8, 20)));
    }

    #[test]
    fn no_date_yields_none() {
        let today = date(2026, 6, 1);
        assert_eq!(parse_deadline("no dates here", today), None);
        assert_eq!(parse_deadline("", today), None);
    }

    #[test]
    fn rfc822_pub_date_parses_to_calendar_date() {
        assert_eq!(
            parse_rfc822_date("Tue, 10 Feb 2026 09:00:00 +0900"),
            Some(date(2026, 2, 10))
        );
        assert_eq!(parse_rfc822_date("not a date"), None);
    }

    #[test]
    fn deadline_active_until_end_of_day_utc() {
        let deadline = date(2026, 3, 1);
        let before = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 58).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        assert!(is_deadline_active(deadline, before));
        assert!(!is_deadline_active(deadline, after));
    }

    #[test]
    fn theme_truncation_is_char_boundary_safe() {
        let long = "공".repeat(300);
        let theme = truncate_theme(&long);
        assert_eq!(theme.chars().count(), MAX_THEME_CHARS);
    }

    #[test]
    fn external_gallery_id_is_prefixed_and_slugged() {
        assert_eq!(
            external_gallery_id("kr_rss", "Seoul Art Space!"),
            "__external_kr_rss_seoul-art-space"
        );
        assert_eq!(external_gallery_id("ig", "???"), "__external_ig_unknown");
    }

    #[test]
    fn language_inferred_from_country() {
        assert_eq!(infer_language(Some("KR")), "ko");
        assert_eq!(infer_language(Some("Japan")), "ja");
        assert_eq!(infer_language(Some("United States")), "en");
        assert_eq!(infer_language(None), "en");
    }

    #[test]
    fn source_rank_orders_trust() {
        assert!(EmailSource::InternalGallery.rank() > EmailSource::ExternalDirectory.rank());
        assert!(EmailSource::ExternalDirectory.rank() > EmailSource::OpenCall.rank());
        assert!(EmailSource::OpenCall.rank() > EmailSource::WebsiteDiscovery.rank());
    }
}
