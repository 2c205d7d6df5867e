//! Defines the [`Article`] document along with the values derived from it:
//! the [`ArticleKind`] that selects a card template, the parsed publication
//! date, and the [`MonthYear`] buckets listed on the archive fragment.
//!
//! Articles are written by an external editor. The stored `date` field is a
//! display string (e.g., `Dec 12, 2017`) rather than a BSON date, so every
//! calendar operation goes through [`parse_display_date`].

use bson::{oid::ObjectId, Bson};
use chrono::{Datelike, Month, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// An article document from the `articles` collection. Every field except
/// the identifier falls back to its default when absent from the document,
/// `null`, or of an unexpected type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    /// The database-assigned identifier. See [`Article::id`] for the form
    /// used in URLs.
    #[serde(rename = "_id")]
    pub object_id: ObjectId,

    /// The raw article type. It's kept as a string so that a document with
    /// an unknown type can still be listed; [`Article::kind`] parses it.
    #[serde(rename = "type", default, deserialize_with = "lenient::string")]
    pub kind: String,

    #[serde(default, deserialize_with = "lenient::string")]
    pub img: String,

    #[serde(default, deserialize_with = "lenient::strings")]
    pub imgs: Vec<String>,

    #[serde(default, deserialize_with = "lenient::string")]
    pub author: String,

    /// 0 (or missing) for ordinary articles, 1 for the primary highlight and
    /// 2-3 for secondary highlights.
    #[serde(default, deserialize_with = "lenient::int")]
    pub rank: i64,

    #[serde(default, deserialize_with = "lenient::strings")]
    pub categories: Vec<String>,

    #[serde(default, deserialize_with = "lenient::string")]
    pub title: String,

    /// The display date, e.g. `Dec 12, 2017`.
    #[serde(default, deserialize_with = "lenient::string")]
    pub date: String,

    #[serde(default, deserialize_with = "lenient::string")]
    pub location: String,

    #[serde(default, deserialize_with = "lenient::string")]
    pub text_primary: String,

    #[serde(default, deserialize_with = "lenient::string")]
    pub text_secondary: String,

    #[serde(default, deserialize_with = "lenient::int")]
    pub view_count: i64,

    #[serde(default, deserialize_with = "lenient::boolean")]
    pub is_archived: bool,
}

/// Field decoders for documents written by hand or by older tools, which
/// store whole numbers as doubles and clear fields with `null`. A value of
/// the wrong type decodes as the field's default instead of failing the
/// whole document.
mod lenient {
    use bson::Bson;
    use serde::{Deserialize, Deserializer};

    /// Accepts 32- and 64-bit integers and whole-valued doubles.
    pub fn int<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        Ok(match Bson::deserialize(d)? {
            Bson::Int32(n) => i64::from(n),
            Bson::Int64(n) => n,
            Bson::Double(f) if f.fract() == 0.0 => f as i64,
            _ => 0,
        })
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(match Bson::deserialize(d)? {
            Bson::String(s) => s,
            _ => String::new(),
        })
    }

    /// Keeps the string elements of an array.
    pub fn strings<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(match Bson::deserialize(d)? {
            Bson::Array(items) => super::strings(items),
            _ => Vec::new(),
        })
    }

    pub fn boolean<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(matches!(Bson::deserialize(d)?, Bson::Boolean(true)))
    }
}

/// Keeps the string values of a BSON array, dropping everything else.
pub(crate) fn strings(values: Vec<Bson>) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|value| match value {
            Bson::String(s) => Some(s),
            _ => None,
        })
        .collect()
}

impl Article {
    /// The hex form of the object id, as used in `/articles/{id}`.
    pub fn id(&self) -> String {
        self.object_id.to_hex()
    }

    /// Parses the raw `type` field.
    pub fn kind(&self) -> Result<ArticleKind, UnknownKind> {
        self.kind.parse()
    }

    /// The calendar date parsed from the display date, if it parses.
    pub fn published(&self) -> Option<NaiveDate> {
        parse_display_date(&self.date)
    }

    /// The normalized `YYYY-Mon-DD` form of the display date. See
    /// [`normalize_date`].
    pub fn date_time(&self) -> String {
        normalize_date(&self.date)
    }

    /// Whether the article belongs to the highlighted surfaces rather than
    /// the chronological listing.
    pub fn is_highlighted(&self) -> bool {
        self.rank != 0
    }
}

/// The known article types. Each kind has its own card template.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArticleKind {
    Standard,
    Quote,
    Gallery,
    Audio,
    Video,
}

impl ArticleKind {
    pub const ALL: [ArticleKind; 5] = [
        ArticleKind::Standard,
        ArticleKind::Quote,
        ArticleKind::Gallery,
        ArticleKind::Audio,
        ArticleKind::Video,
    ];

    /// The stored (and URL) name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleKind::Standard => "standard",
            ArticleKind::Quote => "quote",
            ArticleKind::Gallery => "gallery",
            ArticleKind::Audio => "audio",
            ArticleKind::Video => "video",
        }
    }

    /// The card template for the kind, relative to the templates directory.
    pub fn card_template(&self) -> &'static str {
        match self {
            ArticleKind::Standard => "fractional/article-card-standard.html",
            ArticleKind::Quote => "fractional/article-card-quote.html",
            ArticleKind::Gallery => "fractional/article-card-gallery.html",
            ArticleKind::Audio => "fractional/article-card-audio.html",
            ArticleKind::Video => "fractional/article-card-video.html",
        }
    }
}

impl fmt::Display for ArticleKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArticleKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArticleKind::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownKind(s.to_owned()))
    }
}

/// Returned when an article's `type` isn't one of the [`ArticleKind`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl fmt::Display for UnknownKind {
    /// Displays an [`UnknownKind`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown article type: {:?}", &self.0)
    }
}

impl std::error::Error for UnknownKind {}

/// Parses a display date such as `Dec 12, 2017` or `December 12, 2017`.
/// Returns `None` for anything else.
pub fn parse_display_date(date: &str) -> Option<NaiveDate> {
    // `%b` accepts full month names as well when parsing, but the explicit
    // fallback keeps this independent of that leniency.
    let date = date.trim();
    NaiveDate::parse_from_str(date, "%b %d, %Y")
        .or_else(|_| NaiveDate::parse_from_str(date, "%B %d, %Y"))
        .ok()
}

/// Converts a display date into `YYYY-Mon-DD`, e.g. `Dec 3, 2017` into
/// `2017-Dec-03`. The month is the first three letters of the stored month
/// and the day is zero-padded. Returns an empty string when the date doesn't
/// have the `<month> <day>, <year>` shape.
pub fn normalize_date(date: &str) -> String {
    let mut fields = date.split_whitespace();
    let (month, day, year) = match (fields.next(), fields.next(), fields.next()) {
        (Some(month), Some(day), Some(year)) => (month, day.trim_end_matches(','), year),
        _ => return String::new(),
    };

    let month_ok = month.len() >= 3 && month.chars().all(|c| c.is_ascii_alphabetic());
    let day_ok = (1..=2).contains(&day.len()) && day.chars().all(|c| c.is_ascii_digit());
    let year_ok = year.len() == 4 && year.chars().all(|c| c.is_ascii_digit());
    if !(month_ok && day_ok && year_ok) || fields.next().is_some() {
        return String::new();
    }

    format!("{}-{}-{:0>2}", year, &month[..3], day)
}

/// The calendar months in order, indexed by `number - 1`.
pub const MONTHS: [Month; 12] = [
    Month::January,
    Month::February,
    Month::March,
    Month::April,
    Month::May,
    Month::June,
    Month::July,
    Month::August,
    Month::September,
    Month::October,
    Month::November,
    Month::December,
];

/// A month of a particular year. Ordered chronologically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthYear {
    pub year: i32,

    /// 1-based month number.
    pub month: u32,
}

impl MonthYear {
    pub fn from_date(date: NaiveDate) -> MonthYear {
        MonthYear {
            year: date.year(),
            month: date.month(),
        }
    }

    fn calendar_month(&self) -> Month {
        MONTHS[(self.month as usize).clamp(1, 12) - 1]
    }

    /// The full month name, e.g. `December`.
    pub fn month_name(&self) -> &'static str {
        self.calendar_month().name()
    }

    /// The three-letter month name used by display dates, e.g. `Dec`.
    pub fn month_abbreviation(&self) -> &'static str {
        &self.month_name()[..3]
    }

    /// Reduces a set of display dates to the `limit` most recent distinct
    /// months, most recent first. Dates that don't parse are skipped.
    pub fn latest<'a, I>(dates: I, limit: usize) -> Vec<MonthYear>
    where
        I: IntoIterator<Item = &'a str>,
    {
        dates
            .into_iter()
            .filter_map(parse_display_date)
            .map(MonthYear::from_date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .rev()
            .take(limit)
            .collect()
    }
}

impl fmt::Display for MonthYear {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.month_name(), self.year)
    }
}
