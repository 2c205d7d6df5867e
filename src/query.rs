//! Builds the MongoDB filters, sorts, and pagination for every article
//! lookup. Nothing here talks to the database; [`crate::store`] executes
//! what this module builds.

use crate::article::{Article, MONTHS};
use bson::{doc, Document};
use chrono::Month;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// The number of articles on a listing page.
pub const PAGE_SIZE: u64 = 13;

/// The largest page index whose skip still fits a BSON 64-bit integer.
pub const MAX_PAGE: i64 = i64::MAX / PAGE_SIZE as i64;

/// The number of month buckets on the archive fragment.
pub const ARCHIVE_MONTHS: usize = 6;

/// How the `month` and `year` listing parameters are matched against the
/// stored display date.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonthFilter {
    /// Matches the raw display string against `^{month}.*{year}`, so
    /// `month=Dec&year=2017` matches `Dec 12, 2017`. Case-sensitive.
    #[default]
    Display,

    /// Interprets `month` as a calendar month (`12`, `Dec`, `december`) and
    /// matches any stored spelling of it, in any case, in the given year.
    Calendar,
}

impl MonthFilter {
    /// Builds the regular expression that the `date` field must match.
    pub fn pattern(&self, month: &str, year: &str) -> Result<String> {
        match self {
            MonthFilter::Display => Ok(format!(
                "^{}.*{}",
                regex::escape(month),
                regex::escape(year)
            )),
            MonthFilter::Calendar => {
                let month = parse_month(month)?;
                let year = year.trim();
                if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
                    return Err(Error::InvalidYear(year.to_owned()));
                }
                let name = month.name();
                Ok(format!(
                    r"(?i)^(?:{}|{})\s+\d{{1,2}},\s*{}$",
                    &name[..3],
                    name,
                    year
                ))
            }
        }
    }
}

impl FromStr for MonthFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "display" => Ok(MonthFilter::Display),
            "calendar" => Ok(MonthFilter::Calendar),
            _ => Err(format!("unknown month filter `{}`", s)),
        }
    }
}

/// Parses a month given as a number (`1`-`12`) or an English name, full or
/// abbreviated, in any case.
fn parse_month(month: &str) -> Result<Month> {
    let month = month.trim();
    if let Ok(number) = month.parse::<usize>() {
        return match number {
            1..=12 => Ok(MONTHS[number - 1]),
            _ => Err(Error::InvalidMonth(month.to_owned())),
        };
    }
    MONTHS
        .iter()
        .find(|m| {
            let name = m.name();
            name.eq_ignore_ascii_case(month) || name[..3].eq_ignore_ascii_case(month)
        })
        .copied()
        .ok_or_else(|| Error::InvalidMonth(month.to_owned()))
}

/// A request for one page of the chronological listing. Empty parameters
/// count as absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub category: Option<String>,

    /// The resolved `date` pattern. See [`MonthFilter::pattern`].
    pub date_pattern: Option<String>,

    pub search: Option<String>,

    /// The 0-based page index.
    pub page: u64,
}

impl ListQuery {
    /// Starts a query for `page`. Pages are clamped to `0..=MAX_PAGE`.
    pub fn new(page: i64) -> ListQuery {
        ListQuery {
            page: page.clamp(0, MAX_PAGE) as u64,
            ..ListQuery::default()
        }
    }

    pub fn category(mut self, category: Option<&str>) -> ListQuery {
        self.category = non_empty(category);
        self
    }

    pub fn search(mut self, search: Option<&str>) -> ListQuery {
        self.search = non_empty(search);
        self
    }

    /// Restricts the listing to a month. Applies only when both `month` and
    /// `year` are present.
    pub fn month_year(
        mut self,
        month: Option<&str>,
        year: Option<&str>,
        filter: MonthFilter,
    ) -> Result<ListQuery> {
        if let (Some(month), Some(year)) = (non_empty(month), non_empty(year)) {
            self.date_pattern = Some(filter.pattern(&month, &year)?);
        }
        Ok(self)
    }

    pub fn skip(&self) -> u64 {
        self.page.saturating_mul(PAGE_SIZE)
    }

    /// The filter document. Archived and highlighted articles are always
    /// excluded.
    pub fn filter(&self) -> Document {
        let mut filter = Document::new();
        if let Some(category) = &self.category {
            filter.insert("categories", category.as_str());
        }
        if let Some(pattern) = &self.date_pattern {
            filter.insert("date", doc! { "$regex": pattern.as_str() });
        }
        if let Some(search) = &self.search {
            let pattern = regex::escape(search);
            filter.insert(
                "$or",
                ["title", "textPrimary", "textSecondary"]
                    .iter()
                    .map(|field| {
                        let mut clause = Document::new();
                        clause.insert(*field, doc! { "$regex": pattern.as_str(), "$options": "i" });
                        clause
                    })
                    .collect::<Vec<Document>>(),
            );
        }
        filter.insert("isArchived", doc! { "$ne": true });
        filter.insert("rank", doc! { "$in": [0, null] });
        filter
    }

    /// The database sort. The display date doesn't sort chronologically as a
    /// string; `_id` breaks ties so consecutive pages never overlap.
    pub fn sort() -> Document {
        doc! { "date": 1, "_id": 1 }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned)
}

/// Re-sorts a fetched page by calendar date, most recent first. Articles
/// whose date doesn't parse go last; ties keep their fetch order.
pub fn sort_by_published(articles: &mut [Article]) {
    articles.sort_by(|a, b| b.published().cmp(&a.published()));
}

/// Which highlighted slot to look up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Highlight {
    /// Rank 1.
    Primary,

    /// Ranks 2 and 3.
    Secondary,
}

impl Highlight {
    pub fn filter(&self) -> Document {
        match self {
            Highlight::Primary => doc! { "rank": 1 },
            Highlight::Secondary => doc! { "rank": { "$gt": 1, "$lt": 4 } },
        }
    }

    pub fn sort() -> Document {
        doc! { "rank": 1 }
    }

    /// Whether an article with `rank` belongs in this slot.
    pub fn includes(&self, rank: i64) -> bool {
        match self {
            Highlight::Primary => rank == 1,
            Highlight::Secondary => rank > 1 && rank < 4,
        }
    }
}

impl FromStr for Highlight {
    type Err = Error;

    /// Accepts `primary`, `secondary`, or a rank from 1 to 3.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary" | "1" => Ok(Highlight::Primary),
            "secondary" | "2" | "3" => Ok(Highlight::Secondary),
            _ => Err(Error::InvalidHighlight(s.to_owned())),
        }
    }
}

/// The filter for popular articles: only standard articles are ranked.
pub fn popular_filter() -> Document {
    doc! { "type": "standard" }
}

pub fn popular_sort() -> Document {
    doc! { "viewCount": -1 }
}

/// The filter and sort for the feed's most recent articles. Object ids grow
/// with insertion time.
pub fn recent_filter() -> Document {
    doc! { "isArchived": { "$ne": true } }
}

pub fn recent_sort() -> Document {
    doc! { "_id": -1 }
}

/// The result of building a query from request parameters.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a request parameter that can't be turned into a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Returned when the calendar month filter can't interpret `month`.
    InvalidMonth(String),

    /// Returned when the calendar month filter can't interpret `year`.
    InvalidYear(String),

    /// Returned for a highlighted slot other than primary, secondary, or
    /// ranks 1 to 3.
    InvalidHighlight(String),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidMonth(month) => write!(f, "invalid month: {:?}", month),
            Error::InvalidYear(year) => write!(f, "invalid year: {:?}", year),
            Error::InvalidHighlight(rank) => {
                write!(f, "invalid highlighted rank: {:?}", rank)
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod test {
    use super::*;
    use bson::Bson;

    #[test]
    fn test_default_filter_excludes_archived_and_highlighted() {
        let filter = ListQuery::new(0).filter();
        assert_eq!(
            doc! {
                "isArchived": { "$ne": true },
                "rank": { "$in": [0, null] },
            },
            filter
        );
    }

    #[test]
    fn test_filter_with_every_parameter() -> Result<()> {
        let filter = ListQuery::new(2)
            .category(Some("travel"))
            .search(Some("a.b"))
            .month_year(Some("Dec"), Some("2017"), MonthFilter::Display)?
            .filter();
        assert_eq!(Some(&Bson::from("travel")), filter.get("categories"));
        assert_eq!(
            Some(&Bson::Document(doc! { "$regex": "^Dec.*2017" })),
            filter.get("date")
        );
        assert_eq!(
            Some(&Bson::Array(vec![
                Bson::Document(doc! { "title": { "$regex": r"a\.b", "$options": "i" } }),
                Bson::Document(doc! { "textPrimary": { "$regex": r"a\.b", "$options": "i" } }),
                Bson::Document(doc! { "textSecondary": { "$regex": r"a\.b", "$options": "i" } }),
            ])),
            filter.get("$or")
        );
        assert!(filter.contains_key("isArchived"));
        assert!(filter.contains_key("rank"));
        Ok(())
    }

    #[test]
    fn test_empty_parameters_are_ignored() -> Result<()> {
        let query = ListQuery::new(0)
            .category(Some(""))
            .search(Some("  "))
            .month_year(Some("Dec"), Some(""), MonthFilter::Calendar)?;
        assert_eq!(ListQuery::new(0), query);
        Ok(())
    }

    #[test]
    fn test_pagination() {
        assert_eq!(0, ListQuery::new(-4).skip());
        assert_eq!(0, ListQuery::new(0).skip());
        assert_eq!(26, ListQuery::new(2).skip());
    }

    #[test]
    fn test_huge_pages_do_not_overflow() {
        let query = ListQuery::new(i64::MAX);
        assert_eq!(MAX_PAGE as u64, query.page);
        assert!(query.skip() <= i64::MAX as u64);
        let query = ListQuery {
            page: u64::MAX,
            ..ListQuery::default()
        };
        assert_eq!(u64::MAX, query.skip());
    }

    #[test]
    fn test_display_month_filter_escapes_input() -> Result<()> {
        assert_eq!(
            r"^Dec\(.*2017",
            MonthFilter::Display.pattern("Dec(", "2017")?
        );
        Ok(())
    }

    #[test]
    fn test_calendar_month_filter() -> Result<()> {
        let wanted = r"(?i)^(?:Dec|December)\s+\d{1,2},\s*2017$";
        for month in ["12", "Dec", "dec", "December", "DECEMBER"] {
            assert_eq!(wanted, MonthFilter::Calendar.pattern(month, "2017")?);
        }
        Ok(())
    }

    #[test]
    fn test_calendar_month_filter_matches_both_spellings() -> Result<()> {
        let pattern = MonthFilter::Calendar.pattern("7", "2020")?;
        let re = regex::Regex::new(&pattern).unwrap();
        assert!(re.is_match("Jul 21, 2020"));
        assert!(re.is_match("July 4, 2020"));
        assert!(!re.is_match("Jul 21, 2021"));
        assert!(!re.is_match("Jun 21, 2020"));
        assert!(re.is_match("JUL 21, 2020"));
        Ok(())
    }

    #[test]
    fn test_display_month_filter_is_case_sensitive() -> Result<()> {
        let pattern = MonthFilter::Display.pattern("Dec", "2017")?;
        let re = regex::Regex::new(&pattern).unwrap();
        assert!(re.is_match("Dec 3, 2017"));
        assert!(!re.is_match("dec 3, 2017"));
        Ok(())
    }

    #[test]
    fn test_calendar_month_filter_rejects_bad_input() {
        assert_eq!(
            Err(Error::InvalidMonth("13".to_owned())),
            MonthFilter::Calendar.pattern("13", "2017")
        );
        assert_eq!(
            Err(Error::InvalidMonth("Decembre".to_owned())),
            MonthFilter::Calendar.pattern("Decembre", "2017")
        );
        assert_eq!(
            Err(Error::InvalidYear("17".to_owned())),
            MonthFilter::Calendar.pattern("Dec", "17")
        );
    }

    #[test]
    fn test_display_month_filter_accepts_anything() {
        assert!(MonthFilter::Display.pattern("Decembre", "17").is_ok());
    }

    #[test]
    fn test_highlight_filters() {
        assert_eq!(Ok(Highlight::Primary), "primary".parse());
        assert_eq!(Ok(Highlight::Primary), "1".parse());
        assert_eq!(Ok(Highlight::Secondary), "secondary".parse());
        assert_eq!(Ok(Highlight::Secondary), "3".parse());
        assert_eq!(
            Err(Error::InvalidHighlight("4".to_owned())),
            "4".parse::<Highlight>()
        );
        assert_eq!(doc! { "rank": 1 }, Highlight::Primary.filter());
        assert_eq!(
            doc! { "rank": { "$gt": 1, "$lt": 4 } },
            Highlight::Secondary.filter()
        );
        assert!(Highlight::Secondary.includes(2));
        assert!(Highlight::Secondary.includes(3));
        assert!(!Highlight::Secondary.includes(1));
        assert!(!Highlight::Secondary.includes(4));
    }

    #[test]
    fn test_month_filter_from_yaml() {
        let filter: MonthFilter = serde_yaml::from_str("calendar").unwrap();
        assert_eq!(MonthFilter::Calendar, filter);
        assert_eq!(Ok(MonthFilter::Display), "display".parse());
    }
}
