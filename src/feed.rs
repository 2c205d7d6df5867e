//! Support for creating Atom feeds from a list of articles.

use crate::article::Article;
use atom_syndication::{Category, Entry, Error as AtomError, Feed, Link, Person};
use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc};
use std::fmt;
use std::io::Write;
use tracing::warn;
use url::Url;

/// Bundled configuration for creating a feed.
pub struct FeedConfig<'a> {
    pub title: String,

    /// The public base URL. Article links are resolved against it, so it
    /// should end with a `/`.
    pub site_url: &'a Url,
}

/// Creates a feed from some configuration ([`FeedConfig`]) and a list of
/// [`Article`]s and writes the result to a [`std::io::Write`]. Articles whose
/// date can't be interpreted are left out of the feed.
pub fn write_feed<W: Write>(config: FeedConfig, articles: &[Article], w: W) -> Result<()> {
    feed(config, articles)?.write_to(w)?;
    Ok(())
}

fn feed(config: FeedConfig, articles: &[Article]) -> Result<Feed> {
    let entries = feed_entries(&config, articles)?;
    let updated = entries
        .iter()
        .map(|entry| entry.updated)
        .max()
        .unwrap_or_else(|| utc().from_utc_datetime(&Utc::now().naive_utc()));
    Ok(Feed {
        title: config.title.into(),
        id: config.site_url.to_string(),
        updated,
        links: vec![alternate(config.site_url.to_string())],
        entries,
        ..Default::default()
    })
}

fn feed_entries(config: &FeedConfig, articles: &[Article]) -> Result<Vec<Entry>> {
    let mut entries: Vec<Entry> = Vec::with_capacity(articles.len());

    for article in articles {
        // Display dates carry no time of day, so entries are stamped at
        // midnight UTC.
        let date = match article.published() {
            Some(date) => utc().from_utc_datetime(&date.and_time(NaiveTime::MIN)),
            None => {
                warn!(
                    id = %article.id(),
                    date = %article.date,
                    "Leaving article with an unreadable date out of the feed"
                );
                continue;
            }
        };
        let url = config
            .site_url
            .join(&format!("articles/{}", article.id()))?
            .to_string();

        entries.push(Entry {
            id: url.clone(),
            title: article.title.clone().into(),
            updated: date,
            published: Some(date),
            authors: people(&article.author),
            categories: article
                .categories
                .iter()
                .map(|term| Category {
                    term: term.clone(),
                    ..Default::default()
                })
                .collect(),
            links: vec![alternate(url)],
            summary: Some(article.text_primary.clone().into()),
            ..Default::default()
        })
    }
    Ok(entries)
}

fn utc() -> FixedOffset {
    // An offset of zero is always in range.
    FixedOffset::east_opt(0).unwrap()
}

fn alternate(href: String) -> Link {
    Link {
        href,
        rel: "alternate".to_owned(),
        ..Default::default()
    }
}

fn people(author: &str) -> Vec<Person> {
    if author.is_empty() {
        return Vec::new();
    }
    vec![Person {
        name: author.to_owned(),
        ..Default::default()
    }]
}

/// Returns the newest of the feed's entry dates, if any. Used for the
/// `Last-Modified` header.
pub fn last_modified(articles: &[Article]) -> Option<DateTime<FixedOffset>> {
    articles
        .iter()
        .filter_map(Article::published)
        .max()
        .map(|date| utc().from_utc_datetime(&date.and_time(NaiveTime::MIN)))
}

type Result<T> = std::result::Result<T, Error>;

/// Represents a problem creating a feed.
#[derive(Debug)]
pub enum Error {
    /// Returned when there is an Atom-related error.
    Atom(AtomError),

    /// Returned when an article URL can't be built from the site URL.
    Url(url::ParseError),
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Atom(err) => err.fmt(f),
            Error::Url(err) => write!(f, "building article URL: {}", err),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Atom(err) => Some(err),
            Error::Url(err) => Some(err),
        }
    }
}

impl From<AtomError> for Error {
    /// Converts [`AtomError`]s into [`Error`]. This allows us to use the `?`
    /// operator in fallible feed operations.
    fn from(err: AtomError) -> Error {
        Error::Atom(err)
    }
}

impl From<url::ParseError> for Error {
    /// Converts [`url::ParseError`]s into [`Error`]. This allows us to use
    /// the `?` operator when joining article paths onto the site URL.
    fn from(err: url::ParseError) -> Error {
        Error::Url(err)
    }
}
