//! The article repository. [`ArticleStore`] is the seam between the HTTP
//! handlers and the database; [`MongoStore`] implements it over the
//! `articles` collection using the filters built in [`crate::query`].

use crate::article::{strings, Article, MonthYear};
use crate::query::{self, Highlight, ListQuery, ARCHIVE_MONTHS, PAGE_SIZE};
use async_trait::async_trait;
use bson::{doc, oid::ObjectId};
use futures_util::TryStreamExt;
use mongodb::{options::ReturnDocument, Client, Collection};
use std::fmt;
use tracing::{debug, info};

/// Read access to articles, plus the view-count increment.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// One page of the chronological listing, most recent first.
    async fn list(&self, query: &ListQuery) -> Result<Vec<Article>>;

    /// The articles in a highlighted slot, by ascending rank.
    async fn highlighted(&self, highlight: Highlight) -> Result<Vec<Article>>;

    /// The `count` most viewed standard articles.
    async fn popular(&self, count: u32) -> Result<Vec<Article>>;

    /// Every distinct category, sorted.
    async fn categories(&self) -> Result<Vec<String>>;

    /// The most recent months that have articles, most recent first.
    async fn archives(&self) -> Result<Vec<MonthYear>>;

    /// The `limit` most recently inserted unarchived articles, most recent
    /// first by date.
    async fn recent(&self, limit: u32) -> Result<Vec<Article>>;

    /// Fetches an article by its hex id and increments its view count. The
    /// returned article carries the count from before the increment.
    async fn view(&self, id: &str) -> Result<Article>;
}

/// An [`ArticleStore`] backed by a MongoDB collection. Cloning is cheap and
/// shares the underlying connection pool.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    articles: Collection<Article>,
}

impl MongoStore {
    /// Connects to `uri` and pings `database` so that an unreachable server
    /// fails at startup rather than on the first request.
    pub async fn connect(uri: &str, database: &str, collection: &str) -> Result<MongoStore> {
        info!("Connecting to MongoDB");
        let client = Client::with_uri_str(uri).await?;
        client
            .database(database)
            .run_command(doc! { "ping": 1 })
            .await?;
        info!("Connected to MongoDB database '{}'", database);

        let articles = client.database(database).collection::<Article>(collection);
        Ok(MongoStore { client, articles })
    }

    /// Closes the connection pool.
    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}

#[async_trait]
impl ArticleStore for MongoStore {
    async fn list(&self, query: &ListQuery) -> Result<Vec<Article>> {
        let filter = query.filter();
        debug!(%filter, skip = query.skip(), "listing articles");
        let mut articles: Vec<Article> = self
            .articles
            .find(filter)
            .sort(ListQuery::sort())
            .skip(query.skip())
            .limit(PAGE_SIZE as i64)
            .await?
            .try_collect()
            .await?;
        query::sort_by_published(&mut articles);
        Ok(articles)
    }

    async fn highlighted(&self, highlight: Highlight) -> Result<Vec<Article>> {
        Ok(self
            .articles
            .find(highlight.filter())
            .sort(Highlight::sort())
            .await?
            .try_collect()
            .await?)
    }

    async fn popular(&self, count: u32) -> Result<Vec<Article>> {
        // A limit of 0 means "no limit" to MongoDB.
        if count == 0 {
            return Ok(Vec::new());
        }
        Ok(self
            .articles
            .find(query::popular_filter())
            .sort(query::popular_sort())
            .limit(i64::from(count))
            .await?
            .try_collect()
            .await?)
    }

    async fn categories(&self) -> Result<Vec<String>> {
        let values = self.articles.distinct("categories", doc! {}).await?;
        let mut categories = strings(values);
        categories.sort();
        Ok(categories)
    }

    async fn archives(&self) -> Result<Vec<MonthYear>> {
        let dates = strings(self.articles.distinct("date", doc! {}).await?);
        Ok(MonthYear::latest(
            dates.iter().map(String::as_str),
            ARCHIVE_MONTHS,
        ))
    }

    async fn recent(&self, limit: u32) -> Result<Vec<Article>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut articles: Vec<Article> = self
            .articles
            .find(query::recent_filter())
            .sort(query::recent_sort())
            .limit(i64::from(limit))
            .await?
            .try_collect()
            .await?;
        query::sort_by_published(&mut articles);
        Ok(articles)
    }

    async fn view(&self, id: &str) -> Result<Article> {
        let object_id = parse_id(id)?;
        self.articles
            .find_one_and_update(
                doc! { "_id": object_id },
                doc! { "$inc": { "viewCount": 1 } },
            )
            .return_document(ReturnDocument::Before)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_owned()))
    }
}

/// Parses a hex object id, mapping failure to [`Error::InvalidId`].
pub fn parse_id(id: &str) -> Result<ObjectId> {
    ObjectId::parse_str(id).map_err(|_| Error::InvalidId(id.to_owned()))
}

/// The result of a fallible store operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a failed article lookup.
#[derive(Debug)]
pub enum Error {
    /// Returned when an id isn't a 24-character hex object id.
    InvalidId(String),

    /// Returned when no article has the requested id.
    NotFound(String),

    /// Returned for errors from the database driver.
    Database(mongodb::error::Error),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidId(id) => write!(f, "invalid article id: {:?}", id),
            Error::NotFound(id) => write!(f, "article not found: {}", id),
            Error::Database(err) => write!(f, "database error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidId(_) => None,
            Error::NotFound(_) => None,
            Error::Database(err) => Some(err),
        }
    }
}

impl From<mongodb::error::Error> for Error {
    /// Converts driver errors into [`Error`]. This allows us to use the `?`
    /// operator on driver calls.
    fn from(err: mongodb::error::Error) -> Error {
        Error::Database(err)
    }
}
