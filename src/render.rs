//! Renders articles and the aggregates derived from them into HTML pages and
//! fragments. Templates use Go template syntax (via [`gtmpl`]) and receive
//! one of the typed contexts defined here; see [`crate::value`] for how the
//! contexts become template values.
//!
//! Template sources are read once by [`Renderer::load`]. Every render parses
//! a fresh [`Template`] from the cached source, so nothing mutable is shared
//! between concurrent requests.

use crate::article::{Article, ArticleKind, MonthYear, UnknownKind};
use crate::util::{self, FileError};
use gtmpl::{Context, Template, Value};
use gtmpl_derive::Gtmpl;
use pulldown_cmark::escape::escape_html;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use walkdir::WalkDir;

pub const INDEX: &str = "index.html";
pub const ARTICLE: &str = "article.html";
pub const NOT_FOUND: &str = "404.html";
pub const HIGHLIGHTED: &str = "fractional/highlighted.html";
pub const POPULAR: &str = "fractional/popular-articles.html";
pub const ARCHIVES: &str = "fractional/archives.html";
pub const CATEGORY_CLOUD: &str = "fractional/category-cloud.html";
pub const CATEGORY_DROP_DOWN: &str = "fractional/category-drop-down.html";

const VARIANT_PREFIX: &str = "article-";
const HTML_EXTENSION: &str = ".html";

/// HTML-escapes text taken from a document before it reaches a template,
/// since the template engine prints strings verbatim.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    // Writing into a `String` can't fail.
    let _ = escape_html(&mut out, text);
    out
}

/// The context for article cards, detail pages, and article lists. Text
/// fields are escaped on construction.
#[derive(Clone, Debug, PartialEq)]
pub struct ArticleView {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub author: String,
    pub img: String,
    pub imgs: Vec<String>,
    pub categories: Vec<String>,
    pub date: String,
    pub date_time: String,
    pub location: String,
    pub text_primary: String,
    pub text_secondary: String,
    pub view_count: i64,
    pub rank: i64,
}

impl From<&Article> for ArticleView {
    fn from(article: &Article) -> ArticleView {
        let escape_all = |items: &[String]| items.iter().map(|s| escape(s)).collect();
        ArticleView {
            id: article.id(),
            kind: escape(&article.kind),
            title: escape(&article.title),
            author: escape(&article.author),
            img: escape(&article.img),
            imgs: escape_all(&article.imgs),
            categories: escape_all(&article.categories),
            date: escape(&article.date),
            date_time: article.date_time(),
            location: escape(&article.location),
            text_primary: escape(&article.text_primary),
            text_secondary: escape(&article.text_secondary),
            view_count: article.view_count,
            rank: article.rank,
        }
    }
}

/// The context for the listing page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexPage {
    /// The rendered article cards, in display order.
    pub cards: Vec<String>,

    /// The 0-based page index.
    pub page: u64,

    pub category: String,
    pub search: String,
    pub month: String,
    pub year: String,

    /// The link to the previous (more recent) page, if any.
    pub prev: Option<String>,

    /// The link to the next (older) page, if any.
    pub next: Option<String>,
}

/// The context for the highlighted and popular fragments.
#[derive(Clone, Debug, PartialEq)]
pub struct ArticleList {
    pub articles: Vec<ArticleView>,
}

impl ArticleList {
    fn new(articles: &[Article]) -> ArticleList {
        ArticleList {
            articles: articles.iter().map(ArticleView::from).collect(),
        }
    }
}

/// One entry of the archive fragment. `month` is the abbreviation used in
/// display dates (and thus in listing links); `month_name` is for display.
#[derive(Clone, Debug, PartialEq, Gtmpl)]
pub struct ArchiveEntry {
    pub month: String,
    pub month_name: String,
    pub year: String,
}

impl From<&MonthYear> for ArchiveEntry {
    fn from(m: &MonthYear) -> ArchiveEntry {
        ArchiveEntry {
            month: m.month_abbreviation().to_owned(),
            month_name: m.month_name().to_owned(),
            year: m.year.to_string(),
        }
    }
}

/// The context for the archive fragment.
#[derive(Clone, Debug, PartialEq)]
pub struct ArchiveList {
    pub archives: Vec<ArchiveEntry>,
}

/// The context for both category fragments.
#[derive(Clone, Debug, PartialEq)]
pub struct CategoryList {
    pub categories: Vec<String>,
}

/// Which category fragment to render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CategoryMode {
    Cloud,
    DropDown,
}

impl CategoryMode {
    /// `drop-down` selects the drop-down; anything else is the cloud.
    pub fn from_param(param: Option<&str>) -> CategoryMode {
        match param {
            Some("drop-down") => CategoryMode::DropDown,
            _ => CategoryMode::Cloud,
        }
    }

    fn template(&self) -> &'static str {
        match self {
            CategoryMode::Cloud => CATEGORY_CLOUD,
            CategoryMode::DropDown => CATEGORY_DROP_DOWN,
        }
    }
}

/// Holds the template sources and renders every page and fragment.
#[derive(Debug)]
pub struct Renderer {
    /// Template sources keyed by their path relative to the templates
    /// directory, with `/` separators.
    sources: HashMap<String, String>,

    /// The detail-page variants, i.e. `foo` for `article-foo.html`.
    variants: BTreeSet<String>,
}

impl Renderer {
    /// Loads every `.html` file under `directory`.
    pub fn load(directory: &Path) -> Result<Renderer> {
        let mut sources = Vec::new();
        for result in WalkDir::new(directory).sort_by_file_name() {
            let entry = result?;
            if !entry.file_type().is_file()
                || !entry.file_name().to_string_lossy().ends_with(HTML_EXTENSION)
            {
                continue;
            }
            let name = entry
                .path()
                // strip_prefix() should never fail since `directory` is an
                // ancestor of every entry
                .strip_prefix(directory)
                .unwrap()
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<String>>()
                .join("/");
            sources.push((name, util::read_to_string(entry.path(), "template")?));
        }
        Renderer::from_sources(sources)
    }

    /// Builds a renderer from `(name, source)` pairs. Every source must parse
    /// and every template the renderer needs must be present.
    pub fn from_sources<I, N, S>(sources: I) -> Result<Renderer>
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        let mut map = HashMap::new();
        for (name, source) in sources {
            let (name, source): (String, String) = (name.into(), source.into());
            parse(&source).map_err(|err| {
                Error::Annotated(format!("parsing template `{}`", name), Box::new(err))
            })?;
            map.insert(name, source);
        }

        let required = [
            INDEX,
            ARTICLE,
            NOT_FOUND,
            HIGHLIGHTED,
            POPULAR,
            ARCHIVES,
            CATEGORY_CLOUD,
            CATEGORY_DROP_DOWN,
        ];
        for name in required
            .iter()
            .copied()
            .chain(ArticleKind::ALL.iter().map(ArticleKind::card_template))
        {
            if !map.contains_key(name) {
                return Err(Error::MissingTemplate(name.to_owned()));
            }
        }

        let variants = map
            .keys()
            .filter(|name| !name.contains('/'))
            .filter_map(|name| {
                name.strip_prefix(VARIANT_PREFIX)?
                    .strip_suffix(HTML_EXTENSION)
                    .map(str::to_owned)
            })
            .filter(|variant| is_variant_name(variant))
            .collect();

        Ok(Renderer {
            sources: map,
            variants,
        })
    }

    /// The detail-page variants available to `?type=`.
    pub fn variants(&self) -> impl Iterator<Item = &str> {
        self.variants.iter().map(String::as_str)
    }

    /// Resolves the detail template for an optional variant. An absent or
    /// empty variant selects the default template.
    pub fn detail_template(&self, variant: Option<&str>) -> Result<String> {
        match variant {
            None | Some("") => Ok(ARTICLE.to_owned()),
            Some(variant) if self.variants.contains(variant) => {
                Ok(format!("{}{}{}", VARIANT_PREFIX, variant, HTML_EXTENSION))
            }
            Some(variant) => Err(Error::UnknownVariant(variant.to_owned())),
        }
    }

    fn execute<T: Into<Value>>(&self, name: &str, data: T) -> Result<String> {
        let source = self
            .sources
            .get(name)
            .ok_or_else(|| Error::MissingTemplate(name.to_owned()))?;
        let template = parse(source)?;
        let context = Context::from(data).map_err(Error::Template)?;
        let mut out: Vec<u8> = Vec::new();
        template
            .execute(&mut out, &context)
            .map_err(|err| {
                Error::Annotated(
                    format!("rendering `{}`", name),
                    Box::new(Error::Template(err)),
                )
            })?;
        String::from_utf8(out).map_err(|err| Error::Template(err.to_string()))
    }

    /// Renders the card for one article, chosen by its kind.
    pub fn card(&self, article: &Article) -> Result<String> {
        let kind = article.kind()?;
        self.execute(kind.card_template(), ArticleView::from(article))
    }

    /// Renders cards in order. The first failure aborts.
    pub fn cards(&self, articles: &[Article]) -> Result<Vec<String>> {
        articles.iter().map(|article| self.card(article)).collect()
    }

    pub fn index(&self, page: IndexPage) -> Result<String> {
        self.execute(INDEX, page)
    }

    /// Renders the detail page. See [`Renderer::detail_template`].
    pub fn article(&self, article: &Article, variant: Option<&str>) -> Result<String> {
        let template = self.detail_template(variant)?;
        self.execute(&template, ArticleView::from(article))
    }

    pub fn highlighted(&self, articles: &[Article]) -> Result<String> {
        self.execute(HIGHLIGHTED, ArticleList::new(articles))
    }

    pub fn popular(&self, articles: &[Article]) -> Result<String> {
        self.execute(POPULAR, ArticleList::new(articles))
    }

    pub fn archives(&self, months: &[MonthYear]) -> Result<String> {
        self.execute(
            ARCHIVES,
            ArchiveList {
                archives: months.iter().map(ArchiveEntry::from).collect(),
            },
        )
    }

    pub fn categories(&self, categories: &[String], mode: CategoryMode) -> Result<String> {
        self.execute(
            mode.template(),
            CategoryList {
                categories: categories.iter().map(|c| escape(c)).collect(),
            },
        )
    }

    pub fn not_found(&self) -> Result<String> {
        self.execute(NOT_FOUND, Value::Nil)
    }
}

fn parse(source: &str) -> Result<Template> {
    let mut template = Template::default();
    template.parse(source).map_err(Error::Template)?;
    Ok(template)
}

fn is_variant_name(variant: &str) -> bool {
    !variant.is_empty()
        && variant
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// The result of a fallible rendering operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error loading or executing templates.
#[derive(Debug)]
pub enum Error {
    /// Returned when an article's type has no card template.
    UnknownKind(UnknownKind),

    /// Returned when a requested detail variant has no template.
    UnknownVariant(String),

    /// Returned when a template the renderer needs is missing.
    MissingTemplate(String),

    /// An error from the template engine, either parsing or executing.
    Template(String),

    /// Returned for I/O errors reading template files.
    File(FileError),

    /// Returned for errors walking the templates directory.
    WalkDir(walkdir::Error),

    /// An error with an annotation.
    Annotated(String, Box<Error>),
}

impl Error {
    /// Strips annotations.
    pub fn root(&self) -> &Error {
        match self {
            Error::Annotated(_, err) => err.root(),
            _ => self,
        }
    }
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UnknownKind(err) => err.fmt(f),
            Error::UnknownVariant(variant) => {
                write!(f, "unknown article template variant: {:?}", variant)
            }
            Error::MissingTemplate(name) => write!(f, "missing template `{}`", name),
            Error::Template(err) => err.fmt(f),
            Error::File(err) => err.fmt(f),
            Error::WalkDir(err) => err.fmt(f),
            Error::Annotated(annotation, err) => write!(f, "{}: {}", annotation, err),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::UnknownKind(err) => Some(err),
            Error::UnknownVariant(_) => None,
            Error::MissingTemplate(_) => None,
            Error::Template(_) => None,
            Error::File(err) => Some(err),
            Error::WalkDir(err) => Some(err),
            Error::Annotated(_, err) => Some(err),
        }
    }
}

impl From<UnknownKind> for Error {
    fn from(err: UnknownKind) -> Error {
        Error::UnknownKind(err)
    }
}

impl From<FileError> for Error {
    fn from(err: FileError) -> Error {
        Error::File(err)
    }
}

impl From<walkdir::Error> for Error {
    /// Converts a [`walkdir::Error`] into an [`Error`]. It allows us to
    /// use the `?` operator while walking the templates directory.
    fn from(err: walkdir::Error) -> Error {
        Error::WalkDir(err)
    }
}
