//! The HTTP surface: routes, request handlers, and the mapping from errors
//! to status codes.
//!
//! Every handler follows the same path: parse parameters, query the
//! [`ArticleStore`], render through the [`Renderer`], and respond. Any
//! failure along the way becomes an [`Error`], which knows its status.

use crate::feed::{self, FeedConfig};
use crate::query::{self, Highlight, ListQuery, MonthFilter, MAX_PAGE, PAGE_SIZE};
use crate::render::{self, escape, CategoryMode, IndexPage, Renderer};
use crate::store::{self, ArticleStore};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::fmt;
use std::path::Path as FsPath;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use url::{form_urlencoded, Url};
use walkdir::WalkDir;

/// The number of articles in the Atom feed.
pub const FEED_SIZE: u32 = 20;

const ROUTES: [&str; 8] = [
    "/",
    "/archives",
    "/categories",
    "/articles/:id",
    "/articles/highlighted/:rank",
    "/articles/popular/:count",
    "/feed.atom",
    "/404",
];

/// Site details used by the feed.
#[derive(Debug, Clone)]
pub struct Site {
    pub title: String,
    pub url: Url,
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ArticleStore>,
    pub renderer: Arc<Renderer>,
    pub month_filter: MonthFilter,
    pub site: Arc<Site>,
}

/// Builds the router. Unmatched paths get the not-found page.
pub fn router(state: AppState, static_directory: &FsPath) -> Router {
    Router::new()
        .route(ROUTES[0], get(index))
        .route(ROUTES[1], get(archives))
        .route(ROUTES[2], get(categories))
        .route(ROUTES[3], get(article))
        .route(ROUTES[4], get(highlighted))
        .route(ROUTES[5], get(popular))
        .route(ROUTES[6], get(atom_feed))
        .route(ROUTES[7], get(not_found))
        .nest_service("/static", ServeDir::new(static_directory))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Logs the route table, including one `/static/<dir>/*` line per directory
/// under the static directory.
pub fn log_routes(static_directory: &FsPath) {
    info!("Routes:");
    for route in ROUTES {
        info!("  GET {}", route);
    }
    info!("  GET /static/*");
    for entry in WalkDir::new(static_directory)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
    {
        if let Ok(relative) = entry.path().strip_prefix(static_directory) {
            let relative: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            info!("  GET /static/{}/*", relative.join("/"));
        }
    }
}

/// Serves until Ctrl-C (or SIGTERM on Unix), then lets in-flight requests
/// finish.
pub async fn serve(listener: TcpListener, app: Router) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(err) => {
                error!("Couldn't listen for SIGTERM: {}", err);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutting down");
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    category: Option<String>,
    page: Option<String>,
    month: Option<String>,
    year: Option<String>,
    s: Option<String>,
}

impl ListParams {
    /// The listing link for another page with the same filters.
    fn href(&self, page: u64) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        let pairs = [
            ("category", &self.category),
            ("month", &self.month),
            ("year", &self.year),
            ("s", &self.s),
        ];
        for (key, value) in pairs {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                serializer.append_pair(key, value);
            }
        }
        serializer.append_pair("page", &page.to_string());
        format!("/?{}", serializer.finish())
    }
}

#[derive(Debug, Default, Deserialize)]
struct TypeParam {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Absent or empty means the first page. Negative pages are clamped later by
/// [`ListQuery::new`]; pages past [`MAX_PAGE`] are rejected.
fn parse_page(page: Option<&str>) -> Result<i64> {
    let bad = |page: &str| Error::BadParameter {
        name: "page",
        value: page.to_owned(),
    };
    match page {
        None | Some("") => Ok(0),
        Some(page) => match page.parse::<i64>() {
            Ok(n) if n <= MAX_PAGE => Ok(n),
            _ => Err(bad(page)),
        },
    }
}

async fn index(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Html<String>> {
    let query = ListQuery::new(parse_page(params.page.as_deref())?)
        .category(params.category.as_deref())
        .search(params.s.as_deref())
        .month_year(
            params.month.as_deref(),
            params.year.as_deref(),
            state.month_filter,
        )?;
    let articles = state.store.list(&query).await?;
    let cards = state.renderer.cards(&articles)?;
    let echo = |value: &Option<String>| escape(value.as_deref().unwrap_or_default());

    let page = IndexPage {
        cards,
        page: query.page,
        category: echo(&params.category),
        search: echo(&params.s),
        month: echo(&params.month),
        year: echo(&params.year),
        prev: (query.page > 0).then(|| escape(&params.href(query.page - 1))),
        next: (articles.len() as u64 == PAGE_SIZE)
            .then(|| escape(&params.href(query.page + 1))),
    };
    Ok(Html(state.renderer.index(page)?))
}

async fn archives(State(state): State<AppState>) -> Result<Html<String>> {
    let months = state.store.archives().await?;
    Ok(Html(state.renderer.archives(&months)?))
}

async fn categories(
    State(state): State<AppState>,
    Query(params): Query<TypeParam>,
) -> Result<Html<String>> {
    let categories = state.store.categories().await?;
    let mode = CategoryMode::from_param(params.kind.as_deref());
    Ok(Html(state.renderer.categories(&categories, mode)?))
}

async fn article(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TypeParam>,
) -> Result<Html<String>> {
    let variant = params.kind.as_deref();
    // An unknown variant must not count as a view.
    state.renderer.detail_template(variant)?;
    let article = state.store.view(&id).await?;
    Ok(Html(state.renderer.article(&article, variant)?))
}

async fn highlighted(
    State(state): State<AppState>,
    Path(rank): Path<String>,
) -> Result<Html<String>> {
    let highlight: Highlight = rank.parse()?;
    let articles = state.store.highlighted(highlight).await?;
    Ok(Html(state.renderer.highlighted(&articles)?))
}

async fn popular(
    State(state): State<AppState>,
    Path(count): Path<String>,
) -> Result<Html<String>> {
    let count: u32 = count.parse().map_err(|_| Error::BadParameter {
        name: "count",
        value: count.clone(),
    })?;
    let articles = state.store.popular(count).await?;
    Ok(Html(state.renderer.popular(&articles)?))
}

async fn atom_feed(State(state): State<AppState>) -> Result<Response> {
    let articles = state.store.recent(FEED_SIZE).await?;
    let mut body: Vec<u8> = Vec::new();
    feed::write_feed(
        FeedConfig {
            title: state.site.title.clone(),
            site_url: &state.site.url,
        },
        &articles,
        &mut body,
    )?;

    let mut response = (
        [(header::CONTENT_TYPE, "application/atom+xml; charset=utf-8")],
        body,
    )
        .into_response();
    if let Some(updated) = feed::last_modified(&articles) {
        let value = updated.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        if let Ok(value) = header::HeaderValue::from_str(&value) {
            response.headers_mut().insert(header::LAST_MODIFIED, value);
        }
    }
    Ok(response)
}

async fn not_found(State(state): State<AppState>) -> Result<(StatusCode, Html<String>)> {
    Ok((StatusCode::NOT_FOUND, Html(state.renderer.not_found()?)))
}

/// The result of a handler.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a failed request.
#[derive(Debug)]
pub enum Error {
    /// Returned when a path or query parameter can't be interpreted.
    BadParameter { name: &'static str, value: String },

    /// Returned when the listing filters or highlighted rank are invalid.
    Query(query::Error),

    /// Returned for failed article lookups.
    Store(store::Error),

    /// Returned for failed rendering, including unknown variants.
    Render(render::Error),

    /// Returned when the Atom feed can't be built.
    Feed(feed::Error),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadParameter { .. } => StatusCode::BAD_REQUEST,
            Error::Query(_) => StatusCode::BAD_REQUEST,
            Error::Store(store::Error::InvalidId(_)) => StatusCode::BAD_REQUEST,
            Error::Store(store::Error::NotFound(_)) => StatusCode::NOT_FOUND,
            Error::Store(store::Error::Database(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Render(err) => match err.root() {
                render::Error::UnknownVariant(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Feed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    /// Client errors echo the problem; server errors are logged and answered
    /// with the bare status text.
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
            let reason = status.canonical_reason().unwrap_or_default();
            (status, reason).into_response()
        } else {
            debug!("{}", self);
            (status, self.to_string()).into_response()
        }
    }
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::BadParameter { name, value } => {
                write!(f, "invalid {} parameter: {:?}", name, value)
            }
            Error::Query(err) => err.fmt(f),
            Error::Store(err) => err.fmt(f),
            Error::Render(err) => err.fmt(f),
            Error::Feed(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BadParameter { .. } => None,
            Error::Query(err) => Some(err),
            Error::Store(err) => Some(err),
            Error::Render(err) => Some(err),
            Error::Feed(err) => Some(err),
        }
    }
}

impl From<query::Error> for Error {
    fn from(err: query::Error) -> Error {
        Error::Query(err)
    }
}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Error {
        Error::Store(err)
    }
}

impl From<render::Error> for Error {
    fn from(err: render::Error) -> Error {
        Error::Render(err)
    }
}

impl From<feed::Error> for Error {
    fn from(err: feed::Error) -> Error {
        Error::Feed(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::article::Article;
    use crate::store::memory::{article, MemoryStore};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(store: Arc<MemoryStore>) -> Router {
        app_with_filter(store, MonthFilter::Display)
    }

    fn app_with_filter(store: Arc<MemoryStore>, month_filter: MonthFilter) -> Router {
        let state = AppState {
            store,
            renderer: Arc::new(render::test::renderer()),
            month_filter,
            site: Arc::new(Site {
                title: "Gazette".to_owned(),
                url: Url::parse("http://localhost:8080/").unwrap(),
            }),
        };
        router(state, FsPath::new("./static"))
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    /// The card titles on a rendered listing page, in order.
    fn titles(body: &str) -> Vec<String> {
        body.lines()
            .filter_map(|line| line.strip_prefix("standard:"))
            .map(str::to_owned)
            .collect()
    }

    fn dated(count: usize) -> Vec<Article> {
        (0..count)
            .map(|i| {
                let date = format!("Jan {}, 20{:02}", 1 + i % 28, 10 + i / 28);
                article(&format!("A{}", i), "standard", &date, 0)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_listing_excludes_highlighted_and_archived() {
        let mut archived = article("Archived", "standard", "Dec 3, 2017", 0);
        archived.is_archived = true;
        let store = Arc::new(MemoryStore::new(vec![
            article("Plain", "standard", "Dec 3, 2017", 0),
            article("Top", "standard", "Dec 4, 2017", 1),
            article("Second", "standard", "Dec 5, 2017", 2),
            archived,
        ]));
        let (status, body) = get(&app(store), "/").await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(vec!["Plain"], titles(&body));
    }

    #[tokio::test]
    async fn test_listing_is_most_recent_first() {
        let store = Arc::new(MemoryStore::new(vec![
            article("Older", "standard", "Dec 20, 2023", 0),
            article("Newest", "standard", "Jan 5, 2024", 0),
            article("Oldest", "standard", "Mar 1, 2022", 0),
        ]));
        let (_, body) = get(&app(store), "/").await;
        assert_eq!(vec!["Newest", "Older", "Oldest"], titles(&body));
    }

    #[tokio::test]
    async fn test_pages_are_disjoint() {
        let app = app(Arc::new(MemoryStore::new(dated(30))));
        let (_, first) = get(&app, "/").await;
        let (_, second) = get(&app, "/?page=1").await;
        let (_, third) = get(&app, "/?page=2").await;
        let (first, second, third) = (titles(&first), titles(&second), titles(&third));
        assert_eq!(13, first.len());
        assert_eq!(13, second.len());
        assert_eq!(4, third.len());
        for title in &second {
            assert!(!first.contains(title), "{} on two pages", title);
            assert!(!third.contains(title), "{} on two pages", title);
        }
    }

    #[tokio::test]
    async fn test_paging_links() {
        let app = app(Arc::new(MemoryStore::new(dated(30))));
        let (_, body) = get(&app, "/?category=&s=body&page=1").await;
        assert!(body.contains("page=1"), "{}", body);
        assert!(body.contains("next=/?s=body&amp;page=2"), "{}", body);
        assert!(body.contains("prev=/?s=body&amp;page=0"), "{}", body);

        let (_, body) = get(&app, "/?page=2").await;
        assert!(!body.contains("next="), "{}", body);
    }

    #[tokio::test]
    async fn test_page_parameter() {
        let app = app(Arc::new(MemoryStore::new(dated(3))));
        let (status, _) = get(&app, "/?page=two").await;
        assert_eq!(StatusCode::BAD_REQUEST, status);

        let (status, body) = get(&app, "/?page=-4").await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(3, titles(&body).len());
        assert!(body.contains("page=0"), "{}", body);

        let last = format!("/?page={}", MAX_PAGE);
        let (status, body) = get(&app, &last).await;
        assert_eq!(StatusCode::OK, status);
        assert!(titles(&body).is_empty());
        assert!(body.contains("prev="), "{}", body);

        let (status, _) = get(&app, "/?page=9223372036854775807").await;
        assert_eq!(StatusCode::BAD_REQUEST, status);
    }

    #[tokio::test]
    async fn test_listing_filters() {
        let mut news = article("News", "standard", "Dec 3, 2017", 0);
        news.categories = vec!["news".to_owned()];
        let store = Arc::new(MemoryStore::new(vec![
            news,
            article("Sports", "standard", "Nov 3, 2017", 0),
        ]));
        let app = app(store);
        assert_eq!(vec!["News"], titles(&get(&app, "/?category=news").await.1));
        assert_eq!(
            vec!["Sports"],
            titles(&get(&app, "/?month=Nov&year=2017").await.1)
        );
        assert_eq!(vec!["Sports"], titles(&get(&app, "/?s=SPORTS").await.1));
    }

    #[tokio::test]
    async fn test_display_month_filter_is_case_sensitive() {
        let app = app(Arc::new(MemoryStore::new(vec![article(
            "Lower",
            "standard",
            "dec 3, 2017",
            0,
        )])));
        assert!(titles(&get(&app, "/?month=Dec&year=2017").await.1).is_empty());
        assert_eq!(
            vec!["Lower"],
            titles(&get(&app, "/?month=dec&year=2017").await.1)
        );
    }

    #[tokio::test]
    async fn test_calendar_month_filter() {
        let store = Arc::new(MemoryStore::new(vec![
            article("Short", "standard", "Dec 3, 2017", 0),
            article("Long", "standard", "December 9, 2017", 0),
            article("November", "standard", "Nov 3, 2017", 0),
            article("Next year", "standard", "Dec 3, 2018", 0),
        ]));
        let app = app_with_filter(store, MonthFilter::Calendar);

        for month in ["12", "dec", "December"] {
            let (status, body) = get(&app, &format!("/?month={}&year=2017", month)).await;
            assert_eq!(StatusCode::OK, status);
            let mut found = titles(&body);
            found.sort();
            assert_eq!(vec!["Long", "Short"], found, "month={}", month);
        }

        for uri in ["/?month=13&year=2017", "/?month=Decembre&year=2017", "/?month=Dec&year=17"] {
            let (status, _) = get(&app, uri).await;
            assert_eq!(StatusCode::BAD_REQUEST, status, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_unknown_kind_in_listing_is_a_server_error() {
        let store = Arc::new(MemoryStore::new(vec![article(
            "Odd",
            "podcast",
            "Dec 3, 2017",
            0,
        )]));
        let (status, _) = get(&app(store), "/").await;
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, status);
    }

    #[tokio::test]
    async fn test_views_are_counted() {
        let a = article("Counted", "standard", "Dec 3, 2017", 0);
        let id = a.id();
        let store = Arc::new(MemoryStore::new(vec![a]));
        let app = app(store.clone());

        let (status, body) = get(&app, &format!("/articles/{}", id)).await;
        assert_eq!(StatusCode::OK, status);
        assert!(body.contains("<h1>Counted</h1>"), "{}", body);
        assert!(body.contains("<span>0</span>"), "{}", body);
        let (_, body) = get(&app, &format!("/articles/{}", id)).await;
        assert!(body.contains("<span>1</span>"), "{}", body);
        assert_eq!(Some(2), store.view_count(&id));
    }

    #[tokio::test]
    async fn test_article_variants() {
        let a = article("Wide", "standard", "Dec 3, 2017", 0);
        let id = a.id();
        let store = Arc::new(MemoryStore::new(vec![a]));
        let app = app(store.clone());

        let (status, body) = get(&app, &format!("/articles/{}?type=wide", id)).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!("wide:Wide", body);

        let (status, _) = get(&app, &format!("/articles/{}?type=narrow", id)).await;
        assert_eq!(StatusCode::BAD_REQUEST, status);
        assert_eq!(Some(1), store.view_count(&id));
    }

    #[tokio::test]
    async fn test_article_ids() {
        let app = app(Arc::new(MemoryStore::new(Vec::new())));
        let (status, _) = get(&app, "/articles/not-an-id").await;
        assert_eq!(StatusCode::BAD_REQUEST, status);

        let unknown = bson::oid::ObjectId::new().to_hex();
        let (status, _) = get(&app, &format!("/articles/{}", unknown)).await;
        assert_eq!(StatusCode::NOT_FOUND, status);
    }

    #[tokio::test]
    async fn test_highlighted() {
        let store = Arc::new(MemoryStore::new(vec![
            article("Three", "standard", "", 3),
            article("One", "standard", "", 1),
            article("Two", "standard", "", 2),
            article("Plain", "standard", "", 0),
        ]));
        let app = app(store);
        assert_eq!(
            (StatusCode::OK, "[1:One]".to_owned()),
            get(&app, "/articles/highlighted/primary").await
        );
        assert_eq!("[2:Two][3:Three]", get(&app, "/articles/highlighted/2").await.1);
        let (status, _) = get(&app, "/articles/highlighted/4").await;
        assert_eq!(StatusCode::BAD_REQUEST, status);
    }

    #[tokio::test]
    async fn test_popular() {
        let mut hot = article("Hot", "standard", "", 0);
        hot.view_count = 10;
        let mut warm = article("Warm", "standard", "", 0);
        warm.view_count = 5;
        let mut quote = article("Quote", "quote", "", 0);
        quote.view_count = 50;
        let app = app(Arc::new(MemoryStore::new(vec![warm, quote, hot])));

        assert_eq!("(Hot:10)", get(&app, "/articles/popular/1").await.1);
        assert_eq!("(Hot:10)(Warm:5)", get(&app, "/articles/popular/5").await.1);
        assert_eq!("", get(&app, "/articles/popular/0").await.1);
        let (status, _) = get(&app, "/articles/popular/many").await;
        assert_eq!(StatusCode::BAD_REQUEST, status);
        let (status, _) = get(&app, "/articles/popular/-1").await;
        assert_eq!(StatusCode::BAD_REQUEST, status);
    }

    #[tokio::test]
    async fn test_archives_and_categories() {
        let mut a = article("A", "standard", "Dec 3, 2017", 0);
        a.categories = vec!["news".to_owned(), "local".to_owned()];
        let mut b = article("B", "standard", "Dec 9, 2017", 0);
        b.categories = vec!["news".to_owned()];
        let app = app(Arc::new(MemoryStore::new(vec![a, b])));

        assert_eq!(
            "<a href=\"/?month=Dec&amp;year=2017\">December 2017</a>",
            get(&app, "/archives").await.1
        );
        assert_eq!(
            "cloud:<a>local</a><a>news</a>",
            get(&app, "/categories").await.1
        );
        assert_eq!(
            "dropdown:<option>local</option><option>news</option>",
            get(&app, "/categories?type=drop-down").await.1
        );
    }

    #[tokio::test]
    async fn test_feed() {
        let app = app(Arc::new(MemoryStore::new(vec![article(
            "Fresh",
            "standard",
            "Dec 3, 2017",
            0,
        )])));
        let response = app
            .oneshot(Request::builder().uri("/feed.atom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(StatusCode::OK, response.status());
        assert_eq!(
            "Sun, 03 Dec 2017 00:00:00 GMT",
            response.headers()[header::LAST_MODIFIED]
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8(body.to_vec()).unwrap().contains("Fresh"));
    }

    #[tokio::test]
    async fn test_not_found() {
        let app = app(Arc::new(MemoryStore::new(Vec::new())));
        for uri in ["/404", "/no/such/page"] {
            let (status, body) = get(&app, uri).await;
            assert_eq!(StatusCode::NOT_FOUND, status);
            assert_eq!("<h1>Not Found</h1>", body);
        }
    }
}
