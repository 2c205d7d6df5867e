use anyhow::{Context, Result};
use clap::Parser;
use gazette::config::{Args, Config};
use gazette::render::Renderer;
use gazette::server::{self, AppState, Site};
use gazette::store::MongoStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("gazette={},tower_http=info", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(err) = run(args).await {
        error!("{:#}", err);
        return Err(err);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(&args).context("Loading configuration")?;

    let renderer = Renderer::load(&config.templates_directory).with_context(|| {
        format!(
            "Loading templates from `{}`",
            config.templates_directory.display()
        )
    })?;
    let variants: Vec<&str> = renderer.variants().collect();
    info!("Article variants: {:?}", variants);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Binding {}", addr))?;

    let store = MongoStore::connect(&config.mongo_url, &config.database, &config.collection)
        .await
        .context("Connecting to MongoDB")?;

    let state = AppState {
        store: Arc::new(store.clone()),
        renderer: Arc::new(renderer),
        month_filter: config.month_filter,
        site: Arc::new(Site {
            title: config.title.clone(),
            url: config.site_url.clone(),
        }),
    };
    let app = server::router(state, &config.static_directory);

    info!("Listening on {} ({})", addr, config.site_url);
    server::log_routes(&config.static_directory);

    // The pool is released whether serving stopped cleanly or not.
    let served = server::serve(listener, app).await;
    store.shutdown().await;
    served.context("Serving")?;
    info!("Stopped");
    Ok(())
}
