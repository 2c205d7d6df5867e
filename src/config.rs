//! Startup configuration. The port and database URL come from the command
//! line or the environment, falling back to an env file; everything about the
//! site itself comes from an optional YAML project file.

use crate::query::MonthFilter;
use crate::util::{self, FileError};
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Command-line arguments. Each option can also be set from the environment.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "gazette")]
#[command(about = "Serves a blog from a MongoDB article collection")]
pub struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<String>,

    /// MongoDB connection string
    #[arg(long, env = "MONGO_URL")]
    pub mongo_url: Option<String>,

    /// File consulted for PORT and MONGO_URL when they aren't set
    #[arg(long, default_value = ".env")]
    pub env_file: PathBuf,

    /// Project file with site settings
    #[arg(long, default_value = "gazette.yaml")]
    pub project: PathBuf,

    /// Log level for the gazette target
    #[arg(long, env = "GAZETTE_LOG", default_value = "info")]
    pub log_level: String,
}

#[derive(Deserialize)]
#[serde(default)]
struct Project {
    site_url: Option<Url>,
    title: String,
    database: String,
    collection: String,
    templates_directory: PathBuf,
    static_directory: PathBuf,
    month_filter: MonthFilter,
}

impl Default for Project {
    fn default() -> Self {
        Project {
            site_url: None,
            title: "gazette".to_owned(),
            database: "test".to_owned(),
            collection: "articles".to_owned(),
            templates_directory: PathBuf::from("templates"),
            static_directory: PathBuf::from("static"),
            month_filter: MonthFilter::default(),
        }
    }
}

/// The resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub mongo_url: String,

    /// The public base URL, always ending in `/`.
    pub site_url: Url,
    pub title: String,
    pub database: String,
    pub collection: String,
    pub templates_directory: PathBuf,
    pub static_directory: PathBuf,
    pub month_filter: MonthFilter,
}

impl Config {
    /// Resolves the configuration from parsed arguments. A missing env file
    /// or project file is not an error; a missing `PORT` or `MONGO_URL` is.
    pub fn load(args: &Args) -> Result<Config> {
        let file_vars = read_env_file(&args.env_file)?;
        let port = resolve_var("PORT", args.port.as_deref(), &file_vars)?;
        let port: u16 = port.parse().map_err(|_| Error::InvalidVar {
            name: "PORT",
            value: port.clone(),
        })?;
        let mongo_url = resolve_var("MONGO_URL", args.mongo_url.as_deref(), &file_vars)?;

        let project = read_project(&args.project)?;
        let root = match args.project.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_owned(),
            _ => PathBuf::from("."),
        };
        let site_url = match project.site_url {
            Some(url) => url,
            None => Url::parse(&format!("http://localhost:{}/", port))
                .map_err(|err| Error::InvalidVar {
                    name: "site_url",
                    value: err.to_string(),
                })?,
        };

        Ok(Config {
            port,
            mongo_url,
            site_url: with_trailing_slash(site_url),
            title: project.title,
            database: project.database,
            collection: project.collection,
            templates_directory: root.join(project.templates_directory),
            static_directory: root.join(project.static_directory),
            month_filter: project.month_filter,
        })
    }
}

/// Returns the argument value (which clap has already taken from the process
/// environment if set there) or else the env file's value. Empty values
/// count as absent.
fn resolve_var(
    name: &'static str,
    value: Option<&str>,
    file_vars: &HashMap<String, String>,
) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .or_else(|| file_vars.get(name).map(String::as_str))
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .ok_or(Error::MissingVar(name))
}

/// Reads the env file without touching the process environment.
fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let iter = match dotenvy::from_filename_iter(path) {
        Ok(iter) => iter,
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(HashMap::new())
        }
        Err(err) => {
            return Err(Error::EnvFile {
                path: path.to_owned(),
                err,
            })
        }
    };
    iter.collect::<std::result::Result<_, _>>()
        .map_err(|err| Error::EnvFile {
            path: path.to_owned(),
            err,
        })
}

fn read_project(path: &Path) -> Result<Project> {
    match util::read_to_string(path, "project") {
        Ok(source) => Ok(serde_yaml::from_str(&source)?),
        Err(err) if err.is_not_found() => Ok(Project::default()),
        Err(err) => Err(Error::Io(err)),
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// The result of resolving configuration.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a configuration problem. All of these are fatal at startup.
#[derive(Debug)]
pub enum Error {
    /// Returned when a required variable is set nowhere.
    MissingVar(&'static str),

    /// Returned when a variable is set to something unusable.
    InvalidVar { name: &'static str, value: String },

    /// Returned when the env file exists but can't be read or parsed.
    EnvFile { path: PathBuf, err: dotenvy::Error },

    /// Returned when the project file isn't valid YAML for a project.
    Project(serde_yaml::Error),

    /// Returned when the project file exists but can't be read.
    Io(FileError),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::MissingVar(name) => write!(
                f,
                "{} must be set on the command line, in the environment, or in the env file",
                name
            ),
            Error::InvalidVar { name, value } => {
                write!(f, "invalid value for {}: {:?}", name, value)
            }
            Error::EnvFile { path, err } => {
                write!(f, "reading env file `{}`: {}", path.display(), err)
            }
            Error::Project(err) => write!(f, "parsing project file: {}", err),
            Error::Io(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::MissingVar(_) => None,
            Error::InvalidVar { .. } => None,
            Error::EnvFile { err, .. } => Some(err),
            Error::Project(err) => Some(err),
            Error::Io(err) => Some(err),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    /// Converts a [`serde_yaml::Error`] into an [`Error`]. This allows us to
    /// use the `?` operator when parsing the project file.
    fn from(err: serde_yaml::Error) -> Error {
        Error::Project(err)
    }
}
