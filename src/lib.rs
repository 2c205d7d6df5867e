//! The library code for the `gazette` blog server. A request goes through
//! three steps:
//!
//! 1. Turning request parameters into a database query ([`crate::query`])
//! 2. Running the query against the article collection ([`crate::store`])
//! 3. Rendering the articles through the site's templates ([`crate::render`])
//!
//! The first step is where the listing rules live: archived and highlighted
//! articles never appear in the chronological listing, pages hold 13
//! articles, and the month filter is a configurable strategy because article
//! dates are stored as display strings rather than real dates.
//!
//! The HTTP routes that tie the steps together are in [`crate::server`].

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

pub mod article;
pub mod config;
pub mod feed;
pub mod query;
pub mod render;
pub mod server;
pub mod store;
mod util;
mod value;
