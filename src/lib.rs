//! Market-floor estimation and hot-deal scanning for second-hand laptop listings.
//!
//! `build` prices every configured target into the price database, `scan`
//! watches a search page for listings priced at or below that floor, and
//! `serve` exposes the database over HTTP.

pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod estimate;
pub mod extract;
pub mod fetch;
pub mod matcher;
pub mod notify;
pub mod pager;
pub mod runner;
pub mod server;
pub mod store;
