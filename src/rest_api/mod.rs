//! HTTP listener for metrics scraping
//!
//! Serves the Prometheus registry on `/metrics` and a liveness route on
//! `/healthz`.

mod server;

pub use server::{router, run_server};
