//! Backing checkout HTTP entrypoint.
//!
//! Endpoints, nested under the configured base path (`/api` by default):
//! - `POST /checkout` - record a bank transfer or a settled JPYC backing
//! - `POST /checkout/paypal-confirm` - capture an approved PayPal order and record it
//! - `POST /jpyc/execute` - relay a signed JPYC permit and pull the tokens
//! - `GET /rewards` - the reward catalog
//! - `GET /dashboard` - campaign progress
//! - `GET /bank-details` - the transfer destination
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` points at the JSON configuration file
//! - `HOST`, `PORT` control the binding address
//! - `OTEL_*` variables enable trace and metric export (`telemetry` feature)

mod config;
mod run;

use std::process;

use crate::run::run;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1)
    }
}
