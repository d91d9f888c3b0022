/*  Copyright 2022-23, Juspay India Pvt Ltd
    This program is free software: you can redistribute it and/or modify it under the terms of the GNU Affero General Public License
    as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version. This program
    is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
    or FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more details. You should have received a copy of
    the GNU Affero General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.
*/
#![allow(clippy::expect_used)]

use actix_web_prom::{PrometheusMetrics, PrometheusMetricsBuilder};
use prometheus::{opts, register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

pub static TRANSACTION_DURATION: once_cell::sync::Lazy<HistogramVec> =
    once_cell::sync::Lazy::new(|| {
        register_histogram_vec!(
            opts!("transaction_duration_seconds", "Finished web transactions").into(),
            &["transaction", "status_code", "apdex_zone", "version"]
        )
        .expect("Failed to register transaction duration metrics")
    });

pub static TRANSACTION_ERRORS: once_cell::sync::Lazy<IntCounterVec> =
    once_cell::sync::Lazy::new(|| {
        register_int_counter_vec!(
            opts!("transaction_errors_total", "Errors recorded on web transactions"),
            &["transaction", "class"]
        )
        .expect("Failed to register transaction error metrics")
    });

/// Macro that observes the duration of a finished transaction.
///
/// # Arguments
///
/// * `$name` - The transaction name (e.g. `GET /users/{id}`).
/// * `$status` - The response status code.
/// * `$zone` - The apdex zone (`S`, `T` or `F`).
/// * `$duration` - The `Duration` the transaction took.
#[macro_export]
macro_rules! observe_transaction {
    ($name:expr, $status:expr, $zone:expr, $duration:expr) => {
        let version = std::env::var("DEPLOYMENT_VERSION").unwrap_or("DEV".to_string());
        TRANSACTION_DURATION
            .with_label_values(&[$name, $status, $zone, version.as_str()])
            .observe($duration.as_secs_f64());
    };
}

/// Initializes and returns a `PrometheusMetrics` instance exposing the transaction metrics.
///
/// # Examples
///
/// ```norun
/// fn main() {
///     HttpServer::new(move || {
///         App::new()
///             .wrap(init_prometheus_metrics())
///     })
///     .bind("127.0.0.1:8080").unwrap()
///     .run();
/// }
/// ```
///
/// # Panics
///
/// * If the metrics cannot be created or registered with the Prometheus registry.
pub fn init_prometheus_metrics() -> PrometheusMetrics {
    let prometheus = PrometheusMetricsBuilder::new("api")
        .endpoint("/metrics")
        .build()
        .expect("Failed to create Prometheus Metrics");

    prometheus
        .registry
        .register(Box::new(TRANSACTION_DURATION.to_owned()))
        .expect("Failed to register transaction duration metrics");

    prometheus
        .registry
        .register(Box::new(TRANSACTION_ERRORS.to_owned()))
        .expect("Failed to register transaction error metrics");

    prometheus
}
