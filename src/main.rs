//! Traffic Filter Service
//!
//! This is the main entry point for the traffic filter service.
//! It loads the filter document, starts the accounting ticks and serves
//! the report feed.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use log::info;
use metrics_exporter_prometheus::PrometheusBuilder;

use traffic_filter_service::api::{self, ApiState};
use traffic_filter_service::config::{build_filterset, load_config};
use traffic_filter_service::core::{
    AccountingEngine, CalendarWindow, CounterFragmentFormatter, EngineSettings, FlagFileWriter,
};
use traffic_filter_service::utils::ensure_flag_folder;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting Traffic Filter Service...");

    let config = load_config()?;

    let metrics = if config.metrics.enabled {
        Some(PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };

    let flag_folder = ensure_flag_folder(&config.accounting.flag_folder)?;

    let filterset = build_filterset(&config)?;
    info!(
        "Loaded {} filters and {} users from {} (process rules: {}, shaping: {})",
        filterset.filters().len(),
        filterset.users().len(),
        config.accounting.filters_file,
        filterset.is_process_used(),
        filterset.is_shaper_used()
    );

    let engine = Arc::new(AccountingEngine::new(
        filterset,
        Box::new(CalendarWindow),
        Box::new(FlagFileWriter::new(flag_folder)),
        Box::new(CounterFragmentFormatter),
        EngineSettings {
            keep_history: config.accounting.keep_history,
            item_budget: config.report.item_budget,
        },
    ));

    actix_rt::spawn(
        engine
            .clone()
            .run(Duration::from_secs(config.accounting.tick_seconds.max(1))),
    );

    let bind_addr = (config.server.host.clone(), config.server.port);
    let state = web::Data::new(ApiState {
        engine,
        metrics,
        config,
    });

    // Start HTTP server
    HttpServer::new(move || App::new().app_data(state.clone()).configure(api::config))
        .bind(bind_addr)?
        .run()
        .await?;

    Ok(())
}
