//! API endpoints for the traffic filter service.
//!
//! This module provides the HTTP report feed (per-user reports, the users
//! affected by a filter, the metrics scrape) and the control endpoints used
//! by the capture side and the administrator: accounting ingest, counter
//! reset, configuration reload and address table removal.

use std::net::Ipv4Addr;
use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use log::{error, warn};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use crate::config::build_filterset;
use crate::core::rule::{FlowInfo, ProcessInfo};
use crate::core::AccountingEngine;
use crate::models::Config;

pub struct ApiState {
    pub engine: Arc<AccountingEngine>,
    pub metrics: Option<PrometheusHandle>,
    pub config: Config,
}

/// API configuration function for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/health").route(web::get().to(health_check)))
            .service(web::resource("/users/{id}/report").route(web::get().to(user_report)))
            .service(web::resource("/filters/{id}/users").route(web::get().to(filter_users)))
            .service(web::resource("/accounting").route(web::post().to(account_flow)))
            .service(web::resource("/counters/reset").route(web::post().to(reset_counters)))
            .service(web::resource("/reload").route(web::post().to(reload)))
            .service(web::resource("/addr-tables/{key}").route(web::delete().to(remove_addr_table))),
    )
    .service(web::resource("/metrics").route(web::get().to(render_metrics)));
}

/// Health check endpoint response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    generation: u64,
}

/// Affected user entry
#[derive(Serialize)]
struct FilterUser {
    id: u32,
    name: String,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

/// Bytes observed on one flow
#[derive(Debug, Deserialize)]
struct AccountingRecord {
    src: Ipv4Addr,
    dst: Ipv4Addr,
    #[serde(default)]
    process: Option<ProcessInfo>,
    bytes: u64,
}

/// Filters that accounted a flow
#[derive(Serialize)]
struct AccountingResponse {
    matched: Vec<u32>,
}

/// Reload result
#[derive(Serialize)]
struct ReloadResponse {
    generation: u64,
    filters: usize,
}

/// Health check endpoint
async fn health_check(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        generation: state.engine.generation(),
    })
}

/// Report of the filters visible to a user
async fn user_report(state: web::Data<ApiState>, path: web::Path<u32>) -> impl Responder {
    let user_id = path.into_inner();
    match state.engine.user_report(user_id, Utc::now()).await {
        Some(report) => HttpResponse::Ok().json(report),
        None => HttpResponse::NotFound().json(ErrorResponse {
            message: format!("Unknown user {}", user_id),
        }),
    }
}

/// Users whose filter list contains a filter
async fn filter_users(state: web::Data<ApiState>, path: web::Path<u32>) -> impl Responder {
    let users: Vec<FilterUser> = state
        .engine
        .users_for_filter(path.into_inner())
        .await
        .into_iter()
        .map(|(id, name)| FilterUser { id, name })
        .collect();
    HttpResponse::Ok().json(users)
}

/// Account the bytes of one flow against the live generation
async fn account_flow(
    state: web::Data<ApiState>,
    record: web::Json<AccountingRecord>,
) -> impl Responder {
    let record = record.into_inner();
    let flow = FlowInfo {
        src: record.src,
        dst: record.dst,
        process: record.process,
    };
    let matched = state.engine.account(&flow, record.bytes).await;
    HttpResponse::Ok().json(AccountingResponse { matched })
}

/// Re-read the filter document and swap in the new generation
async fn reload(state: web::Data<ApiState>) -> impl Responder {
    let config = state.config.clone();
    let loaded = web::block(move || build_filterset(&config)).await;

    match loaded {
        Ok(Ok(filterset)) => {
            let filters = filterset.filters().len();
            let generation = state.engine.reload(filterset).await;
            HttpResponse::Ok().json(ReloadResponse {
                generation,
                filters,
            })
        }
        Ok(Err(e)) => {
            warn!("Reload rejected: {}", e);
            HttpResponse::UnprocessableEntity().json(ErrorResponse {
                message: e.to_string(),
            })
        }
        Err(e) => {
            error!("Reload task failed: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Remove an address table that no rule refers to
async fn remove_addr_table(state: web::Data<ApiState>, path: web::Path<u32>) -> impl Responder {
    let key = path.into_inner();
    match state.engine.remove_addr_table(key).await {
        Ok(true) => HttpResponse::NoContent().finish(),
        Ok(false) => HttpResponse::NotFound().json(ErrorResponse {
            message: format!("Unknown address table {}", key),
        }),
        Err(e) => HttpResponse::Conflict().json(ErrorResponse {
            message: e.to_string(),
        }),
    }
}

/// Manual reset of every filter's counters
async fn reset_counters(state: web::Data<ApiState>) -> impl Responder {
    state.engine.reset_all_counters().await;
    HttpResponse::NoContent().finish()
}

/// Prometheus scrape endpoint
async fn render_metrics(state: web::Data<ApiState>) -> impl Responder {
    match &state.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}
