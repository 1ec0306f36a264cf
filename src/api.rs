//! HTTP adapter over the scoring core.

use std::sync::{Arc, Mutex, PoisonError};

use actix_web::http::StatusCode;
use actix_web::{web, App, HttpResponse, HttpServer, ResponseError};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::data::{LabeledRecord, StudentRecord};
use crate::error::RiskError;
use crate::risk::RiskAssessor;
use crate::store::ModelStore;
use crate::training::{TrainingPipeline, TrainingReport};

/// Shared by every worker.
pub struct AppState {
    pub assessor: RiskAssessor,
    pub pipeline: TrainingPipeline,
    pub store: Option<ModelStore>,
    /// Held from training through install so stored and served versions agree.
    retrain_lock: Mutex<()>,
}

impl AppState {
    pub fn new(assessor: RiskAssessor, pipeline: TrainingPipeline, store: Option<ModelStore>) -> Self {
        Self {
            assessor,
            pipeline,
            store,
            retrain_lock: Mutex::new(()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error("background task failed: {0}")]
    Blocking(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Risk(e) if e.is_schema() => StatusCode::BAD_REQUEST,
            ApiError::Risk(RiskError::InsufficientData { .. } | RiskError::Training { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({ "error": self.to_string() }))
    }
}

#[derive(Debug, Deserialize)]
pub struct ModelQuery {
    pub model: Option<String>,
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().body("Dropout risk scoring API is running!")
}

async fn assess(
    state: web::Data<AppState>,
    query: web::Query<ModelQuery>,
    web::Json(record): web::Json<StudentRecord>,
) -> Result<HttpResponse, ApiError> {
    let assessment = state.assessor.assess_record(record, query.model.as_deref())?;
    Ok(HttpResponse::Ok().json(assessment))
}

async fn assess_batch(
    state: web::Data<AppState>,
    query: web::Query<ModelQuery>,
    web::Json(records): web::Json<Vec<StudentRecord>>,
) -> Result<HttpResponse, ApiError> {
    let model = query.into_inner().model;
    let batch = web::block(move || state.assessor.assess_batch(records, model.as_deref()))
        .await
        .map_err(|e| ApiError::Blocking(e.to_string()))?;
    Ok(HttpResponse::Ok().json(batch))
}

async fn model_info(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.assessor.ensemble().info())
}

async fn train(
    state: web::Data<AppState>,
    web::Json(records): web::Json<Vec<LabeledRecord>>,
) -> Result<HttpResponse, ApiError> {
    info!(rows = records.len(), "training requested");
    let report = web::block(move || retrain_and_persist(&state, records))
        .await
        .map_err(|e| ApiError::Blocking(e.to_string()))??;
    Ok(HttpResponse::Ok().json(report))
}

/// The set is stored before it is installed; a failed save leaves the served models untouched.
fn retrain_and_persist(state: &AppState, records: Vec<LabeledRecord>) -> Result<TrainingReport, RiskError> {
    let ensemble = state.assessor.ensemble();
    let Some(store) = &state.store else {
        return state.pipeline.retrain_records(ensemble, records);
    };

    let _guard = state.retrain_lock.lock().unwrap_or_else(PoisonError::into_inner);
    let (mut set, rejected) = state.pipeline.train_records(records).map_err(|e| {
        warn!(error = %e, active = ?ensemble.version(), "training failed, keeping active models");
        e
    })?;
    set.version = ensemble.next_version();
    store.save(&set).map_err(|e| {
        warn!(error = %e, version = set.version, "could not store model set, keeping active models");
        e
    })?;

    let mut report = TrainingReport::new(&set, rejected);
    report.version = ensemble.install(set);
    Ok(report)
}

/// Training uploads carry whole cohorts.
const JSON_LIMIT: usize = 16 * 1024 * 1024;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().limit(JSON_LIMIT))
        .route("/health", web::get().to(health_check))
        .route("/assess", web::post().to(assess))
        .route("/assess/batch", web::post().to(assess_batch))
        .route("/model/info", web::get().to(model_info))
        .route("/model/train", web::post().to(train));
}

pub async fn start_api(state: Arc<AppState>, bind: &str) -> std::io::Result<()> {
    let data = web::Data::from(state);
    info!(bind, "starting dropout risk API");
    HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
        .bind(bind)?
        .run()
        .await
}
