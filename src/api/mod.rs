use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::core::{
    Candidate, CostBreakdown, DecisionPair, ImprovingStep, OptimizationResult, OptimizerConfig,
    PlanOptions, PlanReport, PlannerError, ProjectionReport, RunControl, ScenarioParameters,
    plan_scenario, threshold_sweep,
};

/// Upper bound for one API request when the caller does not pick one.
const API_TIMEOUT_SECS: u64 = 60;

#[derive(Parser, Debug)]
#[command(
    name = "mortgage-planner",
    about = "Rent-vs-buy planner: when to buy a house and how long a mortgage to take"
)]
pub struct Cli {
    #[arg(long, short, global = true, help = "Log debug output to stderr")]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Optimize one scenario and print the plan report as JSON.
    Plan(PlanArgs),
    /// Re-plan with the installment threshold raised step by step.
    Sweep(SweepArgs),
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

/// Scenario and optimizer flags. Rates are monthly fractions, e.g. 0.003.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct PlanArgs {
    #[arg(long, default_value_t = 0.002, help = "Monthly rent growth rate")]
    pub rent_price_growth: f64,
    #[arg(long, default_value_t = 1500.0, help = "Monthly rent today")]
    pub rent_price: f64,
    #[arg(long, default_value_t = 0.003, help = "Monthly house price growth rate")]
    pub house_price_growth: f64,
    #[arg(long, default_value_t = 300000.0, help = "House price today")]
    pub house_price: f64,
    #[arg(long, default_value_t = 0.003, help = "Monthly mortgage interest rate")]
    pub monthly_mortgage_interest: f64,
    #[arg(
        long,
        default_value_t = 2000.0,
        help = "Largest affordable monthly installment"
    )]
    pub installment_threshold: f64,
    #[arg(long, default_value_t = 800.0)]
    pub savings_per_month: f64,
    #[arg(long, default_value_t = 0.005, help = "Monthly return on saved money")]
    pub etf_growth: f64,
    #[arg(long, default_value_t = 5000.0)]
    pub initial_etf_savings: f64,

    #[arg(long, help = "Optimizer seed; random when omitted")]
    pub seed: Option<u64>,
    #[arg(long, help = "Seed for sampling grid candidates; defaults to --seed")]
    pub candidate_seed: Option<u64>,
    #[arg(long, default_value_t = 1000)]
    pub max_generations: u32,
    #[arg(
        long,
        default_value_t = 15,
        help = "Population size multiplier (members = value x dimensions)"
    )]
    pub population_size: usize,
    #[arg(long, help = "Skip the integer neighbourhood descent after the search")]
    pub no_polish: bool,
    #[arg(long, help = "Give up after this many seconds")]
    pub timeout_secs: Option<u64>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct SweepArgs {
    #[command(flatten)]
    pub plan: PlanArgs,
    #[arg(long, default_value_t = 500.0, help = "Threshold increase per scenario")]
    pub step: f64,
    #[arg(long, default_value_t = 3, help = "Number of scenarios")]
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub params: ScenarioParameters,
    pub options: PlanOptions,
}

#[derive(Debug, Clone)]
pub struct SweepRequest {
    pub plan: PlanRequest,
    pub step: f64,
    pub count: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PlanPayload {
    rent_price_growth: Option<f64>,
    rent_price: Option<f64>,
    house_price_growth: Option<f64>,
    house_price: Option<f64>,
    monthly_mortgage_interest: Option<f64>,
    installment_threshold: Option<f64>,
    savings_per_month: Option<f64>,
    etf_growth: Option<f64>,
    initial_etf_savings: Option<f64>,

    seed: Option<u64>,
    candidate_seed: Option<u64>,
    max_generations: Option<u32>,
    population_size: Option<usize>,
    polish: Option<bool>,
    timeout_secs: Option<u64>,

    step: Option<f64>,
    count: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CostMatrixResponse<'a> {
    months: &'a [u32],
    years: &'a [u32],
    /// One row per mortgage term; `null` marks an infeasible cell.
    costs: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse<'a> {
    parameters: &'a ScenarioParameters,
    optimal: DecisionPair,
    optimal_cost: f64,
    breakdown: &'a CostBreakdown,
    optimization: &'a OptimizationResult,
    cost_matrix: CostMatrixResponse<'a>,
    grid_steps: &'a [ImprovingStep],
    optimizer_steps: &'a [ImprovingStep],
    candidates: &'a [Candidate],
    projection: &'a ProjectionReport,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SweepEntry {
    installment_threshold: f64,
    months_to_wait: u32,
    mortgage_years: u32,
    cost: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResponse<'a> {
    step: f64,
    entries: Vec<SweepEntry>,
    plans: Vec<PlanResponse<'a>>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Why a request could not be answered, with the HTTP status it maps to.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<PlannerError> for ApiError {
    fn from(err: PlannerError) -> Self {
        let status = match &err {
            PlannerError::InvalidParameter { .. } | PlannerError::DegenerateRate { .. } => {
                StatusCode::BAD_REQUEST
            }
            PlannerError::NoFeasiblePlan => StatusCode::UNPROCESSABLE_ENTITY,
            PlannerError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            PlannerError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self {
            status,
            message: flag_message(&err),
        }
    }
}

/// Renders parameter errors in terms of the CLI flag that carries them.
fn flag_message(err: &PlannerError) -> String {
    let flag = |name: &str| format!("--{}", name.replace('_', "-"));
    match err {
        PlannerError::InvalidParameter { name, reason } => format!("{} {reason}", flag(name)),
        PlannerError::DegenerateRate { name, value } => {
            format!("{} must be a finite non-zero rate, got {value}", flag(name))
        }
        other => other.to_string(),
    }
}

pub fn build_request(args: PlanArgs) -> Result<PlanRequest, String> {
    if args.max_generations == 0 {
        return Err("--max-generations must be > 0".to_string());
    }
    if args.population_size == 0 {
        return Err("--population-size must be > 0".to_string());
    }
    if args.timeout_secs == Some(0) {
        return Err("--timeout-secs must be > 0".to_string());
    }

    let params = ScenarioParameters {
        rent_price_growth: args.rent_price_growth,
        rent_price: args.rent_price,
        house_price_growth: args.house_price_growth,
        house_price: args.house_price,
        monthly_mortgage_interest: args.monthly_mortgage_interest,
        installment_threshold: args.installment_threshold,
        savings_per_month: args.savings_per_month,
        etf_growth: args.etf_growth,
        initial_etf_savings: args.initial_etf_savings,
    };
    params
        .validate()
        .map_err(|e| flag_message(&e))?;

    let control = match args.timeout_secs {
        Some(secs) => RunControl::unbounded().with_timeout(Duration::from_secs(secs)),
        None => RunControl::unbounded(),
    };
    let options = PlanOptions {
        optimizer: OptimizerConfig {
            population_size: args.population_size,
            max_generations: args.max_generations,
            seed: args.seed,
            polish: !args.no_polish,
            ..OptimizerConfig::default()
        },
        candidate_seed: args.candidate_seed.or(args.seed),
        control,
    };
    Ok(PlanRequest { params, options })
}

pub fn build_sweep_request(args: SweepArgs) -> Result<SweepRequest, String> {
    if !args.step.is_finite() || args.step < 0.0 {
        return Err("--step must be a finite amount >= 0".to_string());
    }
    if args.count == 0 {
        return Err("--count must be > 0".to_string());
    }
    Ok(SweepRequest {
        plan: build_request(args.plan)?,
        step: args.step,
        count: args.count,
    })
}

pub fn plan_response(report: &PlanReport) -> PlanResponse<'_> {
    PlanResponse {
        parameters: &report.parameters,
        optimal: report.optimal,
        optimal_cost: report.optimal_cost,
        breakdown: &report.breakdown,
        optimization: &report.optimization,
        cost_matrix: CostMatrixResponse {
            months: report.grid.months(),
            years: report.grid.years(),
            costs: report.grid.rows(),
        },
        grid_steps: &report.grid_steps,
        optimizer_steps: &report.optimizer_steps,
        candidates: &report.candidates,
        projection: &report.projection,
    }
}

pub fn sweep_response(step: f64, reports: &[PlanReport]) -> SweepResponse<'_> {
    SweepResponse {
        step,
        entries: reports
            .iter()
            .map(|r| SweepEntry {
                installment_threshold: r.parameters.installment_threshold,
                months_to_wait: r.optimal.months_to_wait,
                mortgage_years: r.optimal.mortgage_years,
                cost: r.optimal_cost,
            })
            .collect(),
        plans: reports.iter().map(plan_response).collect(),
    }
}

/// Runs `plan` and returns the report as pretty JSON.
pub fn run_plan_command(args: PlanArgs) -> Result<String, ApiError> {
    let request = build_request(args).map_err(ApiError::bad_request)?;
    let report = plan_scenario(&request.params, &request.options)?;
    to_pretty_json(&plan_response(&report))
}

/// Runs `sweep` and returns the per-threshold plans as pretty JSON.
pub fn run_sweep_command(args: SweepArgs) -> Result<String, ApiError> {
    let request = build_sweep_request(args).map_err(ApiError::bad_request)?;
    let reports = threshold_sweep(
        &request.plan.params,
        request.step,
        request.count,
        &request.plan.options,
    )?;
    to_pretty_json(&sweep_response(request.step, &reports))
}

fn to_pretty_json<T: Serialize>(body: &T) -> Result<String, ApiError> {
    serde_json::to_string_pretty(body).map_err(|e| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: format!("failed to encode response: {e}"),
    })
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "mortgage planner API listening");
    axum::serve(listener, router()).await
}

fn router() -> Router {
    Router::new()
        .route("/api/plan", get(plan_get_handler).post(plan_post_handler))
        .route("/api/sweep", get(sweep_get_handler).post(sweep_post_handler))
        .fallback(not_found_handler)
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn plan_get_handler(Query(payload): Query<PlanPayload>) -> Response {
    plan_handler_impl(payload).await
}

async fn plan_post_handler(Json(payload): Json<PlanPayload>) -> Response {
    plan_handler_impl(payload).await
}

async fn sweep_get_handler(Query(payload): Query<PlanPayload>) -> Response {
    sweep_handler_impl(payload).await
}

async fn sweep_post_handler(Json(payload): Json<PlanPayload>) -> Response {
    sweep_handler_impl(payload).await
}

async fn plan_handler_impl(payload: PlanPayload) -> Response {
    let request = match plan_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let outcome = tokio::task::spawn_blocking(move || {
        plan_scenario(&request.params, &request.options)
            .map(|report| serde_json::to_value(plan_response(&report)))
    })
    .await;
    finish(outcome)
}

async fn sweep_handler_impl(payload: PlanPayload) -> Response {
    let request = match sweep_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let outcome = tokio::task::spawn_blocking(move || {
        threshold_sweep(
            &request.plan.params,
            request.step,
            request.count,
            &request.plan.options,
        )
        .map(|reports| serde_json::to_value(sweep_response(request.step, &reports)))
    })
    .await;
    finish(outcome)
}

fn finish(
    outcome: Result<Result<serde_json::Result<serde_json::Value>, PlannerError>, tokio::task::JoinError>,
) -> Response {
    match outcome {
        Ok(Ok(Ok(body))) => json_response(StatusCode::OK, body),
        Ok(Ok(Err(e))) => {
            error!(error = %e, "failed to encode response");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode response")
        }
        Ok(Err(e)) => {
            let err = ApiError::from(e);
            error_response(err.status, &err.message)
        }
        Err(e) => {
            error!(error = %e, "planner task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "planner task failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn plan_request_from_json(json: &str) -> Result<PlanRequest, String> {
    let payload = serde_json::from_str::<PlanPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    plan_request_from_payload(payload)
}

/// Overlays the payload onto the API defaults.
fn apply_payload(payload: &PlanPayload) -> PlanArgs {
    let mut args = default_cli_for_api();

    if let Some(v) = payload.rent_price_growth {
        args.rent_price_growth = v;
    }
    if let Some(v) = payload.rent_price {
        args.rent_price = v;
    }
    if let Some(v) = payload.house_price_growth {
        args.house_price_growth = v;
    }
    if let Some(v) = payload.house_price {
        args.house_price = v;
    }
    if let Some(v) = payload.monthly_mortgage_interest {
        args.monthly_mortgage_interest = v;
    }
    if let Some(v) = payload.installment_threshold {
        args.installment_threshold = v;
    }
    if let Some(v) = payload.savings_per_month {
        args.savings_per_month = v;
    }
    if let Some(v) = payload.etf_growth {
        args.etf_growth = v;
    }
    if let Some(v) = payload.initial_etf_savings {
        args.initial_etf_savings = v;
    }
    if payload.seed.is_some() {
        args.seed = payload.seed;
    }
    if payload.candidate_seed.is_some() {
        args.candidate_seed = payload.candidate_seed;
    }
    if let Some(v) = payload.max_generations {
        args.max_generations = v;
    }
    if let Some(v) = payload.population_size {
        args.population_size = v;
    }
    if let Some(v) = payload.polish {
        args.no_polish = !v;
    }
    if payload.timeout_secs.is_some() {
        args.timeout_secs = payload.timeout_secs;
    }
    args
}

fn plan_request_from_payload(payload: PlanPayload) -> Result<PlanRequest, String> {
    build_request(apply_payload(&payload)).map_err(camel_case_flags)
}

fn sweep_request_from_payload(payload: PlanPayload) -> Result<SweepRequest, String> {
    let args = SweepArgs {
        plan: apply_payload(&payload),
        step: payload.step.unwrap_or(500.0),
        count: payload.count.unwrap_or(3),
    };
    build_sweep_request(args).map_err(camel_case_flags)
}

/// API callers send camelCase keys, so name those instead of CLI flags.
fn camel_case_flags(msg: String) -> String {
    let Some(rest) = msg.strip_prefix("--") else {
        return msg;
    };
    let (flag, tail) = rest.split_once(' ').unwrap_or((rest, ""));
    let mut key = String::with_capacity(flag.len());
    let mut upper = false;
    for c in flag.chars() {
        if c == '-' {
            upper = true;
        } else if upper {
            key.extend(c.to_uppercase());
            upper = false;
        } else {
            key.push(c);
        }
    }
    if key == "noPolish" {
        key = "polish".to_string();
    }
    if tail.is_empty() {
        key
    } else {
        format!("{key} {tail}")
    }
}

fn default_cli_for_api() -> PlanArgs {
    PlanArgs {
        rent_price_growth: 0.002,
        rent_price: 1_500.0,
        house_price_growth: 0.003,
        house_price: 300_000.0,
        monthly_mortgage_interest: 0.003,
        installment_threshold: 2_000.0,
        savings_per_month: 800.0,
        etf_growth: 0.005,
        initial_etf_savings: 5_000.0,
        seed: Some(42),
        candidate_seed: None,
        max_generations: 1_000,
        population_size: 15,
        no_polish: false,
        timeout_secs: Some(API_TIMEOUT_SECS),
    }
}
