use axum::{
    Router,
    extract::{Json, Query},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::core::{
    LifecycleSolution, MAX_QUADRATURE_NODES, NelderMeadOptions, Params, ScheduleSpec, SimulationConfig,
    SimulationYearResult, SolveDiagnostics, SolverOptions, log_spaced_grid, simulate_policy, solve,
};

const DEFAULT_API_SIMULATION_PATHS: u32 = 1_000;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SolvePayload {
    start_age: Option<u32>,
    end_age: Option<u32>,
    retirement_age: Option<u32>,

    discount: Option<f64>,
    eis: Option<f64>,
    risk_aversion: Option<f64>,
    equity_floor: Option<f64>,

    risk_free_return: Option<f64>,
    risky_mean_return: Option<f64>,
    risky_variance: Option<f64>,

    income: Option<f64>,
    retirement_income: Option<f64>,
    survival: Option<f64>,

    grid_min_log: Option<f64>,
    grid_max_log: Option<f64>,
    grid_points: Option<usize>,
    quadrature_nodes: Option<usize>,
    max_iterations: Option<usize>,
    max_restarts: Option<usize>,

    paths: Option<u32>,
    initial_wealth: Option<f64>,
    seed: Option<u64>,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "lifecycle",
    about = "Lifecycle consumption and portfolio policy under Epstein-Zin preferences"
)]
struct Cli {
    #[arg(
        long,
        help = "JSON file with a complete parameter set; replaces the model flags"
    )]
    params: Option<PathBuf>,
    #[arg(long, default_value_t = 20)]
    start_age: u32,
    #[arg(
        long,
        default_value_t = 115,
        help = "Last age; everything is consumed here"
    )]
    end_age: u32,
    #[arg(
        long,
        default_value_t = 70,
        help = "First age paid the retirement income"
    )]
    retirement_age: u32,
    #[arg(long, default_value_t = 0.96, help = "Time discount factor, in (0, 1)")]
    discount: f64,
    #[arg(
        long,
        default_value_t = 0.1,
        help = "Elasticity of intertemporal substitution, must differ from 1"
    )]
    eis: f64,
    #[arg(
        long,
        default_value_t = 10.0,
        help = "Relative risk aversion, must differ from 1"
    )]
    risk_aversion: f64,
    #[arg(long, default_value_t = 0.2, help = "Minimum equity share of savings")]
    equity_floor: f64,
    #[arg(long, default_value_t = 0.1, help = "Risk-free log return per period")]
    risk_free_return: f64,
    #[arg(long, default_value_t = 0.05, help = "Mean risky log return per period")]
    risky_mean_return: f64,
    #[arg(long, default_value_t = 0.04, help = "Variance of the risky log return")]
    risky_variance: f64,
    #[arg(long, default_value_t = 1.0, help = "Income per period while working")]
    income: f64,
    #[arg(
        long,
        help = "Income per period from --retirement-age on, defaults to --income"
    )]
    retirement_income: Option<f64>,
    #[arg(long, default_value_t = 0.99, help = "Survival probability per period")]
    survival: f64,
    #[arg(
        long,
        default_value_t = -3.0,
        allow_negative_numbers = true,
        help = "Log of the smallest grid wealth"
    )]
    grid_min_log: f64,
    #[arg(
        long,
        default_value_t = 3.0,
        allow_negative_numbers = true,
        help = "Log of the largest grid wealth"
    )]
    grid_max_log: f64,
    #[arg(long, default_value_t = 10)]
    grid_points: usize,
    #[arg(
        long,
        default_value_t = 9,
        help = "Gauss-Hermite nodes for the return expectation"
    )]
    quadrature_nodes: usize,
    #[arg(long, default_value_t = 400, help = "Nelder-Mead iterations per run")]
    max_iterations: usize,
    #[arg(long, default_value_t = 3, help = "Nelder-Mead restarts after convergence")]
    max_restarts: usize,
    #[arg(long, help = "Solve wealth cells one at a time")]
    sequential: bool,
    #[arg(
        long,
        default_value_t = 0,
        help = "Simulate the solved policy over this many paths (0 = skip)"
    )]
    simulate_paths: u32,
    #[arg(
        long,
        default_value_t = 1.0,
        help = "Wealth at --start-age for the simulation"
    )]
    initial_wealth: f64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, help = "Pretty-print the JSON output")]
    pretty: bool,
}

#[derive(Debug, Clone)]
struct ApiRequest {
    params: Params,
    options: SolverOptions,
    simulation: Option<SimulationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SolveResponse {
    params: Params,
    solution: LifecycleSolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    simulation: Option<SimulationBlock>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulationBlock {
    initial_wealth: f64,
    paths: u32,
    seed: u64,
    years: Vec<SimulationYearResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    diagnostics: SolveDiagnostics,
    simulation: SimulationBlock,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_params(cli: &Cli) -> Result<Params, String> {
    if let Some(path) = &cli.params {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("--params: cannot read {}: {e}", path.display()))?;
        let params = serde_json::from_str::<Params>(&raw)
            .map_err(|e| format!("--params: invalid JSON in {}: {e}", path.display()))?;
        params.validate().map_err(|e| format!("--params: {e}"))?;
        return Ok(params);
    }

    if cli.end_age <= cli.start_age {
        return Err("--end-age must be > --start-age".to_string());
    }

    if cli.retirement_age < cli.start_age {
        return Err("--retirement-age must be >= --start-age".to_string());
    }

    if !(0.0..1.0).contains(&cli.discount) || cli.discount == 0.0 {
        return Err("--discount must be strictly between 0 and 1".to_string());
    }

    if cli.eis <= 0.0 || (cli.eis - 1.0).abs() < 1e-9 {
        return Err("--eis must be > 0 and differ from 1".to_string());
    }

    if cli.risk_aversion <= 0.0 || (cli.risk_aversion - 1.0).abs() < 1e-9 {
        return Err("--risk-aversion must be > 0 and differ from 1".to_string());
    }

    if !(0.0..=1.0).contains(&cli.equity_floor) {
        return Err("--equity-floor must be between 0 and 1".to_string());
    }

    if !(0.0..=1.0).contains(&cli.survival) {
        return Err("--survival must be between 0 and 1".to_string());
    }

    if cli.risky_variance < 0.0 {
        return Err("--risky-variance must be >= 0".to_string());
    }

    let retirement_income = cli.retirement_income.unwrap_or(cli.income);
    if cli.income < 0.0 || retirement_income < 0.0 {
        return Err("--income and --retirement-income must be >= 0".to_string());
    }

    if cli.grid_points < 2 {
        return Err("--grid-points must be >= 2".to_string());
    }

    if cli.grid_max_log <= cli.grid_min_log {
        return Err("--grid-max-log must be > --grid-min-log".to_string());
    }

    if !(1..=MAX_QUADRATURE_NODES).contains(&cli.quadrature_nodes) {
        return Err(format!(
            "--quadrature-nodes must be between 1 and {MAX_QUADRATURE_NODES}"
        ));
    }

    if cli.max_iterations == 0 {
        return Err("--max-iterations must be > 0".to_string());
    }

    let (income, survival) = ScheduleSpec {
        working_income: cli.income,
        retirement_income,
        survival: cli.survival,
    }
    .build(cli.start_age, cli.end_age, cli.retirement_age);

    let params = Params {
        start_age: cli.start_age,
        end_age: cli.end_age,
        retirement_age: cli.retirement_age,
        discount: cli.discount,
        eis: cli.eis,
        risk_aversion: cli.risk_aversion,
        equity_floor: cli.equity_floor,
        risk_free_return: cli.risk_free_return,
        risky_mean_return: cli.risky_mean_return,
        risky_variance: cli.risky_variance,
        income,
        survival,
        wealth_grid: log_spaced_grid(cli.grid_min_log, cli.grid_max_log, cli.grid_points),
        quadrature_nodes: cli.quadrature_nodes,
    };
    params.validate().map_err(|e| e.to_string())?;
    Ok(params)
}

fn build_solver_options(cli: &Cli) -> SolverOptions {
    SolverOptions {
        nelder_mead: NelderMeadOptions {
            max_iterations: cli.max_iterations,
            max_restarts: cli.max_restarts,
            ..NelderMeadOptions::default()
        },
        parallel: !cli.sequential,
        ..SolverOptions::default()
    }
}

fn build_simulation_config(cli: &Cli, paths: u32) -> Result<SimulationConfig, String> {
    if !cli.initial_wealth.is_finite() || cli.initial_wealth < 0.0 {
        return Err("--initial-wealth must be >= 0".to_string());
    }
    Ok(SimulationConfig {
        initial_wealth: cli.initial_wealth,
        paths,
        seed: cli.seed,
    })
}

fn api_request_from_cli(cli: &Cli) -> Result<ApiRequest, String> {
    let params = build_params(cli)?;
    let simulation = match cli.simulate_paths {
        0 => None,
        paths => Some(build_simulation_config(cli, paths)?),
    };
    Ok(ApiRequest {
        params,
        options: build_solver_options(cli),
        simulation,
    })
}

fn run_solve(request: &ApiRequest) -> Result<SolveResponse, String> {
    let solution = solve(&request.params, &request.options).map_err(|e| e.to_string())?;
    let simulation = match &request.simulation {
        Some(config) => Some(run_simulation(&request.params, &solution, config)?),
        None => None,
    };
    Ok(SolveResponse {
        params: request.params.clone(),
        solution,
        simulation,
    })
}

fn run_simulation(
    params: &Params,
    solution: &LifecycleSolution,
    config: &SimulationConfig,
) -> Result<SimulationBlock, String> {
    let years = simulate_policy(params, solution, config).map_err(|e| e.to_string())?;
    Ok(SimulationBlock {
        initial_wealth: config.initial_wealth,
        paths: config.paths,
        seed: config.seed,
        years,
    })
}

pub fn run_cli<I, T>(args: I) -> Result<String, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    let request = api_request_from_cli(&cli)?;
    let response = run_solve(&request)?;
    let json = if cli.pretty {
        serde_json::to_string_pretty(&response)
    } else {
        serde_json::to_string(&response)
    };
    json.map_err(|e| format!("cannot serialize solution: {e}"))
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/solve", get(solve_get_handler).post(solve_post_handler))
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "lifecycle HTTP API listening");
    info!("local access: http://127.0.0.1:{port}/api/health");

    axum::serve(listener, app).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn solve_get_handler(Query(payload): Query<SolvePayload>) -> Response {
    solve_handler_impl(payload).await
}

async fn solve_post_handler(Json(payload): Json<SolvePayload>) -> Response {
    solve_handler_impl(payload).await
}

async fn simulate_get_handler(Query(payload): Query<SolvePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_post_handler(Json(payload): Json<SolvePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn solve_handler_impl(payload: SolvePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match tokio::task::spawn_blocking(move || run_solve(&request)).await {
        Ok(Ok(response)) => json_response(StatusCode::OK, response),
        Ok(Err(msg)) => error_response(StatusCode::UNPROCESSABLE_ENTITY, &msg),
        Err(e) => {
            error!(error = %e, "solve task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "solve task failed")
        }
    }
}

async fn simulate_handler_impl(mut payload: SolvePayload) -> Response {
    payload.paths.get_or_insert(DEFAULT_API_SIMULATION_PATHS);
    let mut request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let Some(config) = request.simulation.take() else {
        return error_response(StatusCode::BAD_REQUEST, "paths must be > 0");
    };

    let task = move || -> Result<SimulateResponse, String> {
        let solution = solve(&request.params, &request.options).map_err(|e| e.to_string())?;
        let simulation = run_simulation(&request.params, &solution, &config)?;
        Ok(SimulateResponse {
            diagnostics: solution.diagnostics,
            simulation,
        })
    };

    match tokio::task::spawn_blocking(task).await {
        Ok(Ok(response)) => json_response(StatusCode::OK, response),
        Ok(Err(msg)) => error_response(StatusCode::UNPROCESSABLE_ENTITY, &msg),
        Err(e) => {
            error!(error = %e, "simulate task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "simulate task failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
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
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<SolvePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

/// Applies payload overrides to the API defaults. A simulation is attached
/// only when `paths` is set and non-zero.
fn api_request_from_payload(payload: SolvePayload) -> Result<ApiRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.start_age {
        cli.start_age = v;
    }
    if let Some(v) = payload.end_age {
        cli.end_age = v;
    }
    if let Some(v) = payload.retirement_age {
        cli.retirement_age = v;
    }
    if let Some(v) = payload.discount {
        cli.discount = v;
    }
    if let Some(v) = payload.eis {
        cli.eis = v;
    }
    if let Some(v) = payload.risk_aversion {
        cli.risk_aversion = v;
    }
    if let Some(v) = payload.equity_floor {
        cli.equity_floor = v;
    }
    if let Some(v) = payload.risk_free_return {
        cli.risk_free_return = v;
    }
    if let Some(v) = payload.risky_mean_return {
        cli.risky_mean_return = v;
    }
    if let Some(v) = payload.risky_variance {
        cli.risky_variance = v;
    }
    if let Some(v) = payload.income {
        cli.income = v;
    }
    if let Some(v) = payload.retirement_income {
        cli.retirement_income = Some(v);
    }
    if let Some(v) = payload.survival {
        cli.survival = v;
    }
    if let Some(v) = payload.grid_min_log {
        cli.grid_min_log = v;
    }
    if let Some(v) = payload.grid_max_log {
        cli.grid_max_log = v;
    }
    if let Some(v) = payload.grid_points {
        cli.grid_points = v;
    }
    if let Some(v) = payload.quadrature_nodes {
        cli.quadrature_nodes = v;
    }
    if let Some(v) = payload.max_iterations {
        cli.max_iterations = v;
    }
    if let Some(v) = payload.max_restarts {
        cli.max_restarts = v;
    }
    if let Some(v) = payload.initial_wealth {
        cli.initial_wealth = v;
    }
    if let Some(v) = payload.seed {
        cli.seed = v;
    }

    let params = build_params(&cli).map_err(api_flag_names)?;
    let simulation = match payload.paths {
        None | Some(0) => None,
        Some(paths) => Some(build_simulation_config(&cli, paths).map_err(api_flag_names)?),
    };

    Ok(ApiRequest {
        params,
        options: build_solver_options(&cli),
        simulation,
    })
}

fn api_flag_names(msg: String) -> String {
    let mut out = String::with_capacity(msg.len());
    let mut rest = msg.as_str();
    while let Some(pos) = rest.find("--") {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 2..];
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .unwrap_or(rest.len());
        let mut upper = false;
        for c in rest[..end].chars() {
            if c == '-' {
                upper = true;
            } else if upper {
                out.push(c.to_ascii_uppercase());
                upper = false;
            } else {
                out.push(c);
            }
        }
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}

fn default_cli_for_api() -> Cli {
    Cli {
        params: None,
        start_age: 20,
        end_age: 115,
        retirement_age: 70,
        discount: 0.96,
        eis: 0.1,
        risk_aversion: 10.0,
        equity_floor: 0.2,
        risk_free_return: 0.1,
        risky_mean_return: 0.05,
        risky_variance: 0.04,
        income: 1.0,
        retirement_income: None,
        survival: 0.99,
        grid_min_log: -3.0,
        grid_max_log: 3.0,
        grid_points: 10,
        quadrature_nodes: 9,
        max_iterations: 400,
        max_restarts: 3,
        sequential: false,
        simulate_paths: 0,
        initial_wealth: 1.0,
        seed: 42,
        pretty: false,
    }
}
