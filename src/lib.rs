mod model;
mod ort_model;
mod predictor;
mod preprocess;
mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod config;

pub use app::start_app;
