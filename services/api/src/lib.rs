mod cli;
mod commands;
mod infra;
mod routes;
mod server;

use district_score::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
