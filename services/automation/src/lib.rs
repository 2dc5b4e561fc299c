mod cli;
mod demo;
mod infra;

use leadflow::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
