//! `domgate init-db`: create the database file and apply the schema.

use domgate_config::AppConfig;
use domgate_store::Database;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    Database::connect(&config.database.url, 1).await?;
    println!("Database ready at {}", config.database.url);
    Ok(())
}
