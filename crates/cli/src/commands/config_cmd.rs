//! `domgate config`: configuration management commands.

use domgate_config::AppConfig;

pub fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed successfully");

    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set DOMGATE_API_KEY or OPENAI_API_KEY)");
    }
    if config.auth.dev_auth_enabled {
        warnings.push("Local session mode is enabled; do not expose this deployment");
    }
    if config.gateway.host == "0.0.0.0" && config.gateway.allowed_origins.is_empty() {
        warnings.push("Gateway bound to 0.0.0.0 with no allowed CORS origins");
    }

    for w in &warnings {
        println!("   warning: {w}");
    }

    println!();
    println!("   Project:   {}", config.project_name);
    println!("   Provider:  {}", config.default_provider);
    println!("   Model:     {}", config.default_model);
    println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Database:  {}", config.database.url);
    println!("   Retrieval: {}", config.retrieval.backend);
    match config.auth.mode() {
        Ok(mode) => println!("   Auth:      {mode:?}"),
        Err(e) => println!("   Auth:      {e}"),
    }

    Ok(())
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}
