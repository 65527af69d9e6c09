//! `domgate onboard`: first-time setup.

use domgate_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("Created config directory: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("Created config.toml at: {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("   1. Set api_key (or DOMGATE_API_KEY) for the model backend");
    println!("   2. Configure [auth.oidc], or enable dev_auth_enabled with a session_secret");
    println!("   3. Run: domgate init-db && domgate serve");

    Ok(())
}
