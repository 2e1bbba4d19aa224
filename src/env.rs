use std::path::{Path, PathBuf};

use tracing::{info, warn};

const COMMON_ENV: &str = "config/common.env";
const DEV_ENV: &str = "config/dev.env";
const PROD_ENV: &str = "config/prod.env";
const SECRETS_ENV: &str = ".secrets.env";

fn is_production() -> bool {
    dotenvy::var("ROCKET_PROFILE").unwrap_or_else(|_| "development".to_string()) == "production"
}

/// Files read at startup, in load order. Later files override earlier ones.
pub fn environment_files() -> [&'static str; 3] {
    if is_production() {
        [COMMON_ENV, PROD_ENV, SECRETS_ENV]
    } else {
        [COMMON_ENV, DEV_ENV, SECRETS_ENV]
    }
}

pub fn load_environment() -> Result<Vec<PathBuf>, dotenvy::Error> {
    load_environment_from(Path::new("."))
}

/// Loads the environment files relative to `root`. Missing files are
/// skipped. Returns the files that were read.
pub fn load_environment_from(root: &Path) -> Result<Vec<PathBuf>, dotenvy::Error> {
    let mut loaded = Vec::new();
    for env_file in environment_files() {
        let path = root.join(env_file);
        if load_env_file(&path)? {
            loaded.push(path);
        }
    }
    Ok(loaded)
}

fn load_env_file(path: &Path) -> Result<bool, dotenvy::Error> {
    if !path.exists() {
        warn!("Environment file {} not found, skipping", path.display());
        return Ok(false);
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path.display());
    Ok(true)
}
