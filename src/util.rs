use std::path::PathBuf;

const INSTANCEHUB_HOST: &str = "INSTANCEHUB_HOST";

const DEFAULT_HOST: &str = "localhost";

pub fn get_default_host() -> String {
    let host_from_env = std::env::var(INSTANCEHUB_HOST);
    host_from_env
        .ok()
        .filter(|host| !host.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string())
}

const INSTANCEHUB_CONFIG: &str = "INSTANCEHUB_CONFIG";

const CONFIG_DIR: &str = ".instancehub";

const CONFIG_FILE: &str = "config.json";

pub fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(INSTANCEHUB_CONFIG) {
        return PathBuf::from(path);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
        .join(CONFIG_FILE)
}

const INSTANCEHUB_LOG: &str = "INSTANCEHUB_LOG";

pub fn get_log_level() -> Option<String> {
    std::env::var(INSTANCEHUB_LOG).ok()
}
