use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Directory holding one `<name>.json` file per document.
    pub data_dir: PathBuf,
    pub audit_log_path: PathBuf,
    pub merge_output_path: PathBuf,
    /// Write the sample documents at startup.
    pub seed: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("JSON_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5000),
            data_dir: env::var("JSON_DB_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./db")),
            audit_log_path: env::var("JSON_DB_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./log.txt")),
            merge_output_path: env::var("JSON_DB_MERGE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./merge.json")),
            seed: env::var("JSON_DB_SEED")
                .map(|s| parse_flag(&s))
                .unwrap_or(false),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}
