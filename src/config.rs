use std::env;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

#[derive(Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub enable_file_logs: bool,
    pub log_dir: String,
    pub sled_path: String,
    pub jwt_secret: String,
    pub internal_api_token: String,
    pub cors_origin: String,
    pub worker: WorkerConfig,
    pub wrapped: WrappedConfig,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub is_leader: bool,
    /// Local wall-clock time (fixed zone) of the daily generation run.
    pub generation_hour: u32,
    pub generation_minute: u32,
    pub sweep_cron: String,
    pub generation_concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct WrappedConfig {
    pub design_count: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            is_leader: true,
            generation_hour: 9,
            generation_minute: 30,
            sweep_cron: "0 */15 * * * *".to_string(),
            generation_concurrency: 4,
        }
    }
}

impl Default for WrappedConfig {
    fn default() -> Self {
        Self { design_count: 10 }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("enable_file_logs", &self.enable_file_logs)
            .field("log_dir", &self.log_dir)
            .field("sled_path", &self.sled_path)
            .field("jwt_secret", &"***REDACTED***")
            .field("internal_api_token", &"***REDACTED***")
            .field("cors_origin", &self.cors_origin)
            .field("worker", &self.worker)
            .field("wrapped", &self.wrapped)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Self {
        let worker_defaults = WorkerConfig::default();
        Self {
            host: env_or_parse("HOST", IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
            port: env_or_parse("PORT", 3000_u16),
            log_level: env_or("RUST_LOG", "info"),
            enable_file_logs: env_or_bool("ENABLE_FILE_LOGS", false),
            log_dir: env_or("LOG_DIR", "./logs"),
            sled_path: env_or("SLED_PATH", "./data/wrapped.sled"),
            jwt_secret: env_or(
                "JWT_SECRET",
                "change_me_to_random_64_chars_change_me_to_random_64_chars",
            ),
            internal_api_token: env_or(
                "INTERNAL_API_TOKEN",
                "change_me_internal_token_change_me_internal_token",
            ),
            cors_origin: env_or("CORS_ORIGIN", "http://localhost:5173"),
            worker: WorkerConfig {
                is_leader: env_or_bool("WORKER_LEADER", worker_defaults.is_leader),
                generation_hour: env_or_parse(
                    "WRAPPED_GENERATION_HOUR",
                    worker_defaults.generation_hour,
                ),
                generation_minute: env_or_parse(
                    "WRAPPED_GENERATION_MINUTE",
                    worker_defaults.generation_minute,
                ),
                sweep_cron: env_or("WRAPPED_SWEEP_CRON", &worker_defaults.sweep_cron),
                generation_concurrency: env_or_parse(
                    "GENERATION_CONCURRENCY",
                    worker_defaults.generation_concurrency,
                )
                .max(1),
            },
            wrapped: WrappedConfig {
                design_count: env_or_parse(
                    "WRAPPED_DESIGN_COUNT",
                    WrappedConfig::default().design_count,
                )
                .max(1),
            },
        }
    }
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_or_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    key,
                    value = %raw,
                    "Failed to parse env var, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

pub fn env_or_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
