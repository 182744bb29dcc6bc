//! 应用运行配置加载。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    /// 旧版 topic 前缀（`{base}/metrics/vrms`、`{base}/telemetry` 等）。
    pub mqtt_base: String,
    /// 设备状态订阅模式，设备段为 `+` 通配。
    pub mqtt_device_topic: String,
    pub mqtt_reconnect_min_ms: u64,
    pub mqtt_reconnect_max_ms: u64,
    pub ingest_enabled: bool,
    pub samples_buffer_size: usize,
    pub stream_keepalive_seconds: u64,
    /// SSE 单订阅者通道上限；`None` 表示不设上限。
    pub stream_capacity: Option<usize>,
    pub duplex_queue_capacity: usize,
    pub database_url: Option<String>,
    pub persist_enabled: bool,
    pub persist_queue_capacity: usize,
    pub persist_batch_size: usize,
    pub outage_min_voltage: f64,
    pub outage_max_gap_minutes: u32,
    pub outage_interval_ms: i64,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_addr = env::var("EMS_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string());
        let mqtt_host = env::var("EMS_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_with_default("EMS_MQTT_PORT", 1883u16)?;
        let mqtt_username = read_optional("EMS_MQTT_USERNAME");
        let mqtt_password = read_optional("EMS_MQTT_PASSWORD");
        let mqtt_base = env::var("EMS_MQTT_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| "tesis/iot/esp32".to_string());
        let mqtt_device_topic = env::var("EMS_MQTT_DEVICE_TOPIC")
            .unwrap_or_else(|_| "esp/energia/+/state".to_string());
        if !mqtt_device_topic.split('/').any(|segment| segment == "+") {
            return Err(ConfigError::Invalid(
                "EMS_MQTT_DEVICE_TOPIC".to_string(),
                mqtt_device_topic,
            ));
        }
        let mqtt_reconnect_min_ms = read_with_default("EMS_MQTT_RECONNECT_MIN_MS", 1000u64)?;
        let mqtt_reconnect_max_ms = read_with_default("EMS_MQTT_RECONNECT_MAX_MS", 30_000u64)?
            .max(mqtt_reconnect_min_ms);
        let ingest_enabled = read_bool_with_default("EMS_INGEST", true);
        let samples_buffer_size = read_with_default("EMS_SAMPLES_BUFFER_SIZE", 2000usize)?;
        let stream_keepalive_seconds = read_with_default("EMS_STREAM_KEEPALIVE_SECONDS", 30u64)?;
        let stream_capacity =
            read_optional_parsed::<usize>("EMS_STREAM_CAPACITY")?.filter(|value| *value > 0);
        let duplex_queue_capacity = read_with_default("EMS_DUPLEX_QUEUE_CAPACITY", 10_000usize)?;
        let database_url = read_optional("EMS_DATABASE_URL");
        let persist_enabled = read_bool_with_default("EMS_PERSIST", false);
        let persist_queue_capacity = read_with_default("EMS_PERSIST_QUEUE_CAPACITY", 1000usize)?;
        let persist_batch_size = read_with_default("EMS_PERSIST_BATCH_SIZE", 50usize)?;
        let outage_min_voltage = read_with_default("EMS_OUTAGE_MIN_VOLTAGE", 50.0f64)?;
        let outage_max_gap_minutes = read_with_default("EMS_OUTAGE_MAX_GAP_MINUTES", 10u32)?;
        let outage_interval_ms = read_with_default("EMS_OUTAGE_INTERVAL_MS", 60_000i64)?;
        if outage_interval_ms <= 0 {
            return Err(ConfigError::Invalid(
                "EMS_OUTAGE_INTERVAL_MS".to_string(),
                outage_interval_ms.to_string(),
            ));
        }

        Ok(Self {
            http_addr,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_base,
            mqtt_device_topic,
            mqtt_reconnect_min_ms,
            mqtt_reconnect_max_ms,
            ingest_enabled,
            samples_buffer_size,
            stream_keepalive_seconds,
            stream_capacity,
            duplex_queue_capacity,
            database_url,
            persist_enabled,
            persist_queue_capacity,
            persist_batch_size,
            outage_min_voltage,
            outage_max_gap_minutes,
            outage_interval_ms,
        })
    }
}

/// 读取可解析类型的环境变量，缺省时使用默认值。
fn read_with_default<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_optional_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key.to_string(), value)),
        Err(_) => Ok(None),
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
