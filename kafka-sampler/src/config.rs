use std::time::Duration;

use common_kafka::config::KafkaConfig;
use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "::")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3000")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(from = "LIST_MESSAGES_TIMEOUT_MS", default = "18000")]
    pub list_messages_timeout_ms: u64,

    #[envconfig(from = "MAX_MESSAGE_COUNT", default = "500")]
    pub max_message_count: u16,

    #[envconfig(from = "EVENT_CHANNEL_CAPACITY", default = "1000")]
    pub event_channel_capacity: usize,

    #[envconfig(from = "PROGRESS_INTERVAL_MS", default = "1000")]
    pub progress_interval_ms: u64,

    #[envconfig(from = "EXPORT_PROMETHEUS", default = "true")]
    pub export_prometheus: bool,

    // Display only, shown on the index route
    #[envconfig(from = "SERVICE_VERSION", default = "dev")]
    pub version: String,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn list_messages_settings(&self) -> ListMessagesSettings {
        ListMessagesSettings {
            timeout: Duration::from_millis(self.list_messages_timeout_ms),
            max_message_count: self.max_message_count,
            event_channel_capacity: self.event_channel_capacity,
            progress_interval: Duration::from_millis(self.progress_interval_ms),
        }
    }
}

/// Per-request limits of the list-messages flow.
#[derive(Debug, Clone, Copy)]
pub struct ListMessagesSettings {
    /// Wall-clock budget of one request, after which it ends as cancelled.
    pub timeout: Duration,
    pub max_message_count: u16,
    pub event_channel_capacity: usize,
    pub progress_interval: Duration,
}

impl Default for ListMessagesSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(18),
            max_message_count: 500,
            event_channel_capacity: 1000,
            progress_interval: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.bind(), ":::3000");
        assert_eq!(config.kafka.kafka_hosts, "localhost:9092");
        assert_eq!(config.kafka.metadata_timeout(), Duration::from_secs(10));

        let settings = config.list_messages_settings();
        assert_eq!(settings.timeout, Duration::from_secs(18));
        assert_eq!(settings.max_message_count, 500);
        assert_eq!(settings.progress_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<String, String> = [
            ("BIND_PORT", "8080"),
            ("KAFKA_HOSTS", "kafka:9092"),
            ("LIST_MESSAGES_TIMEOUT_MS", "2500"),
            ("MAX_MESSAGE_COUNT", "100"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = Config::init_from_hashmap(&env).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.kafka.kafka_hosts, "kafka:9092");
        assert_eq!(
            config.list_messages_settings().timeout,
            Duration::from_millis(2500)
        );
        assert_eq!(config.list_messages_settings().max_message_count, 100);
    }
}
