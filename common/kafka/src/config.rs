use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "kafka-sampler")]
    pub kafka_client_id: String,

    #[envconfig(default = "30000")]
    pub kafka_socket_timeout_ms: u32,

    #[envconfig(default = "500")]
    pub kafka_fetch_wait_max_ms: u32, // Upper bound on how long a broker holds an empty fetch

    #[envconfig(default = "10000")]
    pub kafka_metadata_timeout_ms: u64, // Timeout for metadata and list-offsets calls
}

impl KafkaConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_metadata_timeout_ms)
    }
}
