use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, StreamConsumer};
use rdkafka::error::KafkaError;
use tracing::debug;

use crate::config::KafkaConfig;

/// Settings shared by every client we open against the cluster.
pub fn base_client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("client.id", &config.kafka_client_id)
        .set(
            "socket.timeout.ms",
            config.kafka_socket_timeout_ms.to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    client_config
}

/// Consumer used only for metadata and watermark lookups. It never joins a
/// group and never fetches records.
pub fn create_metadata_consumer(config: &KafkaConfig) -> Result<BaseConsumer, KafkaError> {
    let client_config = base_client_config(config);
    debug!("rdkafka metadata configuration: {:?}", client_config);
    client_config.create()
}

/// Consumer for reading a single partition through manual assignment.
///
/// librdkafka refuses `assign()` without a `group.id`, so every partition
/// consumer carries `<client id>-sampler`. It never subscribes and never
/// commits, so the group holds no members and no offsets. Partition EOF
/// events are enabled so bounded reads can stop once the high watermark is
/// reached, even when compaction removed the record at the planned end
/// offset.
pub fn create_partition_consumer(config: &KafkaConfig) -> Result<StreamConsumer, KafkaError> {
    let client_config = partition_consumer_config(config);
    debug!("rdkafka partition consumer configuration: {:?}", client_config);
    client_config.create()
}

pub fn partition_consumer_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = base_client_config(config);
    client_config
        .set("group.id", format!("{}-sampler", config.kafka_client_id))
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("enable.partition.eof", "true")
        .set("fetch.wait.max.ms", config.kafka_fetch_wait_max_ms.to_string())
        .set("isolation.level", "read_uncommitted");

    client_config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> KafkaConfig {
        KafkaConfig {
            kafka_hosts: "kafka:9092".to_string(),
            kafka_tls: false,
            kafka_client_id: "kafka-sampler".to_string(),
            kafka_socket_timeout_ms: 30000,
            kafka_fetch_wait_max_ms: 500,
            kafka_metadata_timeout_ms: 10000,
        }
    }

    #[test]
    fn test_partition_consumer_has_a_group_but_never_commits() {
        let client_config = partition_consumer_config(&config());

        assert_eq!(client_config.get("group.id"), Some("kafka-sampler-sampler"));
        assert_eq!(client_config.get("enable.auto.commit"), Some("false"));
        assert_eq!(client_config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(client_config.get("enable.partition.eof"), Some("true"));
        assert_eq!(client_config.get("bootstrap.servers"), Some("kafka:9092"));
    }

    #[test]
    fn test_tls_is_opt_in() {
        assert_eq!(base_client_config(&config()).get("security.protocol"), None);

        let tls = KafkaConfig {
            kafka_tls: true,
            ..config()
        };
        assert_eq!(
            base_client_config(&tls).get("security.protocol"),
            Some("ssl")
        );
    }
}
