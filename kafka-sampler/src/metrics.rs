use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub const REQUESTS_COUNTER: &str = "kafka_sampler_requests_total";
pub const MESSAGES_CONSUMED_COUNTER: &str = "kafka_sampler_messages_consumed_total";
pub const BYTES_CONSUMED_COUNTER: &str = "kafka_sampler_bytes_consumed_total";
pub const PARTITION_ERRORS_COUNTER: &str = "kafka_sampler_partition_errors_total";
pub const REQUEST_DURATION_HISTOGRAM: &str = "kafka_sampler_request_duration_ms";

/// Register all metrics with descriptions
pub fn register_metrics() {
    describe_counter!(
        REQUESTS_COUNTER,
        "List-messages requests, labelled by how they ended"
    );
    describe_counter!(
        MESSAGES_CONSUMED_COUNTER,
        "Records read from Kafka on behalf of clients"
    );
    describe_counter!(
        BYTES_CONSUMED_COUNTER,
        "Bytes of key, value and headers read from Kafka"
    );
    describe_counter!(
        PARTITION_ERRORS_COUNTER,
        "Partition fetches that ended with an error"
    );
    describe_histogram!(
        REQUEST_DURATION_HISTOGRAM,
        "Wall-clock time of list-messages requests"
    );
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const BUCKETS: &[f64] = &[
        10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 20000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

pub fn request_finished(outcome: &'static str, elapsed_ms: f64, messages: i64, bytes: i64) {
    counter!(REQUESTS_COUNTER, "outcome" => outcome).increment(1);
    histogram!(REQUEST_DURATION_HISTOGRAM, "outcome" => outcome).record(elapsed_ms);
    counter!(MESSAGES_CONSUMED_COUNTER).increment(messages.max(0).unsigned_abs());
    counter!(BYTES_CONSUMED_COUNTER).increment(bytes.max(0).unsigned_abs());
}

pub fn partition_error(error_type: &'static str) {
    counter!(PARTITION_ERRORS_COUNTER, "error_type" => error_type).increment(1);
}
