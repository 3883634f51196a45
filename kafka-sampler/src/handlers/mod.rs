pub mod messages;
pub mod partitions;

pub use messages::{list_messages_sse, list_messages_ws};
pub use partitions::get_partitions;
