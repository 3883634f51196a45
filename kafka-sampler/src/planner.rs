//! Turns one "give me N messages from topic T starting at P" request into
//! per-partition fetch plans.
//!
//! Planning runs in two steps. [`initial_requests`] derives every partition's
//! offset range from its watermarks. [`balance`] then spreads the requested
//! message count across partitions, one message per partition per round, so
//! small partitions are drained first and large ones take up the remainder.
//! Both steps are pure: the same input always yields the same plan.

use std::collections::BTreeMap;

use crate::types::{PartitionConsumeRequest, StartOffset, Watermark, LIVE_TAIL_START_OFFSET};

/// Plans a request. Partitions that end up with nothing to read are left out
/// of the result.
///
/// Balancing only happens when the result set size can be known in advance,
/// which excludes live tail and filtered requests. Otherwise every partition
/// gets the full `target_count`, since nobody can tell how many matches each
/// one holds.
pub fn plan(
    start_offset: StartOffset,
    target_count: i64,
    has_filter: bool,
    watermarks: &BTreeMap<i32, Watermark>,
) -> BTreeMap<i32, PartitionConsumeRequest> {
    if target_count <= 0 {
        return BTreeMap::new();
    }

    let predictable = is_predictable(start_offset, has_filter);
    let initial = initial_requests(start_offset, target_count, predictable, watermarks);

    let planned = if predictable {
        balance(start_offset, target_count, initial)
    } else {
        initial
    };

    planned
        .into_iter()
        .filter(|(_, request)| request.max_message_count > 0)
        .collect()
}

pub fn is_predictable(start_offset: StartOffset, has_filter: bool) -> bool {
    start_offset != StartOffset::Newest && !has_filter
}

/// Builds one request per partition with its offset range set. Message
/// counts stay at zero for predictable requests; [`balance`] assigns them.
pub fn initial_requests(
    start_offset: StartOffset,
    target_count: i64,
    predictable: bool,
    watermarks: &BTreeMap<i32, Watermark>,
) -> BTreeMap<i32, PartitionConsumeRequest> {
    watermarks
        .values()
        .map(|mark| {
            let (start, end) = match start_offset {
                // Placeholder start, moved backwards while balancing.
                StartOffset::Recent => (mark.high, mark.high - 1),
                StartOffset::Oldest => (mark.low, mark.high - 1),
                StartOffset::Newest => (LIVE_TAIL_START_OFFSET, i64::MAX),
                StartOffset::Absolute(offset) => (offset.max(mark.low), mark.high - 1),
            };

            let mut request = PartitionConsumeRequest {
                partition_id: mark.partition_id,
                low_watermark: mark.low,
                high_watermark: mark.high,
                start_offset: start,
                end_offset: end,
                max_message_count: 0,
                is_drained: false,
            };

            if !predictable {
                if start_offset == StartOffset::Recent {
                    request.start_offset = (mark.high - 1 - target_count).max(mark.low);
                }
                request.max_message_count = if request.available_messages() > 0 {
                    target_count
                } else {
                    0
                };
            }

            (mark.partition_id, request)
        })
        .collect()
}

/// Hands out `target_count` messages round-robin over the partitions that
/// still have messages left, until either the count is used up or every
/// partition is drained. Returns the balanced plan as a new collection.
pub fn balance(
    start_offset: StartOffset,
    target_count: i64,
    initial: BTreeMap<i32, PartitionConsumeRequest>,
) -> BTreeMap<i32, PartitionConsumeRequest> {
    let mut requests: Vec<PartitionConsumeRequest> = initial.into_values().collect();
    let reading_backwards = start_offset == StartOffset::Recent;

    for request in requests.iter_mut() {
        request.is_drained = is_drained(request, reading_backwards);
    }

    let mut remaining = target_count;
    let mut yielding = requests.iter().filter(|r| !r.is_drained).count();

    while remaining > 0 && yielding > 0 {
        for request in requests.iter_mut() {
            if remaining == 0 {
                break;
            }
            if request.is_drained {
                continue;
            }

            if reading_backwards {
                request.start_offset -= 1;
            }
            request.max_message_count += 1;
            remaining -= 1;

            if is_drained(request, reading_backwards) {
                request.is_drained = true;
                yielding -= 1;
            }
        }
    }

    requests
        .into_iter()
        .map(|request| (request.partition_id, request))
        .collect()
}

fn is_drained(request: &PartitionConsumeRequest, reading_backwards: bool) -> bool {
    if reading_backwards {
        // Assumes the low watermark stays put for the whole request.
        request.start_offset <= request.low_watermark
    } else {
        request.max_message_count >= request.available_messages()
    }
}
