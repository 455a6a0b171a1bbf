//! Topic filter validation
//!
//! Key rules:
//! - Topic filters MAY contain wildcards
//! - Multi-level wildcard (#) must occupy the last level on its own
//! - Single-level wildcard (+) must occupy an entire level

use super::{PART_WILDCARD, SEPARATOR, WILDCARD};

/// Validate a topic filter or access pattern
///
/// Filters:
/// - Must be at least 1 character
/// - Must not exceed 65535 bytes
/// - Must not contain null character
/// - Must not contain empty levels
/// - # must be the entire last level
/// - + must be an entire level
pub fn validate_topic_filter(filter: &str) -> Result<(), &'static str> {
    if filter.is_empty() {
        return Err("topic filter cannot be empty");
    }

    if filter.len() > 65535 {
        return Err("topic filter exceeds maximum length");
    }

    if filter.contains('\0') {
        return Err("topic filter cannot contain null character");
    }

    let levels: Vec<&str> = filter.split(SEPARATOR).collect();

    for (i, level) in levels.iter().enumerate() {
        if level.is_empty() {
            return Err("topic filter cannot contain empty levels");
        }

        if level.contains(WILDCARD) {
            if *level != WILDCARD {
                return Err("multi-level wildcard must occupy entire level");
            }
            if i != levels.len() - 1 {
                return Err("multi-level wildcard must be last level");
            }
        }

        if level.contains(PART_WILDCARD) && *level != PART_WILDCARD {
            return Err("single-level wildcard must occupy entire level");
        }
    }

    Ok(())
}
