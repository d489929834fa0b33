//! Topic name validation
//!
//! Every topic this bridge uses, including the two it subscribes to, is a
//! concrete topic name, so one set of rules covers them all:
//! - Must be at least 1 character
//! - Must not exceed 65535 bytes
//! - Must not contain null character
//! - Must not contain wildcards (+ or #)

/// Validate a topic name
pub fn validate_topic_name(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic name cannot be empty");
    }

    if topic.len() > 65535 {
        return Err("topic name exceeds maximum length");
    }

    if topic.contains('\0') {
        return Err("topic name cannot contain null character");
    }

    if topic.contains('+') || topic.contains('#') {
        return Err("topic name cannot contain wildcards");
    }

    Ok(())
}

/// Validate a single topic level used to build topic names
/// (the base prefix may span several levels, a device name may not)
pub fn validate_topic_level(level: &str) -> Result<(), &'static str> {
    validate_topic_name(level)?;
    if level.contains('/') {
        return Err("topic level cannot contain a level separator");
    }
    Ok(())
}
