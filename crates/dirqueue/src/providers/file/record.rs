//! Line format of the backing store: `<handle><separator><body>`.
//!
//! Only the first separator is significant, so bodies may contain it.

use crate::error::SerializationError;
use crate::message::{Message, MessageHandle};

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;

/// Encode one record, without the trailing newline
pub(crate) fn encode(handle: &MessageHandle, body: &str, separator: char) -> String {
    let mut line = String::with_capacity(handle.as_str().len() + body.len() + 1);
    line.push_str(handle.as_str());
    line.push(separator);
    line.push_str(body);
    line
}

/// Decode one record line
pub(crate) fn decode(line: &str, separator: char) -> Result<Message, SerializationError> {
    match line.split_once(separator) {
        Some((handle, body)) if !handle.is_empty() => {
            Ok(Message::new(MessageHandle::new(handle), body))
        }
        _ => Err(SerializationError::MalformedRecord {
            line: line.to_string(),
            separator,
        }),
    }
}
