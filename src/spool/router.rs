//! Delivery router: picks the delivery channel of a record.

use crate::spool::record::{GENERIC_CHANNEL, MessageRecord, SMS_CHANNEL};

/// Delivery medium of a spooled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Composed message sent through a mail transport.
    Generic,
    /// Text message sent through an SMS gateway.
    Sms,
}

/// Classify a record by its channel tag.
///
/// Unknown tags fall back to `Generic`.
pub fn classify(record: &MessageRecord) -> Channel {
    match record.channel.as_str() {
        SMS_CHANNEL => Channel::Sms,
        GENERIC_CHANNEL => Channel::Generic,
        other => {
            tracing::debug!(record_id = %record.id, channel = %other, "Unknown channel, delivering as generic");
            Channel::Generic
        }
    }
}
