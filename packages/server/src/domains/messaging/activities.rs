//! Send a protocol message to one thing

use saga::StepError;
use tracing::debug;

use super::message::ProtocolMessage;
use super::topic::prepare_message;
use crate::kernel::BaseMessageChannel;

/// Address `template` to `thing_id` and send it.
///
/// Preparation runs on every call so each attempt carries its own
/// correlation ID. Returns the message as sent.
pub async fn send_message(
    template: &ProtocolMessage,
    thing_id: &str,
    channel: &dyn BaseMessageChannel,
) -> Result<ProtocolMessage, StepError> {
    let message = prepare_message(template, thing_id)?;
    channel.send(&message).await?;
    debug!(
        thing_id = %thing_id,
        topic = %message.topic,
        correlation_id = message.correlation_id().unwrap_or_default(),
        "protocol message sent"
    );
    Ok(message)
}
