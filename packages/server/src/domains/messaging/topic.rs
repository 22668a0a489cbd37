//! Topic validation and rewriting for protocol messages.

use lazy_static::lazy_static;
use regex::Regex;
use saga::StepError;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::message::{ProtocolMessage, CORRELATION_ID_HEADER};

lazy_static! {
    // <namespace>/<name>/things/<channel>/<criterion>/<action>
    // <namespace>/<name>/policies/commands/<action>
    static ref TOPIC_REGEX: Regex = Regex::new(
        concat!(
            r"^[^/]+/[^/]+/",
            r"(things/(twin|live)/(commands|events|messages)/(create|modify|delete|update)",
            r"|policies/commands/(create|modify|delete|update))$",
        )
    ).unwrap();
}

const NAMESPACE_PLACEHOLDER: &str = "<namespace>";
const NAME_PLACEHOLDER: &str = "<name>";

/// A topic that cannot be addressed or is not a protocol topic. An
/// unaddressable thing ID yields no topic at all, so it is reported the same
/// way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("invalid topic: {0}")]
    InvalidTopic(String),
}

impl From<TopicError> for StepError {
    fn from(err: TopicError) -> Self {
        StepError::validation(err.to_string())
    }
}

/// A thing ID split at its first `:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThingAddress<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
}

impl<'a> ThingAddress<'a> {
    pub fn parse(thing_id: &'a str) -> Result<Self, TopicError> {
        match thing_id.split_once(':') {
            Some((namespace, name)) => Ok(Self { namespace, name }),
            None => Err(TopicError::InvalidTopic(format!(
                "cannot address thing ID '{}': expected namespace:name",
                thing_id
            ))),
        }
    }
}

pub fn validate_topic(topic: &str) -> Result<(), TopicError> {
    if TOPIC_REGEX.is_match(topic) {
        Ok(())
    } else {
        Err(TopicError::InvalidTopic(format!(
            "'{}' is not a valid protocol topic",
            topic
        )))
    }
}

/// Substitute the thing's namespace and name into `template` and validate
/// the result.
pub fn rewrite_topic(template: &str, thing_id: &str) -> Result<String, TopicError> {
    let address = ThingAddress::parse(thing_id)?;
    let topic = template
        .replace(NAMESPACE_PLACEHOLDER, address.namespace)
        .replace(NAME_PLACEHOLDER, address.name);
    validate_topic(&topic)?;
    Ok(topic)
}

/// Address `template` to `thing_id` for one send attempt.
///
/// A correlation ID is generated when the template carries none, so every
/// call (and every retry) gets a fresh one.
pub fn prepare_message(
    template: &ProtocolMessage,
    thing_id: &str,
) -> Result<ProtocolMessage, TopicError> {
    let mut message = template.clone();
    message.topic = rewrite_topic(&template.topic, thing_id)?;
    if !message.headers.contains_key(CORRELATION_ID_HEADER) {
        message.headers.insert(
            CORRELATION_ID_HEADER.to_string(),
            Value::String(Uuid::new_v4().to_string()),
        );
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga::FailureKind;

    #[test]
    fn rewrites_twin_command_topic() {
        let topic =
            rewrite_topic("<namespace>/<name>/things/twin/commands/modify", "org.example:gw1")
                .unwrap();
        assert_eq!(topic, "org.example/gw1/things/twin/commands/modify");
    }

    #[test]
    fn rewrites_policy_topic() {
        let topic = rewrite_topic("<namespace>/<name>/policies/commands/modify", "gateway:abc-123")
            .unwrap();
        assert_eq!(topic, "gateway/abc-123/policies/commands/modify");
    }

    #[test]
    fn thing_id_without_colon_is_rejected() {
        let err =
            rewrite_topic("<namespace>/<name>/things/twin/commands/modify", "gw1").unwrap_err();
        assert!(matches!(err, TopicError::InvalidTopic(_)));
        assert_eq!(
            err.to_string(),
            "invalid topic: cannot address thing ID 'gw1': expected namespace:name"
        );

        let err: StepError = err.into();
        assert_eq!(err.kind(), FailureKind::Validation);
    }

    #[test]
    fn name_keeps_everything_after_first_colon() {
        let address = ThingAddress::parse("org.example:gw:1").unwrap();
        assert_eq!(address.namespace, "org.example");
        assert_eq!(address.name, "gw:1");
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err =
            rewrite_topic("<namespace>/<name>/things/twin/commands/retrieve", "org.example:gw1")
                .unwrap_err();
        assert!(matches!(err, TopicError::InvalidTopic(_)));
        assert!(err.to_string().contains("org.example/gw1/things/twin/commands/retrieve"));
    }

    #[test]
    fn policy_events_are_rejected() {
        assert!(validate_topic("ns/n/policies/events/modify").is_err());
        assert!(validate_topic("ns/n/things/live/messages/update").is_ok());
        assert!(validate_topic("ns/n/things/twin/commands/modify/extra").is_err());
    }

    #[test]
    fn topic_errors_are_validation_failures() {
        let err: StepError = TopicError::InvalidTopic("x".into()).into();
        assert_eq!(err.kind(), FailureKind::Validation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn prepare_injects_fresh_correlation_id_per_call() {
        let template = ProtocolMessage::new("<namespace>/<name>/things/twin/commands/modify");
        let first = prepare_message(&template, "org.example:gw1").unwrap();
        let second = prepare_message(&template, "org.example:gw1").unwrap();

        let first_id = first.correlation_id().unwrap();
        let second_id = second.correlation_id().unwrap();
        assert!(Uuid::parse_str(first_id).is_ok());
        assert_ne!(first_id, second_id);
        assert_eq!(first.topic, "org.example/gw1/things/twin/commands/modify");
    }

    #[test]
    fn prepare_keeps_caller_correlation_id() {
        let template = ProtocolMessage::new("<namespace>/<name>/things/twin/commands/modify")
            .with_header(CORRELATION_ID_HEADER, "caller-123");
        let message = prepare_message(&template, "org.example:gw1").unwrap();
        assert_eq!(message.correlation_id(), Some("caller-123"));
    }
}
