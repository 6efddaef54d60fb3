use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, TluiError};
use crate::message::{Inbound, MessageKind};

/// Where the router reports malformed lines and failed handlers.
pub trait ErrorSink {
    fn report(&mut self, error: TluiError);
}

impl ErrorSink for Vec<TluiError> {
    fn report(&mut self, error: TluiError) {
        self.push(error);
    }
}

/// Logs each error as a `tracing` warning and drops it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&mut self, error: TluiError) {
        warn!(event = "dispatch_error", error = %error);
    }
}

pub type Handler<S> = Box<dyn FnMut(&mut S, &Inbound) -> Result<()>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub handled: Vec<MessageKind>,
    pub ignored: Vec<String>,
    pub failed: usize,
}

/// Routes each top-level key of a message to the handlers registered for
/// its kind. Handlers get mutable access to a caller-owned state `S`.
pub struct Router<S> {
    handlers: BTreeMap<MessageKind, Vec<Handler<S>>>,
}

impl<S> Default for Router<S> {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }
}

impl<S> Router<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: MessageKind, handler: F) -> &mut Self
    where
        F: FnMut(&mut S, &Inbound) -> Result<()> + 'static,
    {
        self.handlers
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
        self
    }

    pub fn is_registered(&self, kind: MessageKind) -> bool {
        self.handlers
            .get(&kind)
            .is_some_and(|handlers| !handlers.is_empty())
    }

    pub fn dispatch(
        &mut self,
        state: &mut S,
        line: &str,
        sink: &mut dyn ErrorSink,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        let document = match serde_json::from_str::<Value>(line) {
            Ok(document) => document,
            Err(source) => {
                sink.report(TluiError::MalformedMessage {
                    line: line.to_string(),
                    source,
                });
                outcome.failed += 1;
                return outcome;
            }
        };

        let entries = match document {
            Value::Object(entries) => entries,
            other => {
                sink.report(TluiError::NotAnObject {
                    line: line.to_string(),
                    found: json_type_name(&other),
                });
                outcome.failed += 1;
                return outcome;
            }
        };

        for (key, value) in entries {
            let kind = MessageKind::from_key(&key);
            let Some(handlers) = self
                .handlers
                .get_mut(&kind)
                .filter(|handlers| !handlers.is_empty())
            else {
                debug!(event = "message_ignored", key = %key);
                outcome.ignored.push(key);
                continue;
            };

            let message = match Inbound::decode(&key, value) {
                Ok(message) => message,
                Err(err) => {
                    sink.report(err);
                    outcome.failed += 1;
                    continue;
                }
            };

            let mut ok = true;
            for handler in handlers.iter_mut() {
                if let Err(err) = handler(state, &message) {
                    sink.report(err);
                    ok = false;
                }
            }

            if ok {
                outcome.handled.push(kind);
            } else {
                outcome.failed += 1;
            }
        }

        outcome
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use crate::error::TluiError;
    use crate::message::{Inbound, MessageKind};
    use crate::router::Router;

    #[derive(Default)]
    struct Seen {
        calls: Vec<(String, String)>,
    }

    fn recording_router(kinds: &[MessageKind]) -> Router<Seen> {
        let mut router = Router::new();
        for kind in kinds {
            router.register(*kind, |seen: &mut Seen, message: &Inbound| {
                let value = match message {
                    Inbound::Unknown { value, .. } => value.to_string(),
                    Inbound::Status(text) | Inbound::Input(text) => text.clone(),
                    Inbound::Display(flag) => flag.to_string(),
                    other => format!("{other:?}"),
                };
                seen.calls.push((message.key().to_string(), value));
                Ok(())
            });
        }
        router
    }

    #[test]
    fn unknown_keys_reach_the_unknown_handler_once_each() {
        let mut router = recording_router(&[MessageKind::Unknown]);
        let mut seen = Seen::default();
        let mut errors = Vec::new();

        let outcome = router.dispatch(&mut seen, r#"{"a":1,"b":2}"#, &mut errors);

        assert!(errors.is_empty());
        assert_eq!(outcome.handled.len(), 2);
        assert_eq!(
            seen.calls,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn keys_dispatch_in_wire_order() {
        let mut router = recording_router(&[
            MessageKind::Status,
            MessageKind::Input,
            MessageKind::Display,
        ]);
        let mut seen = Seen::default();
        let mut errors = Vec::new();

        router.dispatch(
            &mut seen,
            r#"{"status":"s","input":"i","display":false}"#,
            &mut errors,
        );

        let keys: Vec<&str> = seen.calls.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, vec!["status", "input", "display"]);
    }

    #[test]
    fn non_json_reports_exactly_one_malformed_error() {
        let mut router = recording_router(&MessageKind::KNOWN);
        let mut seen = Seen::default();
        let mut errors = Vec::new();

        let outcome = router.dispatch(&mut seen, "not json", &mut errors);

        assert!(seen.calls.is_empty());
        assert_eq!(outcome.failed, 1);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_malformed());
    }

    #[test]
    fn non_object_document_is_malformed() {
        let mut router = recording_router(&MessageKind::KNOWN);
        let mut seen = Seen::default();
        let mut errors = Vec::new();

        router.dispatch(&mut seen, "[1,2,3]", &mut errors);

        assert!(seen.calls.is_empty());
        assert!(matches!(
            errors.as_slice(),
            [TluiError::NotAnObject { found: "an array", .. }]
        ));
    }

    #[test]
    fn unregistered_keys_are_ignored_silently() {
        let mut router = recording_router(&[MessageKind::Status]);
        let mut seen = Seen::default();
        let mut errors = Vec::new();

        let outcome = router.dispatch(
            &mut seen,
            r#"{"status":"ok","event_queue":["a"],"sparkles":true}"#,
            &mut errors,
        );

        assert!(errors.is_empty());
        assert_eq!(outcome.handled, vec![MessageKind::Status]);
        assert_eq!(outcome.ignored, vec!["event_queue", "sparkles"]);
    }

    #[test]
    fn failing_handler_does_not_block_other_keys() {
        let mut router = recording_router(&[MessageKind::Input]);
        router.register(MessageKind::Status, |_: &mut Seen, _: &Inbound| {
            Err(TluiError::handler("status", "boom"))
        });
        let mut seen = Seen::default();
        let mut errors = Vec::new();

        let outcome = router.dispatch(&mut seen, r#"{"status":"x","input":"y"}"#, &mut errors);

        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.handled, vec![MessageKind::Input]);
        assert_eq!(seen.calls, vec![("input".to_string(), "y".to_string())]);
        assert_eq!(errors.len(), 1);
        assert!(format!("{}", errors[0]).contains("handler for `status` failed: boom"));
    }

    #[test]
    fn bad_payload_is_isolated_to_its_key() {
        let mut router = recording_router(&[MessageKind::Display, MessageKind::Status]);
        let mut seen = Seen::default();
        let mut errors = Vec::new();

        router.dispatch(&mut seen, r#"{"display":"yes","status":"ok"}"#, &mut errors);

        assert_eq!(seen.calls, vec![("status".to_string(), "ok".to_string())]);
        assert!(format!("{}", errors[0]).contains("invalid payload for `display`"));
    }

    #[test]
    fn every_handler_for_a_kind_runs() {
        let mut router = recording_router(&[MessageKind::Status, MessageKind::Status]);
        let mut seen = Seen::default();
        let mut errors = Vec::new();

        router.dispatch(&mut seen, r#"{"status":"twice"}"#, &mut errors);

        assert_eq!(seen.calls.len(), 2);
        assert!(router.is_registered(MessageKind::Status));
        assert!(!router.is_registered(MessageKind::Pool));
    }
}
