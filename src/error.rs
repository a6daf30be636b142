use bevy_ecs::prelude::Entity;
use rhai::{Dynamic, EvalAltResult, Position};
use thiserror::Error;

/// Failures surfaced to behaviour code and to the embedding application.
///
/// Inside a script these travel as Rhai runtime errors whose payload is the
/// `ScriptError` itself, so `try { .. } catch (err) { err.kind }` works and the host can
/// recover the original variant once the call unwinds.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("no entity named '{name}' below '{parent}'")]
    NotFound { parent: String, name: String },
    #[error("unknown key name '{0}'")]
    UnknownKey(String),
    #[error("no script on '{entity}' exports '{function}'")]
    NoSuchFunction { entity: String, function: String },
    #[error("{target} has exited")]
    InstanceExited { target: String },
    #[error("dispatch of '{function}' exceeded the depth limit of {limit}")]
    DispatchCycle { function: String, limit: usize },
    #[error("'{function}' expects {expected} argument(s) but was called with {given}")]
    ArgumentCount { function: String, expected: usize, given: usize },
    #[error("no behaviour registered as '{0}'")]
    UnknownBehaviour(String),
    #[error("entity {0:?} is not part of the scene")]
    UnknownEntity(Entity),
    #[error("entity '{entity}' has no field '{field}'")]
    UnknownField { entity: String, field: String },
    #[error("state has no key '{0}'; seed it in initial_state or read it with state.get(key, default)")]
    UnknownStateKey(String),
    #[error("field '{field}' of '{entity}' is read-only from this script")]
    ReadOnlyField { entity: String, field: String },
    #[error("cannot move '{child}' below its own descendant '{parent}'")]
    HierarchyCycle { child: String, parent: String },
    #[error("failed to compile behaviour '{id}': {message}")]
    Compile { id: String, message: String },
    #[error("{hook} failed: {message}")]
    Runtime { hook: String, message: String },
}

impl ScriptError {
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptError::NotFound { .. } => "NotFound",
            ScriptError::UnknownKey(_) => "UnknownKey",
            ScriptError::NoSuchFunction { .. } => "NoSuchFunction",
            ScriptError::InstanceExited { .. } => "InstanceExited",
            ScriptError::DispatchCycle { .. } => "DispatchCycle",
            ScriptError::ArgumentCount { .. } => "ArgumentCount",
            ScriptError::UnknownBehaviour(_) => "UnknownBehaviour",
            ScriptError::UnknownEntity(_) => "UnknownEntity",
            ScriptError::UnknownField { .. } => "UnknownField",
            ScriptError::UnknownStateKey(_) => "UnknownStateKey",
            ScriptError::ReadOnlyField { .. } => "ReadOnlyField",
            ScriptError::HierarchyCycle { .. } => "HierarchyCycle",
            ScriptError::Compile { .. } => "Compile",
            ScriptError::Runtime { .. } => "Runtime",
        }
    }

    /// Wraps the error so a native function can hand it back to the Rhai engine.
    pub fn into_rhai(self) -> Box<EvalAltResult> {
        Box::new(EvalAltResult::ErrorRuntime(Dynamic::from(self), Position::NONE))
    }

    /// Recovers a `ScriptError` from an evaluation failure, looking through the
    /// function-call frames Rhai wraps around errors raised in nested calls.
    pub fn from_eval(hook: &str, err: &EvalAltResult) -> Self {
        match err {
            EvalAltResult::ErrorRuntime(value, _) => match value.clone().try_cast::<ScriptError>() {
                Some(inner) => inner,
                None => ScriptError::Runtime { hook: hook.to_string(), message: value.to_string() },
            },
            EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => Self::from_eval(hook, inner),
            other => ScriptError::Runtime { hook: hook.to_string(), message: other.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_wrapped_error_through_call_frames() {
        let original = ScriptError::UnknownKey("F13".to_string());
        let nested = EvalAltResult::ErrorInFunctionCall(
            "update".to_string(),
            String::new(),
            original.clone().into_rhai(),
            Position::NONE,
        );
        assert_eq!(ScriptError::from_eval("update", &nested), original);
    }

    #[test]
    fn foreign_runtime_errors_become_runtime_kind() {
        let err = EvalAltResult::ErrorRuntime(Dynamic::from("boom"), Position::NONE);
        let mapped = ScriptError::from_eval("exit", &err);
        assert_eq!(mapped.kind(), "Runtime");
        assert!(mapped.to_string().contains("boom"), "unexpected message {mapped}");
    }
}
