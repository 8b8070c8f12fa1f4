//! Render errors
//!
//! A single error type flows through the append VM, the updating VM and every
//! collaborator they call into. Variants fall into three classes:
//!
//! - programming errors (`Invariant`): a malformed program or a VM bug, never retried
//! - user errors (`Missing*`, `InvalidHelperArgument`): bad template input, reported
//!   with the offending path or helper name
//! - DOM construction errors (`Dom`): operations the document refuses, such as
//!   creating an HTML element inside an SVG context

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("VM invariant violated: {message} (pc={pc}, sp={sp}, opcode={opcode})")]
    Invariant {
        message: String,
        pc: isize,
        sp: isize,
        opcode: String,
    },

    #[error("Could not find a component named \"{path}\"")]
    MissingComponent { path: String },

    #[error("Could not find a helper named \"{path}\"")]
    MissingHelper { path: String },

    #[error("Could not find a modifier named \"{path}\"")]
    MissingModifier { path: String },

    #[error("Invalid arguments to `{helper}`: {message}")]
    InvalidHelperArgument { helper: String, message: String },

    #[error("DOM error: {message}")]
    Dom { message: String },
}

impl RenderError {
    /// Invariant violation raised outside of opcode dispatch
    pub fn invariant(message: impl Into<String>) -> Self {
        RenderError::Invariant {
            message: message.into(),
            pc: -1,
            sp: -1,
            opcode: "<none>".to_string(),
        }
    }

    pub fn dom(message: impl Into<String>) -> Self {
        RenderError::Dom {
            message: message.into(),
        }
    }

    pub fn invalid_argument(helper: &str, message: impl Into<String>) -> Self {
        RenderError::InvalidHelperArgument {
            helper: helper.to_string(),
            message: message.into(),
        }
    }

    /// Programming-error class failures abort the render and are never retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, RenderError::Invariant { .. })
    }

    /// Attach VM diagnostics to an invariant raised without them
    pub(crate) fn with_location(self, at_pc: isize, at_sp: isize, op: &str) -> Self {
        match self {
            RenderError::Invariant {
                message, pc: -1, ..
            } => RenderError::Invariant {
                message,
                pc: at_pc,
                sp: at_sp,
                opcode: op.to_string(),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(RenderError::invariant("frame imbalance").is_fatal());
        assert!(!RenderError::MissingHelper {
            path: "shout".into()
        }
        .is_fatal());
        assert!(!RenderError::dom("nope").is_fatal());
    }

    #[test]
    fn test_location_only_fills_missing_context() {
        let err = RenderError::invariant("bad register").with_location(12, 3, "Load");
        assert_eq!(
            err.to_string(),
            "VM invariant violated: bad register (pc=12, sp=3, opcode=Load)"
        );

        let again = err.clone().with_location(99, 99, "Pop");
        assert_eq!(again, err);
    }
}
