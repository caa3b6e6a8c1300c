//! Agent configuration surface.

use crate::error::SessionError;
use serde::Deserialize;

/// Identity and behavior configuration for the conversational agent,
/// loaded once per process. All fields must be non-blank before a session
/// can start.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentProfile {
    pub agent_id: String,
    pub model: String,
    pub instructions: String,
}

impl AgentProfile {
    pub fn new(
        agent_id: impl Into<String>,
        model: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            model: model.into(),
            instructions: instructions.into(),
        }
    }

    /// Checks that the profile is complete. Runs before any network call so
    /// a missing identity surfaces as a blocking prompt, not a failed
    /// request.
    pub fn validate(&self) -> Result<(), SessionError> {
        let complete = !self.agent_id.trim().is_empty()
            && !self.model.trim().is_empty()
            && !self.instructions.trim().is_empty();
        if complete {
            Ok(())
        } else {
            Err(SessionError::NotConfigured)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_profile_validates() {
        let profile = AgentProfile::new("agent-1", "gpt-4o-mini", "Be helpful.");
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn blank_fields_fail_validation() {
        for profile in [
            AgentProfile::default(),
            AgentProfile::new("", "model", "instructions"),
            AgentProfile::new("agent", "   ", "instructions"),
            AgentProfile::new("agent", "model", ""),
        ] {
            assert!(matches!(
                profile.validate(),
                Err(SessionError::NotConfigured)
            ));
        }
    }
}
