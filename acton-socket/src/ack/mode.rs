use serde::{Deserialize, Serialize};

/// When the server answers an inbound event that requested an ack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Send the ack after the listeners ran, even if one of them failed
    Auto,

    /// Send the ack only if every listener succeeded
    #[default]
    AutoSuccessOnly,

    /// Never send automatically; listeners call [`AckRequest::send_ack_data`]
    ///
    /// [`AckRequest::send_ack_data`]: super::AckRequest::send_ack_data
    Manual,
}

impl AckMode {
    /// Whether an automatic ack is due given the listeners' outcome
    #[must_use]
    pub fn should_auto_ack(self, listeners_succeeded: bool) -> bool {
        match self {
            AckMode::Auto => true,
            AckMode::AutoSuccessOnly => listeners_succeeded,
            AckMode::Manual => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_ack_policy() {
        assert!(AckMode::Auto.should_auto_ack(false));
        assert!(AckMode::AutoSuccessOnly.should_auto_ack(true));
        assert!(!AckMode::AutoSuccessOnly.should_auto_ack(false));
        assert!(!AckMode::Manual.should_auto_ack(true));
    }

    #[test]
    fn test_serde_names() {
        let mode: AckMode = serde_json::from_str("\"auto_success_only\"").unwrap();
        assert_eq!(mode, AckMode::AutoSuccessOnly);
        assert_eq!(serde_json::to_string(&AckMode::Manual).unwrap(), "\"manual\"");
    }
}
