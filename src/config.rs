use serde::{Deserialize, Serialize};

/// Opus application profile selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioProfile {
    /// Favor speech intelligibility.
    Voip,
    /// General-purpose audio.
    #[default]
    Audio,
    /// Minimize algorithmic delay.
    LowLatency,
}

impl AudioProfile {
    pub(crate) fn to_opus(self) -> audiopus::Application {
        match self {
            Self::Voip => audiopus::Application::Voip,
            Self::Audio => audiopus::Application::Audio,
            Self::LowLatency => audiopus::Application::LowDelay,
        }
    }
}

/// Construction-time configuration for a voice connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Opus application profile for the outbound encoder.
    #[serde(default)]
    pub profile: AudioProfile,
    /// Whether the inbound media path (receiver task) is enabled.
    #[serde(default)]
    pub enable_incoming: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            profile: AudioProfile::Audio,
            enable_incoming: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_maps_to_opus_application() {
        assert!(matches!(
            AudioProfile::Voip.to_opus(),
            audiopus::Application::Voip
        ));
        assert!(matches!(
            AudioProfile::LowLatency.to_opus(),
            audiopus::Application::LowDelay
        ));
    }

    #[test]
    fn default_config_disables_incoming() {
        let config = ConnectionConfig::default();
        assert_eq!(config.profile, AudioProfile::Audio);
        assert!(!config.enable_incoming);
    }
}
