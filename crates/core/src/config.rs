//! Parameters for opening a voice session.

use crate::constants::{CAPTURE_BLOCK_SIZE, VOLUME_GAIN};

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

pub const DEFAULT_VOICE: &str = "Fenrir";

/// Meeting-assistant persona: stay silent until addressed by name.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Atlas, an advanced AI taking part in a business meeting.

ACTIVE SILENCE PROTOCOL:
1. Your default state is ABSOLUTE SILENCE. Listen closely to the conversation but do NOT interrupt or speak under any circumstances unless condition #2 is met.
2. WAKE WORD: Only speak if you explicitly hear your name: \"Atlas\", \"Hello Atlas\" or \"Hey Atlas\".
3. When invoked, answer: \"Hi, I'm here. How can I help?\" or answer the question you were asked directly, briefly and in an executive tone.
4. Once you have answered, return immediately to silence and wait for the next time your name is said.

Your goal is to be an invisible assistant that only appears when needed.";

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub model: String,
    /// Prebuilt voice for synthesized replies. `None` lets the service pick.
    pub voice_name: Option<String>,
    /// Passed to the remote service verbatim at session open.
    pub system_instruction: String,
    pub capture_block_size: usize,
    pub volume_gain: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice_name: Some(DEFAULT_VOICE.to_string()),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            capture_block_size: CAPTURE_BLOCK_SIZE,
            volume_gain: VOLUME_GAIN,
        }
    }
}
