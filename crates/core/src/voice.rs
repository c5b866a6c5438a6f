//! Voice selection and speech output.

use crate::error::SpeechError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
}

/// A synthesis voice offered by the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    /// Identifier passed back to the synthesizer.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// BCP 47 style language tag, e.g. `en-IN`.
    pub language: String,
    pub gender: Option<Gender>,
}

impl Voice {
    pub fn speaks(&self, locale: &str) -> bool {
        normalize_locale(&self.language) == normalize_locale(locale)
    }

    fn sounds_male(&self) -> bool {
        match self.gender {
            Some(gender) => gender == Gender::Male,
            None => {
                let name = self.name.to_lowercase();
                name.contains("male") && !name.contains("female")
            }
        }
    }
}

fn normalize_locale(tag: &str) -> String {
    tag.trim().replace('_', "-").to_lowercase()
}

/// A single message to be spoken.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub voice: Voice,
    pub locale: String,
    pub pitch: f32,
    pub rate: f32,
    pub volume: f32,
}

/// A speech backend. Implementations may queue utterances; `speak` only has
/// to accept the utterance, not wait for playback to finish.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn voices(&self) -> Result<Vec<Voice>, SpeechError>;

    async fn speak(&self, utterance: Utterance) -> Result<(), SpeechError>;
}

/// Picks a voice for `locale`, preferring a male voice.
///
/// Falls back to any voice for the locale, then to the first voice at all.
pub fn select_voice<'a>(voices: &'a [Voice], locale: &str) -> Option<&'a Voice> {
    voices
        .iter()
        .find(|v| v.speaks(locale) && v.sounds_male())
        .or_else(|| voices.iter().find(|v| v.speaks(locale)))
        .or_else(|| voices.first())
}

/// Turns messages into speech with a locale-appropriate voice.
pub struct VoiceAnnouncer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    locale: String,
}

impl VoiceAnnouncer {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, locale: impl Into<String>) -> Self {
        Self {
            synthesizer,
            locale: locale.into(),
        }
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Speaks `message`. Returns whether an utterance was handed to the
    /// synthesizer.
    ///
    /// Blank messages are suppressed. A synthesizer with no voices (the
    /// list may still be loading) or one that fails is logged and skipped.
    pub async fn say(&self, message: &str) -> bool {
        if message.trim().is_empty() {
            return false;
        }

        let voices = match self.synthesizer.voices().await {
            Ok(voices) => voices,
            Err(e) => {
                warn!(error = %e, "Could not list synthesis voices; skipping speech.");
                return false;
            }
        };
        let Some(voice) = select_voice(&voices, &self.locale) else {
            debug!("No synthesis voices available yet; skipping speech.");
            return false;
        };

        let utterance = Utterance {
            text: message.to_string(),
            voice: voice.clone(),
            locale: self.locale.clone(),
            pitch: 1.0,
            rate: 1.0,
            volume: 1.0,
        };
        match self.synthesizer.speak(utterance).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Speech synthesis failed.");
                false
            }
        }
    }
}
