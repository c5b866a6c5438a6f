//! Speech backends: the `espeak-ng` command line synthesizer and a muted
//! stand-in.

use async_trait::async_trait;
use facewatch_core::{
    SpeechError,
    voice::{Gender, SpeechSynthesizer, Utterance, Voice},
};
use std::process::Stdio;
use tokio::{
    io::AsyncWriteExt,
    process::Command,
    sync::{OnceCell, mpsc},
};
use tracing::{debug, info, warn};

/// espeak-ng's own defaults, reached at pitch/rate/volume 1.0.
const BASE_PITCH: f32 = 50.0;
const BASE_RATE_WPM: f32 = 175.0;
const BASE_AMPLITUDE: f32 = 100.0;

/// Speaks through an `espeak-ng` child process per utterance.
///
/// Utterances are queued and played one at a time by a background worker,
/// so `speak` returns as soon as the utterance is accepted.
pub struct EspeakSynthesizer {
    program: String,
    voices: OnceCell<Vec<Voice>>,
    queue: mpsc::UnboundedSender<Utterance>,
}

impl EspeakSynthesizer {
    /// Starts the playback worker. Must be called inside a Tokio runtime.
    pub fn spawn(program: impl Into<String>) -> Self {
        let program = program.into();
        let (queue, mut rx) = mpsc::unbounded_channel::<Utterance>();
        let worker_program = program.clone();
        tokio::spawn(async move {
            while let Some(utterance) = rx.recv().await {
                if let Err(e) = play(&worker_program, &utterance).await {
                    warn!(error = %e, "Speech playback failed.");
                }
            }
            debug!("Speech worker stopped.");
        });
        Self {
            program,
            voices: OnceCell::new(),
            queue,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for EspeakSynthesizer {
    async fn voices(&self) -> Result<Vec<Voice>, SpeechError> {
        self.voices
            .get_or_try_init(|| list_voices(&self.program))
            .await
            .cloned()
    }

    async fn speak(&self, utterance: Utterance) -> Result<(), SpeechError> {
        self.queue
            .send(utterance)
            .map_err(|_| SpeechError::Unavailable("speech worker is not running".to_string()))
    }
}

async fn list_voices(program: &str) -> Result<Vec<Voice>, SpeechError> {
    let output = Command::new(program)
        .arg("--voices")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| SpeechError::Unavailable(format!("{}: {}", program, e)))?;
    if !output.status.success() {
        return Err(SpeechError::Failed(format!(
            "{} --voices exited with {}",
            program, output.status
        )));
    }
    let voices = parse_voice_list(&String::from_utf8_lossy(&output.stdout));
    info!(count = voices.len(), "Loaded synthesis voices");
    Ok(voices)
}

async fn play(program: &str, utterance: &Utterance) -> Result<(), SpeechError> {
    let mut child = Command::new(program)
        .args(espeak_args(utterance))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SpeechError::Unavailable(format!("{}: {}", program, e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(utterance.text.as_bytes())
            .await
            .map_err(|e| SpeechError::Failed(e.to_string()))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| SpeechError::Failed(e.to_string()))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(SpeechError::Failed(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

/// Command line arguments for one utterance. The text goes to stdin.
pub fn espeak_args(utterance: &Utterance) -> Vec<String> {
    let pitch = (utterance.pitch * BASE_PITCH).round().clamp(0.0, 99.0);
    let rate = (utterance.rate * BASE_RATE_WPM).round().clamp(80.0, 450.0);
    let amplitude = (utterance.volume * BASE_AMPLITUDE).round().clamp(0.0, 200.0);
    vec![
        "-v".to_string(),
        utterance.voice.id.clone(),
        "-p".to_string(),
        format!("{}", pitch as u32),
        "-s".to_string(),
        format!("{}", rate as u32),
        "-a".to_string(),
        format!("{}", amplitude as u32),
        "--stdin".to_string(),
    ]
}

/// Parses the table printed by `espeak-ng --voices`.
///
/// Columns are `Pty Language Age/Gender VoiceName File [Other Languages]`.
/// Lines that do not fit are skipped.
pub fn parse_voice_list(output: &str) -> Vec<Voice> {
    output
        .lines()
        .skip_while(|line| line.trim_start().starts_with("Pty"))
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let _priority = columns.next()?;
            let language = columns.next()?;
            let age_gender = columns.next()?;
            let name = columns.next()?;
            let gender = match age_gender.rsplit('/').next() {
                Some("M") => Some(Gender::Male),
                Some("F") => Some(Gender::Female),
                _ => None,
            };
            Some(Voice {
                id: language.to_string(),
                name: name.replace('_', " "),
                language: language.to_string(),
                gender,
            })
        })
        .collect()
}

/// Logs utterances instead of speaking them.
pub struct SilentSynthesizer {
    locale: String,
}

impl SilentSynthesizer {
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for SilentSynthesizer {
    async fn voices(&self) -> Result<Vec<Voice>, SpeechError> {
        Ok(vec![Voice {
            id: "silent".to_string(),
            name: "Silent".to_string(),
            language: self.locale.clone(),
            gender: None,
        }])
    }

    async fn speak(&self, utterance: Utterance) -> Result<(), SpeechError> {
        info!(text = %utterance.text, "(muted) Speaking");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOICES: &str = "\
Pty Language       Age/Gender VoiceName          File                 Other Languages
 5  af              --/M      Afrikaans          gmw/af
 5  en-029          --/M      English_(Caribbean) gmw/en-029
 2  en-gb           --/M      English_(Great_Britain) gmw/en            (en 2)
 5  en-us           --/F      English_(America)  gmw/en-US            (en 3)
 5  hi              --/M      Hindi              inc/hi
";

    fn utterance(pitch: f32, rate: f32, volume: f32) -> Utterance {
        Utterance {
            text: "Congrats Sujith".to_string(),
            voice: Voice {
                id: "en-gb".to_string(),
                name: "English".to_string(),
                language: "en-gb".to_string(),
                gender: Some(Gender::Male),
            },
            locale: "en-IN".to_string(),
            pitch,
            rate,
            volume,
        }
    }

    #[test]
    fn test_parse_voice_list() {
        let voices = parse_voice_list(VOICES);
        assert_eq!(voices.len(), 5);
        assert_eq!(voices[0].id, "af");
        assert_eq!(voices[2].name, "English (Great Britain)");
        assert_eq!(voices[2].gender, Some(Gender::Male));
        assert_eq!(voices[3].gender, Some(Gender::Female));
        assert!(voices[3].speaks("en-US"));
    }

    #[test]
    fn test_parse_voice_list_skips_short_lines() {
        let voices = parse_voice_list("Pty Language\n\n 5 en\n 5  ta  --/M  Tamil  dra/ta\n");
        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].id, "ta");
    }

    #[test]
    fn test_default_prosody_maps_to_espeak_defaults() {
        assert_eq!(
            espeak_args(&utterance(1.0, 1.0, 1.0)),
            vec!["-v", "en-gb", "-p", "50", "-s", "175", "-a", "100", "--stdin"]
        );
    }

    #[test]
    fn test_prosody_is_clamped() {
        let args = espeak_args(&utterance(3.0, 0.1, 5.0));
        assert_eq!(args[3], "99");
        assert_eq!(args[5], "80");
        assert_eq!(args[7], "200");
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let synth = EspeakSynthesizer::spawn("/nonexistent/espeak-ng");
        assert!(matches!(
            synth.voices().await,
            Err(SpeechError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_silent_synthesizer_offers_locale_voice() {
        let synth = SilentSynthesizer::new("en-IN");
        let voices = synth.voices().await.unwrap();
        assert_eq!(voices.len(), 1);
        assert!(voices[0].speaks("en-IN"));
        assert!(synth.speak(utterance(1.0, 1.0, 1.0)).await.is_ok());
    }
}
