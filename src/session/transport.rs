//! Collaborators the session manager drives: the voice transport and the
//! speech synthesizer.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The connection that carries audio to and from the voice service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection.
    async fn establish(&self) -> anyhow::Result<()>;

    /// Close the connection. Called at most once per established connection.
    async fn teardown(&self) -> anyhow::Result<()>;
}

/// Options passed to the synthesizer for one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechOptions {
    pub voice: Option<String>,
    /// Rate multiplier, `1.0` = normal speed.
    pub rate: f32,
}

impl Default for SpeechOptions {
    fn default() -> Self {
        Self {
            voice: None,
            rate: 1.0,
        }
    }
}

/// Synthesized audio, ready for playback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesizedAudio {
    /// f32 audio samples, mono.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// Text-to-speech engine.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, options: &SpeechOptions)
    -> anyhow::Result<SynthesizedAudio>;
}

/// Transport with nothing behind it. Used by the console host.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    established: AtomicUsize,
    torn_down: AtomicUsize,
}

impl LoopbackTransport {
    pub fn established_count(&self) -> usize {
        self.established.load(Ordering::SeqCst)
    }

    pub fn teardown_count(&self) -> usize {
        self.torn_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn establish(&self) -> anyhow::Result<()> {
        self.established.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Synthesizer that produces silence sized to the text.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentSynthesizer;

const SILENT_SAMPLE_RATE: u32 = 16_000;

#[async_trait]
impl SpeechSynthesizer for SilentSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        options: &SpeechOptions,
    ) -> anyhow::Result<SynthesizedAudio> {
        // Roughly 60 ms per character at normal rate.
        let rate = if options.rate > 0.0 { options.rate } else { 1.0 };
        let seconds = text.chars().count() as f32 * 0.06 / rate;
        let len = (seconds * SILENT_SAMPLE_RATE as f32) as usize;
        Ok(SynthesizedAudio {
            samples: vec![0.0; len],
            sample_rate: SILENT_SAMPLE_RATE,
        })
    }
}
