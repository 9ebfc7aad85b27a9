//! voxclone command-line front-end
//!
//! Synthesizes speech from text with a cloned voice: resolves the voice
//! through the conditionals cache (encoding the reference recording on a
//! miss), runs the generation engine, and writes a 24 kHz WAV.

mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use voxclone_core::{GenerationConfig, QuantVariant, SAMPLE_RATE};
use voxclone_engine::paths;
use voxclone_engine::{ConditionalsCache, TextTokenizer, TtsEngine};

use settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum VariantArg {
    Fp32,
    Q8,
    Q4,
    Q4f16,
}

impl From<VariantArg> for QuantVariant {
    fn from(v: VariantArg) -> Self {
        match v {
            VariantArg::Fp32 => QuantVariant::Fp32,
            VariantArg::Q8 => QuantVariant::Q8,
            VariantArg::Q4 => QuantVariant::Q4,
            VariantArg::Q4f16 => QuantVariant::Q4F16,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "voxclone", version, about = "Zero-shot voice-cloning TTS")]
struct Cli {
    /// Text to synthesize
    #[arg(short, long)]
    text: Option<String>,

    /// Reference recording (wav) or cached voice key
    #[arg(short, long)]
    voice: Option<String>,

    /// Output WAV path
    #[arg(short, long, default_value = "output.wav")]
    output: PathBuf,

    /// Directory holding the ONNX models and tokenizer.json
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Directory for persisted voice conditionals
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Quantization variant of the model files
    #[arg(long, value_enum)]
    variant: Option<VariantArg>,

    /// Random seed; 0 keeps sampling nondeterministic
    #[arg(long)]
    seed: Option<u64>,

    /// Maximum speech tokens to generate
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Top-k filter (0 disables)
    #[arg(long)]
    top_k: Option<usize>,

    /// Nucleus sampling threshold
    #[arg(long)]
    top_p: Option<f32>,

    /// Repetition penalty
    #[arg(long)]
    repetition_penalty: Option<f32>,

    /// Settings file (defaults to voxclone.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not persist freshly encoded voices to the cache directory
    #[arg(long)]
    no_persist: bool,

    /// List cached voices and exit
    #[arg(long)]
    list_voices: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("voxclone=info")),
        )
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(mut cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(dir) = cli.models_dir.take() {
        settings.models_dir = dir;
    }
    if let Some(dir) = cli.cache_dir.take() {
        settings.cache_dir = dir;
    }
    if cli.no_persist {
        settings.persist_voices = false;
    }

    let variant: QuantVariant = match cli.variant {
        Some(v) => v.into(),
        None => settings.variant.parse()?,
    };

    let cache = ConditionalsCache::new(&settings.cache_dir);
    let loaded = cache.load_all_from_disk();

    if cli.list_voices {
        let mut keys = cache.keys();
        keys.sort();
        if keys.is_empty() {
            println!("no cached voices in {}", settings.cache_dir.display());
        } else {
            for key in keys {
                println!("{key}");
            }
        }
        return Ok(());
    }

    let gen_config = generation_config(&settings, &cli);

    let text = cli
        .text
        .ok_or("no text given; pass --text \"...\"")?;
    let voice = cli
        .voice
        .ok_or("no voice given; pass --voice <reference.wav|key>")?;

    let mut engine = TtsEngine::new(variant);
    engine.load_models(&settings.models_dir)?;
    tracing::info!(voices = loaded, variant = %variant, "engine ready");

    resolve_voice(&mut engine, &cache, &voice, settings.persist_voices)?;

    let tokenizer_path = paths::tokenizer_path(&settings.models_dir)
        .ok_or("tokenizer.json not found under the models directory")?;
    let tokenizer = TextTokenizer::from_file(&tokenizer_path)?;
    let tokens = tokenizer.encode(&text)?;
    tracing::info!(tokens = tokens.len(), "text tokenized");

    let started = Instant::now();
    let mut report = |step: usize, max: usize| {
        if step > 0 && step % 100 == 0 {
            tracing::info!("generation step {step}/{max}");
        }
    };
    let audio = engine.generate(&tokens.ids, &gen_config, Some(&mut report))?;

    voxclone_audio::write_wav(&cli.output, &audio, SAMPLE_RATE)?;
    let seconds = audio.len() as f32 / SAMPLE_RATE as f32;
    tracing::info!(
        output = %cli.output.display(),
        "wrote {seconds:.2}s of audio in {:.2}s",
        started.elapsed().as_secs_f32()
    );
    Ok(())
}

fn generation_config(settings: &Settings, cli: &Cli) -> GenerationConfig {
    let mut config = settings.generation.clone();
    if let Some(v) = cli.seed {
        config.seed = v;
    }
    if let Some(v) = cli.max_tokens {
        config.max_new_tokens = v;
    }
    if let Some(v) = cli.temperature {
        config.temperature = v;
    }
    if let Some(v) = cli.top_k {
        config.top_k = v;
    }
    if let Some(v) = cli.top_p {
        config.top_p = v;
    }
    if let Some(v) = cli.repetition_penalty {
        config.repetition_penalty = v;
    }
    config
}

/// Resolve a voice argument into engine conditionals: cache hit first, then
/// a fresh speech-encoder run over the reference recording.
fn resolve_voice(
    engine: &mut TtsEngine,
    cache: &ConditionalsCache,
    voice: &str,
    persist: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = ConditionalsCache::extract_key(voice);

    if let Some(conds) = cache.get(&key) {
        tracing::info!(key = %key, "voice served from cache");
        engine.set_conditionals((*conds).clone());
        return Ok(());
    }

    let reference = PathBuf::from(voice);
    if !reference.is_file() {
        return Err(format!(
            "voice '{key}' is not cached and '{voice}' is not a reference recording"
        )
        .into());
    }

    tracing::info!(path = %reference.display(), "encoding reference recording");
    engine.prepare_conditionals(&reference)?;
    if let Some(conds) = engine.conditionals() {
        cache.put(&key, conds.clone(), persist)?;
    }
    Ok(())
}
