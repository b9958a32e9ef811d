//! Console host for the voice command interpreter.
//!
//! Reads commands from stdin as if they were transcripts and prints the
//! replies on stdout. Diagnostics go to stderr.

use clap::Parser;
use std::path::PathBuf;
use voxcmd::context::ContextType;
use voxcmd::safety::SafetyLevel;
use voxcmd::{Console, VoiceControlConfig};

/// Type natural-language commands and watch them get interpreted.
#[derive(Parser)]
#[command(name = "voxcmd", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "VOXCMD_CONFIG")]
    config: Option<PathBuf>,

    /// Context to start in (e.g. tasks, messaging, media, general).
    #[arg(long, default_value = "general")]
    context: ContextType,

    /// Override the configured safety level.
    #[arg(long)]
    safety: Option<SafetyLevel>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = cli
        .config
        .clone()
        .unwrap_or_else(VoiceControlConfig::default_config_path);
    let mut config = VoiceControlConfig::load_or_default(&path);
    config.apply_env_overrides();
    if let Some(level) = cli.safety {
        config.safety.level = level;
    }

    let _log_guard = voxcmd::logging::init_logging(&config.logging)?;
    tracing::info!(
        config = %path.display(),
        safety = %config.safety.level,
        context = %cli.context,
        "voxcmd starting"
    );

    let mut console = Console::new(&config, cli.context);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    console.run(stdin, tokio::io::stdout()).await.map_err(|e| {
        tracing::error!(error = %e, "voxcmd exited with error");
        anyhow::anyhow!("voxcmd failed: {e}")
    })?;

    tracing::info!("voxcmd shut down cleanly");
    Ok(())
}
