//! Check command: show what a configuration resolves to.

use std::path::Path;

use anyhow::Result;
use parley_client::ConversationConfig;

/// Print the resolved configuration.
pub fn run(path: &Path, config: &ConversationConfig) -> Result<()> {
    let source = if path.exists() {
        path.display().to_string()
    } else {
        format!("{} (not found, using defaults)", path.display())
    };
    println!("Config: {source}");
    for (key, value) in describe(config, |name| std::env::var_os(name).is_some()) {
        println!("  {key:<22} {value}");
    }
    Ok(())
}

/// Key/value summary. `has_env` reports whether an environment variable is set.
pub fn describe(
    config: &ConversationConfig,
    has_env: impl Fn(&str) -> bool,
) -> Vec<(&'static str, String)> {
    let key_env = &config.service.api_key_env;
    let key_status = if has_env(key_env) { "set" } else { "NOT SET" };
    let turn = match config.turn.timeout_ms {
        Some(ms) => format!("{:?} (timeout {ms} ms)", config.turn.mode),
        None => format!("{:?}", config.turn.mode),
    };

    vec![
        ("realtime endpoint", config.service.realtime_url.clone()),
        ("responses endpoint", config.service.responses_url.clone()),
        ("realtime model", config.session.realtime_model.clone()),
        ("text model", config.session.text_model.clone()),
        ("voice", config.session.voice.clone()),
        (
            "transcription",
            config
                .session
                .input_transcription_model
                .clone()
                .unwrap_or_else(|| "off".to_string()),
        ),
        ("initial mode", config.session.initial_mode.to_string()),
        ("turn mode", turn),
        ("api key", format!("${key_env} {key_status}")),
    ]
}
