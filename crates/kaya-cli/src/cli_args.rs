use std::path::PathBuf;

use clap::Parser;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(name = "kaya", about = "Messaging-native LLM agent runtime", version)]
pub struct Cli {
    /// Secrets file with the agent identity and contact book; a template is
    /// written on first start.
    #[arg(long, env = "KAYA_SECRETS", default_value = "secrets.json")]
    pub secrets: PathBuf,

    /// Directory holding the messaging credentials and their backup.
    #[arg(long, env = "KAYA_AUTH_DIR", default_value = "auth")]
    pub auth_dir: PathBuf,

    /// Websocket endpoint of the messaging bridge.
    #[arg(
        long,
        env = "KAYA_GATEWAY_URL",
        default_value = "ws://127.0.0.1:8088/session"
    )]
    pub gateway_url: String,

    #[arg(
        long,
        env = "OPENAI_API_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    pub api_base: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "KAYA_MODEL", default_value = "gpt-4o-mini")]
    pub model: String,

    /// Pause between reconnect attempts after a retryable close.
    #[arg(long, default_value_t = 2_000, value_parser = parse_positive_u64)]
    pub reconnect_delay_ms: u64,

    #[arg(long, default_value_t = 10_000, value_parser = parse_positive_u64)]
    pub handshake_timeout_ms: u64,

    /// Timeout for one model HTTP request.
    #[arg(long, default_value_t = 60_000, value_parser = parse_positive_u64)]
    pub request_timeout_ms: u64,

    /// Retries for transient model HTTP failures.
    #[arg(long, default_value_t = 2)]
    pub max_retries: usize,

    /// Cap on result-feedback hops within one turn.
    #[arg(long, default_value_t = 8, value_parser = parse_positive_usize)]
    pub max_feedback_hops: usize,

    #[arg(long, default_value_t = 60_000, value_parser = parse_positive_u64)]
    pub execute_timeout_ms: u64,

    #[arg(long, default_value_t = 120_000, value_parser = parse_positive_u64)]
    pub download_timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn defaults_parse_without_any_flags() {
        let cli = Cli::try_parse_from(["kaya"]).expect("defaults");
        assert_eq!(cli.secrets.to_string_lossy(), "secrets.json");
        assert_eq!(cli.reconnect_delay_ms, 2_000);
        assert_eq!(cli.max_feedback_hops, 8);
    }

    #[test]
    fn zero_valued_tunables_are_rejected() {
        assert!(Cli::try_parse_from(["kaya", "--reconnect-delay-ms", "0"]).is_err());
        assert!(Cli::try_parse_from(["kaya", "--max-feedback-hops", "0"]).is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "kaya",
            "--gateway-url",
            "ws://bridge:9000/session",
            "--max-feedback-hops",
            "3",
        ])
        .expect("parse");
        assert_eq!(cli.gateway_url, "ws://bridge:9000/session");
        assert_eq!(cli.max_feedback_hops, 3);
    }
}
