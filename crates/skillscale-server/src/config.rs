//! Server configuration.
//!
//! Every flag has an environment-variable alias; a flag given on the command
//! line wins over its variable. The whole surface is parsed once at startup
//! into a single [`ServerConfig`] record.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Which strategy picks a skill for a task-shaped intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MatcherKind {
    /// In-process keyword scoring over skill names and descriptions.
    Keyword,
    /// External LLM helper subprocess, falling back to keyword scoring on
    /// any helper failure.
    Llm,
}

impl std::fmt::Display for MatcherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keyword => f.write_str("keyword"),
            Self::Llm => f.write_str("llm"),
        }
    }
}

/// Runtime configuration for one skill server.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "skillscale-server",
    version,
    about = "Topic-scoped skill server for the SkillScale fabric"
)]
pub struct ServerConfig {
    /// Topic prefix this server subscribes to.
    #[arg(long, env = "SKILLSCALE_TOPIC", default_value = "TOPIC_DEFAULT")]
    pub topic: String,

    /// Human-readable description of this server, logged at startup.
    #[arg(long, env = "SKILLSCALE_DESCRIPTION", default_value = "")]
    pub description: String,

    /// Directory holding the skill catalogue.
    #[arg(long, env = "SKILLSCALE_SKILLS_DIR", default_value = "./skills")]
    pub skills_dir: PathBuf,

    /// Switch downstream endpoint to subscribe on (`host:port`).
    #[arg(long, env = "SKILLSCALE_PROXY_XPUB", default_value = "127.0.0.1:5555")]
    pub proxy_xpub: String,

    /// Switch upstream endpoint to publish replies on (`host:port`).
    #[arg(long, env = "SKILLSCALE_PROXY_XSUB", default_value = "127.0.0.1:5444")]
    pub proxy_xsub: String,

    /// Number of worker tasks executing skills concurrently.
    #[arg(long, env = "SKILLSCALE_WORKERS", default_value_t = 2)]
    pub workers: usize,

    /// Skill execution wall-clock timeout in milliseconds.
    #[arg(long, env = "SKILLSCALE_TIMEOUT", default_value_t = 30_000)]
    pub timeout: u64,

    /// Capacity of the ingress queue feeding the workers, in envelopes.
    #[arg(long, env = "SKILLSCALE_HWM", default_value_t = 10_000)]
    pub hwm: usize,

    /// Skill matching strategy for task-shaped intents.
    #[arg(long, env = "SKILLSCALE_MATCHER", value_enum, default_value_t = MatcherKind::Keyword)]
    pub matcher: MatcherKind,

    /// Interpreter used to run the LLM matcher helper.
    #[arg(long, env = "SKILLSCALE_PYTHON", default_value = "python3")]
    pub python: String,

    /// LLM matcher helper script. Defaults to `<skills-dir>/../scripts/llm_match.py`.
    #[arg(long, env = "SKILLSCALE_LLM_HELPER")]
    pub llm_helper: Option<PathBuf>,

    /// Prompt template forwarded to the LLM matcher helper.
    #[arg(long, env = "SKILLSCALE_PROMPT_FILE")]
    pub prompt_file: Option<PathBuf>,

    /// Language-neutral dispatcher script tried before per-skill entry
    /// scripts.
    #[arg(long, env = "SKILLSCALE_DISPATCHER")]
    pub dispatcher: Option<PathBuf>,

    /// Delay after subscribing, in milliseconds, so the subscription reaches
    /// existing publishers before dispatching begins.
    #[arg(long, env = "SKILLSCALE_SETTLE_MS", default_value_t = 500)]
    pub settle_ms: u64,
}

impl ServerConfig {
    /// The helper script path for the LLM matcher, applying the conventional
    /// default next to the skills directory.
    #[must_use]
    pub fn llm_helper_path(&self) -> PathBuf {
        self.llm_helper.clone().unwrap_or_else(|| {
            self.skills_dir
                .parent()
                .unwrap_or(&self.skills_dir)
                .join("scripts")
                .join("llm_match.py")
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::parse_from(["skillscale-server"]);
        assert_eq!(config.topic, "TOPIC_DEFAULT");
        assert_eq!(config.workers, 2);
        assert_eq!(config.timeout, 30_000);
        assert_eq!(config.hwm, 10_000);
        assert_eq!(config.matcher, MatcherKind::Keyword);
        assert_eq!(config.settle_ms, 500);
    }

    #[test]
    fn cli_flags_parse() {
        let config = ServerConfig::parse_from([
            "skillscale-server",
            "--topic",
            "TOPIC_DATA",
            "--workers",
            "4",
            "--timeout",
            "180000",
            "--matcher",
            "llm",
        ]);
        assert_eq!(config.topic, "TOPIC_DATA");
        assert_eq!(config.workers, 4);
        assert_eq!(config.timeout, 180_000);
        assert_eq!(config.matcher, MatcherKind::Llm);
    }

    #[test]
    fn helper_path_defaults_next_to_skills_dir() {
        let config = ServerConfig::parse_from([
            "skillscale-server",
            "--skills-dir",
            "/opt/skills/data-processing",
        ]);
        assert_eq!(
            config.llm_helper_path(),
            PathBuf::from("/opt/skills/scripts/llm_match.py")
        );
    }
}
