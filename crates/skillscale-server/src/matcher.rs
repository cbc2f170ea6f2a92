//! Skill matching strategies.
//!
//! A matcher picks at most one skill for a task description. Two
//! interchangeable strategies exist: in-process keyword scoring, and an
//! external LLM helper subprocess that silently falls back to keyword
//! scoring whenever the helper misbehaves.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;

use crate::catalogue::{Catalogue, Skill};

/// Wall-clock budget for one helper invocation.
const HELPER_TIMEOUT: Duration = Duration::from_secs(30);

/// Picks one skill for a task description, or abstains.
#[async_trait]
pub trait Matcher: Send + Sync {
    async fn select(&self, task: &str, catalogue: &Catalogue) -> Option<Arc<Skill>>;
}

// ---------------------------------------------------------------------------
// Keyword matcher
// ---------------------------------------------------------------------------

/// Tokens too common to carry signal about which skill is wanted.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "can", "shall",
    "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into", "through",
    "during", "before", "after", "and", "but", "or", "nor", "not", "so", "yet", "both",
    "either", "neither", "each", "every", "all", "any", "few", "more", "most", "other", "some",
    "such", "no", "only", "own", "same", "than", "too", "very", "just", "because", "it", "its",
    "this", "that", "these", "those", "i", "me", "my", "we", "our", "you", "your", "he", "she",
    "they", "them", "what", "which", "who", "whom", "how", "when", "where", "why", "if",
    "then", "else", "about", "up", "out", "off", "over", "under", "again", "further", "once",
    "here", "there", "also", "please", "need", "want", "help", "using",
];

/// In-process description matcher.
///
/// Scores each skill against the task text: three points per exact token
/// shared between the task and the skill's name/description keywords, one
/// point per keyword that merely overlaps a task token as a substring
/// (counted once per keyword). Ties break towards catalogue insertion order;
/// a zero top score abstains.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordMatcher;

impl KeywordMatcher {
    /// Lowercase alphanumeric runs of `text`.
    fn tokenize(text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut word = String::new();
        for c in text.chars() {
            if c.is_alphanumeric() {
                word.extend(c.to_lowercase());
            } else if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
        }
        if !word.is_empty() {
            tokens.push(word);
        }
        tokens
    }

    fn score(text_tokens: &HashSet<String>, keywords: &[String]) -> u32 {
        let mut score = 0;
        for kw in keywords {
            if text_tokens.contains(kw) {
                score += 3;
                continue;
            }
            if text_tokens
                .iter()
                .any(|t| t.contains(kw.as_str()) || kw.contains(t.as_str()))
            {
                score += 1;
            }
        }
        score
    }

    /// The deduplicated, stopword-free keyword pool for a skill.
    fn keyword_pool(skill: &Skill) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut pool = Vec::new();
        for token in Self::tokenize(&skill.name)
            .into_iter()
            .chain(Self::tokenize(&skill.description))
        {
            if STOPWORDS.contains(&token.as_str()) {
                continue;
            }
            if seen.insert(token.clone()) {
                pool.push(token);
            }
        }
        pool
    }
}

#[async_trait]
impl Matcher for KeywordMatcher {
    async fn select(&self, task: &str, catalogue: &Catalogue) -> Option<Arc<Skill>> {
        if catalogue.is_empty() {
            return None;
        }

        let text_tokens: HashSet<String> = Self::tokenize(task)
            .into_iter()
            .filter(|t| !STOPWORDS.contains(&t.as_str()))
            .collect();
        if text_tokens.is_empty() {
            return None;
        }

        let mut best: Option<(u32, Arc<Skill>)> = None;
        for skill in catalogue.iter() {
            let score = Self::score(&text_tokens, &Self::keyword_pool(skill));
            tracing::debug!(skill = %skill.name, score, "keyword match score");
            // Strictly greater: earlier catalogue entries win ties.
            if score > 0 && best.as_ref().map_or(true, |(top, _)| score > *top) {
                best = Some((score, Arc::clone(skill)));
            }
        }

        best.map(|(score, skill)| {
            tracing::info!(skill = %skill.name, score, "keyword matcher selected skill");
            skill
        })
    }
}

// ---------------------------------------------------------------------------
// LLM matcher
// ---------------------------------------------------------------------------

/// Out-of-process matcher delegating the choice to an external helper.
///
/// The helper receives `{"task", "skills": [{"name", "description"}, ..],
/// "prompt_file"?}` on stdin and prints a single skill name, or `none` to
/// abstain. A non-zero exit, empty output, or a name missing from the
/// catalogue falls back to [`KeywordMatcher`] without surfacing an error to
/// the caller; the `none` sentinel is a deliberate answer and abstains.
pub struct LlmMatcher {
    python: String,
    helper: PathBuf,
    prompt_file: Option<PathBuf>,
    fallback: KeywordMatcher,
}

impl LlmMatcher {
    #[must_use]
    pub fn new(python: impl Into<String>, helper: PathBuf, prompt_file: Option<PathBuf>) -> Self {
        Self {
            python: python.into(),
            helper,
            prompt_file,
            fallback: KeywordMatcher,
        }
    }

    /// Run the helper and return its trimmed stdout, or `None` on any
    /// failure.
    async fn ask_helper(&self, task: &str, catalogue: &Catalogue) -> Option<String> {
        let skills: Vec<_> = catalogue
            .iter()
            .map(|s| json!({ "name": s.name, "description": s.description }))
            .collect();
        let mut input = json!({ "task": task, "skills": skills });
        if let Some(prompt_file) = &self.prompt_file {
            input["prompt_file"] = json!(prompt_file.display().to_string());
        }

        let mut child = tokio::process::Command::new(&self.python)
            .arg(&self.helper)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::warn!(helper = %self.helper.display(), error = %e, "cannot spawn llm helper");
            })
            .ok()?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = input.to_string();
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                tracing::debug!(error = %e, "llm helper closed stdin early");
            }
        }

        let output = match tokio::time::timeout(HELPER_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "llm helper failed");
                return None;
            }
            Err(_) => {
                tracing::warn!(timeout = ?HELPER_TIMEOUT, "llm helper timed out");
                return None;
            }
        };

        if !output.status.success() {
            tracing::warn!(
                exit = output.status.code().unwrap_or(-1),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "llm helper exited non-zero"
            );
            return None;
        }

        let name = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        (!name.is_empty()).then_some(name)
    }
}

#[async_trait]
impl Matcher for LlmMatcher {
    async fn select(&self, task: &str, catalogue: &Catalogue) -> Option<Arc<Skill>> {
        if catalogue.is_empty() {
            return None;
        }

        if let Some(name) = self.ask_helper(task, catalogue).await {
            if name.eq_ignore_ascii_case("none") {
                tracing::debug!("llm helper declined to match");
                return None;
            }
            if let Some(skill) = catalogue.get(&name) {
                tracing::info!(skill = %skill.name, "llm matcher selected skill");
                return Some(skill);
            }
            tracing::warn!(name = %name, "llm helper returned unknown skill, falling back");
        }

        self.fallback.select(task, catalogue).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn catalogue_with(skills: &[(&str, &str)]) -> Catalogue {
        let tmp = tempfile::tempdir().unwrap();
        for (name, description) in skills {
            let dir = tmp.path().join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(
                dir.join("SKILL.md"),
                format!("---\nname: {name}\ndescription: {description}\n---\nBody.\n"),
            )
            .unwrap();
        }
        Catalogue::load(tmp.path()).unwrap()
    }

    fn demo_catalogue() -> Catalogue {
        catalogue_with(&[
            ("csv-analyzer", "Analyzes CSV data and computes statistics"),
            ("text-summarizer", "Summarizes long text into key points"),
        ])
    }

    #[tokio::test]
    async fn keyword_matches_summarizer() {
        let catalogue = demo_catalogue();
        let skill = KeywordMatcher
            .select("please summarize this article about databases", &catalogue)
            .await
            .expect("should match");
        assert_eq!(skill.name, "text-summarizer");
    }

    #[tokio::test]
    async fn keyword_matches_csv() {
        let catalogue = demo_catalogue();
        let skill = KeywordMatcher
            .select("compute statistics over this csv file", &catalogue)
            .await
            .expect("should match");
        assert_eq!(skill.name, "csv-analyzer");
    }

    #[tokio::test]
    async fn unrelated_task_abstains() {
        let catalogue = demo_catalogue();
        assert!(KeywordMatcher.select("play music", &catalogue).await.is_none());
    }

    #[tokio::test]
    async fn stopword_only_task_abstains() {
        let catalogue = demo_catalogue();
        assert!(KeywordMatcher
            .select("please help me with this", &catalogue)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn ties_break_towards_insertion_order() {
        let catalogue = catalogue_with(&[
            ("alpha-report", "Generates a report"),
            ("beta-report", "Generates a report"),
        ]);
        let skill = KeywordMatcher
            .select("generate a report", &catalogue)
            .await
            .expect("should match");
        assert_eq!(skill.name, "alpha-report");
    }

    #[tokio::test]
    async fn empty_catalogue_abstains() {
        let catalogue = Catalogue::load(Path::new("/nonexistent")).unwrap();
        assert!(KeywordMatcher.select("anything", &catalogue).await.is_none());
    }

    #[test]
    fn tokenize_splits_alphanumeric_runs() {
        assert_eq!(
            KeywordMatcher::tokenize("CSV-Analyzer v2, please!"),
            vec!["csv", "analyzer", "v2", "please"]
        );
    }

    #[tokio::test]
    async fn llm_helper_answer_is_used() {
        let tmp = tempfile::tempdir().unwrap();
        let helper = tmp.path().join("helper.sh");
        std::fs::write(&helper, "#!/bin/sh\nprintf text-summarizer\n").unwrap();

        let catalogue = demo_catalogue();
        let matcher = LlmMatcher::new("sh", helper, None);
        let skill = matcher
            .select("anything at all", &catalogue)
            .await
            .expect("helper answer should be used");
        assert_eq!(skill.name, "text-summarizer");
    }

    #[tokio::test]
    async fn llm_none_sentinel_abstains_without_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let helper = tmp.path().join("helper.sh");
        std::fs::write(&helper, "#!/bin/sh\nprintf none\n").unwrap();

        let catalogue = demo_catalogue();
        let matcher = LlmMatcher::new("sh", helper, None);
        assert!(matcher.select("summarize this", &catalogue).await.is_none());
    }

    #[tokio::test]
    async fn llm_unknown_name_falls_back_to_keyword() {
        let tmp = tempfile::tempdir().unwrap();
        let helper = tmp.path().join("helper.sh");
        std::fs::write(&helper, "#!/bin/sh\nprintf no-such-skill\n").unwrap();

        let catalogue = demo_catalogue();
        let matcher = LlmMatcher::new("sh", helper, None);
        let skill = matcher
            .select("summarize this article", &catalogue)
            .await
            .expect("fallback should match");
        assert_eq!(skill.name, "text-summarizer");
    }

    #[tokio::test]
    async fn llm_spawn_failure_falls_back_to_keyword() {
        let catalogue = demo_catalogue();
        let matcher = LlmMatcher::new(
            "/nonexistent/interpreter",
            PathBuf::from("/nonexistent/helper.py"),
            None,
        );
        let skill = matcher
            .select("summarize this article", &catalogue)
            .await
            .expect("fallback should match");
        assert_eq!(skill.name, "text-summarizer");
    }
}
