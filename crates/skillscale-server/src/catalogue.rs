//! Skill catalogue: discovery, parsing, and progressive disclosure.
//!
//! Two discovery strategies, tried in order:
//!
//! 1. *Manifest-driven*: an `AGENTS.md` in the skills directory carrying an
//!    `<available_skills>` block of `<skill>` entries (name, description,
//!    location). Entries load shallow; each skill's instructions are read
//!    from `location/SKILL.md` the first time the skill is dispatched.
//! 2. *Scan-driven*: a recursive walk collecting every `SKILL.md`. The
//!    front-matter (delimited by `---` lines) is parsed as simple
//!    `key: value` pairs and the remainder becomes the instructions, so
//!    these entries load fully up front.
//!
//! The catalogue is immutable after load. The only late mutation, filling
//! in lazily loaded instructions, goes through a per-skill one-shot cell,
//! so concurrent workers never contend on a shared lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::{Result, ServerError};

// ---------------------------------------------------------------------------
// Skill
// ---------------------------------------------------------------------------

/// One executable skill, immutable after load.
#[derive(Debug)]
pub struct Skill {
    /// Unique name within a server.
    pub name: String,
    /// One-line natural-language summary used by matchers.
    pub description: String,
    /// Working directory when the skill runs.
    pub base_dir: PathBuf,
    /// License declared in the front-matter, if any.
    pub license: Option<String>,
    /// Compatibility note declared in the front-matter, if any.
    pub compatibility: Option<String>,
    /// Tools the skill declares it may use.
    pub allowed_tools: Vec<String>,
    /// Where the skill's `SKILL.md` lives, when known.
    skill_md: Option<PathBuf>,
    /// Full instructions body, populated lazily for manifest entries.
    details: OnceCell<String>,
}

impl Skill {
    /// Whether the instructions body has been populated yet.
    #[must_use]
    pub fn details_loaded(&self) -> bool {
        self.details.initialized()
    }

    /// The full instructions body, reading `SKILL.md` on first use.
    pub async fn instructions(&self) -> Result<&str> {
        let text = self
            .details
            .get_or_try_init(|| async { self.read_instructions().await })
            .await?;
        Ok(text.as_str())
    }

    async fn read_instructions(&self) -> Result<String> {
        let path = match &self.skill_md {
            Some(p) => p.clone(),
            None => self.base_dir.join("SKILL.md"),
        };
        tracing::debug!(skill = %self.name, path = %path.display(), "loading skill details");
        let content =
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| ServerError::DetailsUnavailable {
                    skill: self.name.clone(),
                    reason: format!("{}: {e}", path.display()),
                })?;
        match split_front_matter(&content) {
            Some((_, body)) => Ok(body.to_owned()),
            // A bare markdown file still counts as instructions.
            None => Ok(content),
        }
    }
}

// ---------------------------------------------------------------------------
// Catalogue
// ---------------------------------------------------------------------------

/// Insertion-ordered map of skill names to definitions.
#[derive(Debug, Default)]
pub struct Catalogue {
    skills: Vec<Arc<Skill>>,
    by_name: HashMap<String, usize>,
}

impl Catalogue {
    /// Load the catalogue from a skills directory.
    ///
    /// A missing directory yields an empty catalogue: a server with nothing
    /// to serve is operationally valid during bring-up.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "skills directory does not exist");
            return Ok(Self::default());
        }

        let manifest = dir.join("AGENTS.md");
        if manifest.exists() {
            let entries = load_manifest(dir, &manifest)?;
            if !entries.is_empty() {
                tracing::info!(
                    count = entries.len(),
                    manifest = %manifest.display(),
                    "skills discovered from manifest"
                );
                return Ok(Self::from_skills(entries));
            }
            tracing::warn!(manifest = %manifest.display(), "manifest listed no skills, falling back to scan");
        }

        let entries = scan_skill_files(dir);
        tracing::info!(count = entries.len(), dir = %dir.display(), "skills loaded from scan");
        Ok(Self::from_skills(entries))
    }

    /// Build a catalogue from already-parsed skills, preserving insertion
    /// order. Later duplicates of a name are rejected; the first wins.
    fn from_skills(entries: Vec<Skill>) -> Self {
        let mut catalogue = Self::default();
        for skill in entries {
            let key = skill.name.clone();
            if catalogue.by_name.contains_key(&key) {
                tracing::warn!(skill = %key, "duplicate skill name, keeping the first");
                continue;
            }
            catalogue.by_name.insert(key, catalogue.skills.len());
            catalogue.skills.push(Arc::new(skill));
        }
        catalogue
    }

    /// Look a skill up by name. Exact match wins; case-insensitive match is
    /// accepted as a fallback.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Skill>> {
        if let Some(&idx) = self.by_name.get(name) {
            return Some(Arc::clone(&self.skills[idx]));
        }
        let lower = name.to_lowercase();
        self.skills
            .iter()
            .find(|s| s.name.to_lowercase() == lower)
            .map(Arc::clone)
    }

    /// Iterate skills in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Skill>> {
        self.skills.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// The only skill in the catalogue, if there is exactly one.
    #[must_use]
    pub fn sole_skill(&self) -> Option<Arc<Skill>> {
        match self.skills.as_slice() {
            [only] => Some(Arc::clone(only)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Manifest-driven discovery
// ---------------------------------------------------------------------------

fn load_manifest(dir: &Path, manifest: &Path) -> Result<Vec<Skill>> {
    let content = std::fs::read_to_string(manifest)?;

    let Some(block) = slice_between(&content, "<available_skills>", "</available_skills>") else {
        tracing::warn!(manifest = %manifest.display(), "no <available_skills> block in manifest");
        return Ok(Vec::new());
    };

    let mut skills = Vec::new();
    let mut rest = block;
    while let Some(entry) = slice_between(rest, "<skill>", "</skill>") {
        let name = tag_text(entry, "name");
        let description = tag_text(entry, "description");
        let location = tag_text(entry, "location");

        // Advance past this entry regardless of whether it parses.
        let end = rest
            .find("</skill>")
            .map(|p| p + "</skill>".len())
            .unwrap_or(rest.len());
        rest = &rest[end..];

        let Some(name) = name else {
            tracing::warn!("manifest skill entry without a name, skipping");
            continue;
        };

        let base_dir = dir.join(location.as_deref().unwrap_or("").trim_matches('/'));
        let skill_md = base_dir.join("SKILL.md");
        let skill_md = skill_md.exists().then_some(skill_md);

        tracing::debug!(skill = %name, base_dir = %base_dir.display(), "skill discovered");
        skills.push(Skill {
            name,
            description: description.unwrap_or_default(),
            base_dir,
            license: None,
            compatibility: None,
            allowed_tools: Vec::new(),
            skill_md,
            details: OnceCell::new(),
        });
    }

    Ok(skills)
}

/// The text between the first occurrence of `open` and the next `close`.
fn slice_between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = text[start..].find(close)? + start;
    Some(&text[start..end])
}

/// Trimmed text content of `<tag>...</tag>`, if present and non-empty.
fn tag_text(text: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let inner = slice_between(text, &open, &close)?.trim();
    (!inner.is_empty()).then(|| inner.to_owned())
}

// ---------------------------------------------------------------------------
// Scan-driven discovery
// ---------------------------------------------------------------------------

/// Recursively collect every `SKILL.md` under `dir`.
fn scan_skill_files(dir: &Path) -> Vec<Skill> {
    let mut found = Vec::new();
    walk(dir, &mut found);
    found.sort();

    let mut skills = Vec::new();
    for path in found {
        match parse_skill_file(&path) {
            Ok(skill) => {
                tracing::debug!(skill = %skill.name, path = %path.display(), "skill loaded");
                skills.push(skill);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to load skill");
            }
        }
    }
    skills
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot read directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk(&path, found);
        } else if path.file_name().is_some_and(|n| n == "SKILL.md") {
            found.push(path);
        }
    }
}

/// Parse a `SKILL.md` into a fully-loaded skill.
fn parse_skill_file(path: &Path) -> Result<Skill> {
    let content = std::fs::read_to_string(path)?;

    let (front, body) = split_front_matter(&content).ok_or_else(|| ServerError::InvalidSkill {
        path: path.to_path_buf(),
        reason: "missing front-matter (must start with ---)".into(),
    })?;
    let fields = parse_front_matter(front);

    let name = fields
        .get("name")
        .cloned()
        .ok_or_else(|| ServerError::InvalidSkill {
            path: path.to_path_buf(),
            reason: "front-matter has no `name`".into(),
        })?;

    let base_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
    let details = OnceCell::new();
    // Scan-driven entries are fully loaded at discovery time.
    let _ = details.set(body.to_owned());

    Ok(Skill {
        name,
        description: fields.get("description").cloned().unwrap_or_default(),
        base_dir,
        license: fields.get("license").cloned(),
        compatibility: fields.get("compatibility").cloned(),
        allowed_tools: fields
            .get("allowed-tools")
            .map(|v| v.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default(),
        skill_md: Some(path.to_path_buf()),
        details,
    })
}

// ---------------------------------------------------------------------------
// Front-matter parsing
// ---------------------------------------------------------------------------

/// Split a `SKILL.md` into its front-matter and body.
fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let content = content.trim_start();
    if !content.starts_with("---") {
        return None;
    }
    let after = &content[3..];
    let end = after.find("\n---")?;
    let front = after[..end].trim();
    let body = after[end + 4..].trim_start_matches(['\n', '\r']);
    Some((front, body))
}

/// Parse front-matter as simple `key: value` lines.
///
/// Values are trimmed of surrounding whitespace and quote characters. Lines
/// without a colon, blank lines, and comments are ignored.
fn parse_front_matter(front: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for line in front.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_matches(['"', '\'']).trim();
        fields.insert(key.trim().to_owned(), value.to_owned());
    }
    fields
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
