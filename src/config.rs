//! Configuration loading with env-var overrides.
//!
//! Reads TOML files, supports `[meta] base = "..."` inheritance chains,
//! and applies `TRIAGE_WORK_DIR` and `TRIAGE_LOG_LEVEL` env overrides.
//! Secrets (`LLM_API_KEY`, `CLASSIFIER_API_KEY`, `EMBEDDING_API_KEY`) are only
//! ever read from the environment, never from TOML.

use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

// ── Resolved types ────────────────────────────────────────────────────────────

/// PTY (console) channel configuration.
#[derive(Debug, Clone)]
pub struct PtyConfig {
    pub enabled: bool,
}

/// Axum HTTP channel configuration.
#[derive(Debug, Clone)]
pub struct AxumChannelConfig {
    pub enabled: bool,
    /// Socket address to bind the HTTP listener to.
    pub bind: String,
    /// How long an HTTP client waits for its turn once the turn has started.
    pub turn_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct CommsConfig {
    pub pty: PtyConfig,
    pub axum_channel: AxumChannelConfig,
}

/// OpenAI / OpenAI-compatible provider configuration (`[llm.openai]`).
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (`"dummy"`, `"openai"`, `"groq"`).
    pub provider: String,
    pub openai: OpenAiConfig,
}

/// Keyword lexicons feeding the intent classifier (`[triage.routing]`).
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub text_keywords: Vec<String>,
    pub visual_keywords: Vec<String>,
    /// Send non-blank text with no keyword hit to the text classifier instead
    /// of skipping it.
    pub route_unmatched_to_text: bool,
}

#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub prompts_dir: PathBuf,
    pub labels_path: PathBuf,
    /// How many prior exchanges are replayed into the prompt.
    pub history_turns: usize,
    /// Upper bound on any single tool invocation.
    pub tool_timeout_seconds: u64,
    /// Conditions that always force the emergency flag.
    pub high_risk_conditions: Vec<String>,
    pub routing: RoutingConfig,
}

/// A remote classification backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct ToolsConfig {
    pub text_classifier: BackendConfig,
    pub image_classifier: BackendConfig,
    /// Timeout for downloading an image referenced by URL.
    pub image_fetch_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// `"hashed"` (local, offline) or `"openai"` (OpenAI-compatible HTTP).
    pub provider: String,
    pub api_base_url: String,
    pub model: String,
    pub dims: usize,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// SQLite file holding the passage index (resolved against `work_dir`).
    pub db_path: PathBuf,
    pub score_threshold: f32,
    pub top_k: usize,
    /// Approximate max characters per ingested chunk.
    pub chunk_size: usize,
    pub embedding: EmbeddingConfig,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_name: String,
    /// Working directory for persistent data (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub comms: CommsConfig,
    pub llm: LlmConfig,
    pub triage: TriageConfig,
    pub tools: ToolsConfig,
    pub knowledge: KnowledgeConfig,
    /// From `LLM_API_KEY`; `None` for keyless local models.
    pub llm_api_key: Option<String>,
    /// From `CLASSIFIER_API_KEY`, shared by both classifier backends.
    pub classifier_api_key: Option<String>,
    /// From `EMBEDDING_API_KEY`, falling back to `LLM_API_KEY`.
    pub embedding_api_key: Option<String>,
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    supervisor: RawSupervisor,
    #[serde(default)]
    comms: RawComms,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    triage: RawTriage,
    #[serde(default)]
    tools: RawTools,
    #[serde(default)]
    knowledge: RawKnowledge,
}

#[derive(Deserialize)]
struct RawSupervisor {
    #[serde(default = "default_bot_name")]
    bot_name: String,
    #[serde(default = "default_work_dir")]
    work_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

impl Default for RawSupervisor {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            work_dir: default_work_dir(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

#[derive(Deserialize, Default)]
struct RawComms {
    #[serde(default)]
    pty: RawPty,
    #[serde(default)]
    axum_channel: RawAxumChannel,
}

#[derive(Deserialize)]
struct RawPty {
    #[serde(default = "default_true")]
    enabled: bool,
}

impl Default for RawPty {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Deserialize)]
struct RawAxumChannel {
    #[serde(default = "default_false")]
    enabled: bool,
    #[serde(default = "default_http_bind")]
    bind: String,
    #[serde(default = "default_turn_timeout_seconds")]
    turn_timeout_seconds: u64,
}

impl Default for RawAxumChannel {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_http_bind(),
            turn_timeout_seconds: default_turn_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    /// Maps to `default = "..."` in `[llm]`.
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self { provider: default_llm_provider(), openai: RawOpenAiConfig::default() }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_openai_temperature")]
    temperature: f32,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default)]
    max_tokens: Option<u32>,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_openai_temperature(),
            timeout_seconds: default_openai_timeout_seconds(),
            max_tokens: None,
        }
    }
}

#[derive(Deserialize)]
struct RawTriage {
    #[serde(default = "default_prompts_dir")]
    prompts_dir: String,
    #[serde(default = "default_labels_path")]
    labels_path: String,
    #[serde(default = "default_history_turns")]
    history_turns: usize,
    #[serde(default = "default_tool_timeout_seconds")]
    tool_timeout_seconds: u64,
    #[serde(default = "default_high_risk_conditions")]
    high_risk_conditions: Vec<String>,
    #[serde(default)]
    routing: RawRouting,
}

impl Default for RawTriage {
    fn default() -> Self {
        Self {
            prompts_dir: default_prompts_dir(),
            labels_path: default_labels_path(),
            history_turns: default_history_turns(),
            tool_timeout_seconds: default_tool_timeout_seconds(),
            high_risk_conditions: default_high_risk_conditions(),
            routing: RawRouting::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawRouting {
    #[serde(default = "default_text_keywords")]
    text_keywords: Vec<String>,
    #[serde(default = "default_visual_keywords")]
    visual_keywords: Vec<String>,
    #[serde(default = "default_true")]
    route_unmatched_to_text: bool,
}

impl Default for RawRouting {
    fn default() -> Self {
        Self {
            text_keywords: default_text_keywords(),
            visual_keywords: default_visual_keywords(),
            route_unmatched_to_text: true,
        }
    }
}

#[derive(Deserialize, Default)]
struct RawTools {
    #[serde(default)]
    text_classifier: RawBackend,
    #[serde(default)]
    image_classifier: RawImageBackend,
}

#[derive(Deserialize)]
struct RawBackend {
    #[serde(default = "default_text_classifier_url")]
    url: String,
    #[serde(default = "default_backend_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawBackend {
    fn default() -> Self {
        Self {
            url: default_text_classifier_url(),
            timeout_seconds: default_backend_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawImageBackend {
    #[serde(default = "default_image_classifier_url")]
    url: String,
    #[serde(default = "default_backend_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default = "default_image_fetch_timeout_seconds")]
    fetch_timeout_seconds: u64,
}

impl Default for RawImageBackend {
    fn default() -> Self {
        Self {
            url: default_image_classifier_url(),
            timeout_seconds: default_backend_timeout_seconds(),
            fetch_timeout_seconds: default_image_fetch_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawKnowledge {
    #[serde(default = "default_knowledge_db")]
    db_path: String,
    #[serde(default = "default_score_threshold")]
    score_threshold: f32,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default)]
    embedding: RawEmbedding,
}

impl Default for RawKnowledge {
    fn default() -> Self {
        Self {
            db_path: default_knowledge_db(),
            score_threshold: default_score_threshold(),
            top_k: default_top_k(),
            chunk_size: default_chunk_size(),
            embedding: RawEmbedding::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawEmbedding {
    #[serde(default = "default_embedding_provider")]
    provider: String,
    #[serde(default = "default_embedding_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_embedding_model")]
    model: String,
    #[serde(default = "default_embedding_dims")]
    dims: usize,
    #[serde(default = "default_backend_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawEmbedding {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_base_url: default_embedding_api_base_url(),
            model: default_embedding_model(),
            dims: default_embedding_dims(),
            timeout_seconds: default_backend_timeout_seconds(),
        }
    }
}

fn default_bot_name() -> String { "triage".to_string() }
fn default_work_dir() -> String { "~/.triage-bot".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_http_bind() -> String { "127.0.0.1:7860".to_string() }
fn default_turn_timeout_seconds() -> u64 { 180 }
fn default_llm_provider() -> String { "dummy".to_string() }
fn default_openai_api_base_url() -> String { "https://api.groq.com/openai/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "llama-3.1-70b-versatile".to_string() }
fn default_openai_temperature() -> f32 { 0.1 }
fn default_openai_timeout_seconds() -> u64 { 60 }
fn default_prompts_dir() -> String { "config/prompts".to_string() }
fn default_labels_path() -> String { "config/labels.json".to_string() }
fn default_history_turns() -> usize { 6 }
fn default_tool_timeout_seconds() -> u64 { 30 }
fn default_text_classifier_url() -> String { "http://127.0.0.1:8001/classify".to_string() }
fn default_image_classifier_url() -> String { "http://127.0.0.1:8002/classify".to_string() }
fn default_backend_timeout_seconds() -> u64 { 30 }
fn default_image_fetch_timeout_seconds() -> u64 { 10 }
fn default_knowledge_db() -> String { "knowledge/passages.db".to_string() }
fn default_score_threshold() -> f32 { 0.7 }
fn default_top_k() -> usize { 5 }
fn default_chunk_size() -> usize { 800 }
fn default_embedding_provider() -> String { "hashed".to_string() }
fn default_embedding_api_base_url() -> String { "https://api.openai.com/v1/embeddings".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dims() -> usize { 384 }
fn default_true() -> bool { true }
fn default_false() -> bool { false }

fn default_high_risk_conditions() -> Vec<String> {
    [
        "cancer", "dengue", "malaria", "tuberculosis", "tb", "pneumonia",
        "meningitis", "stroke", "heart attack", "sepsis",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_text_keywords() -> Vec<String> {
    [
        "fever", "pain", "cough", "chills", "headache", "vomit", "nausea",
        "diarrh", "fatigue", "tired", "breath", "sore throat", "ache",
        "dizz", "sweat", "cold", "flu", "stomach", "chest",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_visual_keywords() -> Vec<String> {
    [
        "rash", "itch", "spot", "skin", "lesion", "blister", "swelling",
        "wound", "bump", "red patch", "mole", "acne", "hives",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// ── Loading ──────────────────────────────────────────────────────────────────

/// Deep-merge two TOML values. Tables merge recursively; any other overlay
/// value replaces the base value wholesale.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, ov_val) in overlay_tbl {
                let merged = match base_tbl.remove(&key) {
                    Some(base_val) => merge_toml(base_val, ov_val),
                    None => ov_val,
                };
                base_tbl.insert(key, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file, follow any `[meta] base = "..."` chain, and return the
/// merged value. `visited` catches circular references.
fn load_raw_merged(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<toml::Value, AppError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Err(AppError::Config(format!(
            "circular base reference detected at: {}",
            path.display()
        )));
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let overlay_val: toml::Value = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    if let Some(base_str) = overlay_val
        .get("meta")
        .and_then(|m| m.get("base"))
        .and_then(|b| b.as_str())
    {
        let base_path = if Path::new(base_str).is_absolute() {
            PathBuf::from(base_str)
        } else {
            path.parent().unwrap_or(Path::new(".")).join(base_str)
        };
        let base_val = load_raw_merged(&base_path, visited)?;
        Ok(merge_toml(base_val, overlay_val))
    } else {
        Ok(overlay_val)
    }
}

/// Load config from `config_path`, or `config/default.toml` when present,
/// falling back to built-in defaults. Env overrides are applied last.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let work_dir_override = env::var("TRIAGE_WORK_DIR").ok();
    let log_level_override = env::var("TRIAGE_LOG_LEVEL").ok();

    if let Some(path) = config_path {
        return load_from(
            Path::new(path),
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        );
    }

    let default_path = Path::new("config/default.toml");
    if default_path.exists() {
        load_from(
            default_path,
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        )
    } else {
        resolve(
            RawConfig::default(),
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        )
    }
}

/// Internal loader: accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let mut visited = HashSet::new();
    let merged = load_raw_merged(path, &mut visited)?;
    let parsed: RawConfig = merged
        .try_into()
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;
    resolve(parsed, work_dir_override, log_level_override)
}

fn resolve(
    parsed: RawConfig,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let s = parsed.supervisor;
    let work_dir = expand_home(work_dir_override.unwrap_or(&s.work_dir));
    let log_level = log_level_override.unwrap_or(&s.log_level).trim().to_ascii_lowercase();
    crate::logger::parse_level(&log_level)
        .map_err(|e| AppError::Config(format!("supervisor.log_level: {e}")))?;
    let log_file = s.log_file.map(|f| relative_to(&work_dir, &f));

    let k = parsed.knowledge;
    if !(0.0..=1.0).contains(&k.score_threshold) {
        return Err(AppError::Config(format!(
            "knowledge.score_threshold must be within [0, 1], got {}",
            k.score_threshold
        )));
    }
    if k.top_k == 0 {
        return Err(AppError::Config("knowledge.top_k must be > 0".into()));
    }
    if k.chunk_size == 0 {
        return Err(AppError::Config("knowledge.chunk_size must be > 0".into()));
    }
    if k.embedding.dims == 0 {
        return Err(AppError::Config("knowledge.embedding.dims must be > 0".into()));
    }

    let t = parsed.triage;
    let llm_api_key = env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());
    let embedding_api_key = env::var("EMBEDDING_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
        .or_else(|| llm_api_key.clone());

    Ok(Config {
        bot_name: s.bot_name,
        log_level,
        log_file,
        comms: CommsConfig {
            pty: PtyConfig { enabled: parsed.comms.pty.enabled },
            axum_channel: AxumChannelConfig {
                enabled: parsed.comms.axum_channel.enabled,
                bind: parsed.comms.axum_channel.bind,
                turn_timeout_seconds: parsed.comms.axum_channel.turn_timeout_seconds,
            },
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
                max_tokens: parsed.llm.openai.max_tokens,
            },
        },
        triage: TriageConfig {
            prompts_dir: expand_home(&t.prompts_dir),
            labels_path: expand_home(&t.labels_path),
            history_turns: t.history_turns,
            tool_timeout_seconds: t.tool_timeout_seconds,
            high_risk_conditions: t.high_risk_conditions,
            routing: RoutingConfig {
                text_keywords: t.routing.text_keywords,
                visual_keywords: t.routing.visual_keywords,
                route_unmatched_to_text: t.routing.route_unmatched_to_text,
            },
        },
        tools: ToolsConfig {
            text_classifier: BackendConfig {
                url: parsed.tools.text_classifier.url,
                timeout_seconds: parsed.tools.text_classifier.timeout_seconds,
            },
            image_classifier: BackendConfig {
                url: parsed.tools.image_classifier.url,
                timeout_seconds: parsed.tools.image_classifier.timeout_seconds,
            },
            image_fetch_timeout_seconds: parsed.tools.image_classifier.fetch_timeout_seconds,
        },
        knowledge: KnowledgeConfig {
            db_path: relative_to(&work_dir, &k.db_path),
            score_threshold: k.score_threshold,
            top_k: k.top_k,
            chunk_size: k.chunk_size,
            embedding: EmbeddingConfig {
                provider: k.embedding.provider,
                api_base_url: k.embedding.api_base_url,
                model: k.embedding.model,
                dims: k.embedding.dims,
                timeout_seconds: k.embedding.timeout_seconds,
            },
        },
        llm_api_key,
        classifier_api_key: env::var("CLASSIFIER_API_KEY").ok().filter(|k| !k.is_empty()),
        embedding_api_key,
        work_dir,
    })
}

/// Resolve `path` against `base` unless it is absolute or `~`-prefixed.
fn relative_to(base: &Path, path: &str) -> PathBuf {
    let expanded = expand_home(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// `Config` for unit tests: dummy LLM, hashed embeddings, no keys.
#[cfg(test)]
impl Config {
    pub fn test_default(work_dir: &Path) -> Self {
        let mut cfg = resolve(
            RawConfig::default(),
            Some(&work_dir.display().to_string()),
            Some("info"),
        )
        .expect("defaults resolve");
        cfg.llm_api_key = None;
        cfg.classifier_api_key = None;
        cfg.embedding_api_key = None;
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[supervisor]
bot_name = "test-bot"
work_dir = "~/.triage-test"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.bot_name, "test-bot");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.llm.provider, "dummy");
    }

    #[test]
    fn retrieval_defaults_match_reference_values() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert!((cfg.knowledge.score_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.knowledge.top_k, 5);
        assert!(cfg.triage.routing.text_keywords.iter().any(|k| k == "fever"));
        assert!(cfg.triage.routing.visual_keywords.iter().any(|k| k == "rash"));
        assert!(cfg.triage.high_risk_conditions.iter().any(|k| k == "malaria"));
    }

    #[test]
    fn knowledge_db_resolves_under_work_dir() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("/tmp/triage-wd"), None).unwrap();
        assert_eq!(cfg.knowledge.db_path, PathBuf::from("/tmp/triage-wd/knowledge/passages.db"));
    }

    #[test]
    fn routing_section_overrides_keywords() {
        let f = write_toml(&format!(
            "{MINIMAL_TOML}\n[triage.routing]\ntext_keywords = [\"wheeze\"]\nroute_unmatched_to_text = false\n"
        ));
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.triage.routing.text_keywords, vec!["wheeze".to_string()]);
        assert!(!cfg.triage.routing.route_unmatched_to_text);
        // untouched list keeps its default
        assert!(cfg.triage.routing.visual_keywords.iter().any(|k| k == "itch"));
    }

    #[test]
    fn invalid_threshold_rejected() {
        let f = write_toml(&format!("{MINIMAL_TOML}\n[knowledge]\nscore_threshold = 1.5\n"));
        let err = load_from(f.path(), None, None).unwrap_err();
        assert!(err.to_string().contains("score_threshold"));
    }

    #[test]
    fn base_chain_merges_tables() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.toml");
        fs::write(&base, "[llm]\ndefault = \"openai\"\n[llm.openai]\nmodel = \"base-model\"\ntemperature = 0.5\n").unwrap();
        let overlay = dir.path().join("overlay.toml");
        fs::write(&overlay, "[meta]\nbase = \"base.toml\"\n[llm.openai]\nmodel = \"overlay-model\"\n").unwrap();

        let cfg = load_from(&overlay, None, None).unwrap();
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.openai.model, "overlay-model");
        assert!((cfg.llm.openai.temperature - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn circular_base_detected() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.toml");
        let b = dir.path().join("b.toml");
        fs::write(&a, "[meta]\nbase = \"b.toml\"\n").unwrap();
        fs::write(&b, "[meta]\nbase = \"a.toml\"\n").unwrap();
        let err = load_from(&a, None, None).unwrap_err();
        assert!(err.to_string().contains("circular"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.triage-bot");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".triage-bot"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), None, None);
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn shipped_default_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
        let cfg = load_from(&path, Some("/tmp/triage-shipped"), None).unwrap();
        assert!(cfg.comms.axum_channel.enabled);
        assert_eq!(cfg.comms.axum_channel.bind, "127.0.0.1:7860");
        assert_eq!(cfg.comms.axum_channel.turn_timeout_seconds, 180);
        assert_eq!(cfg.llm.openai.model, "llama-3.1-70b-versatile");
        assert_eq!(cfg.tools.image_fetch_timeout_seconds, 10);
        assert_eq!(cfg.knowledge.embedding.provider, "hashed");
    }

    #[test]
    fn env_overrides_applied() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("/tmp/test-override"), Some("debug")).unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/tmp/test-override"));
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn bad_log_level_fails_at_load() {
        let f = write_toml(MINIMAL_TOML);
        let err = load_from(f.path(), None, Some("loud")).unwrap_err();
        assert!(err.to_string().contains("supervisor.log_level"), "{err}");

        let cfg = load_from(f.path(), None, Some(" WARN ")).unwrap();
        assert_eq!(cfg.log_level, "warn");
    }
}
