//! Runtime configuration resolved from the environment.
//!
//! Settings are resolved in order: explicit values → environment variables
//! → defaults. Invalid values fail construction rather than being silently
//! replaced.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

/// Default embedding model.
const DEFAULT_EMBEDDINGS_MODEL: &str = "text-embedding-3-small";
/// Default embedding dimension.
const DEFAULT_EMBEDDINGS_DIM: usize = 1536;
/// Default chat model.
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
/// Default retrieval depth.
const DEFAULT_RAG_TOP_K: usize = 5;
/// Default number of query rewrites.
const DEFAULT_AGENT_REWRITES: usize = 2;
/// Default chunk size in characters.
const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default chunk overlap in characters.
const DEFAULT_CHUNK_OVERLAP: usize = 200;
/// Default near-duplicate similarity threshold.
const DEFAULT_DEDUP_THRESHOLD: f64 = 0.85;
/// Default word-shingle size for MinHash.
const DEFAULT_SHINGLE_SIZE: usize = 3;
/// Default embedding batch size.
const DEFAULT_EMBED_BATCH_SIZE: usize = 50;
/// Default upload size cap (50 MiB).
const DEFAULT_UPLOAD_MAX_SIZE: u64 = 50 * 1024 * 1024;
/// Default per-capability timeout in seconds.
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
/// Default database path.
pub const DEFAULT_DB_PATH: &str = "docrag.db";

/// Judge strictness levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Accept answers unless clearly unsupported.
    Low,
    /// Balanced judgment.
    #[default]
    Medium,
    /// Demand full grounding and coverage.
    High,
}

impl Strictness {
    /// Parses a strictness level from its lowercase name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unknown values.
    pub fn parse(s: &str) -> Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(Error::Config {
                message: format!("JUDGE_STRICTNESS must be low|medium|high, got {other:?}"),
            }),
        }
    }

    /// Returns the lowercase name of the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Runtime settings for the engine.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// OpenAI-compatible API key; None disables LLM-assisted branches.
    pub openai_api_key: Option<String>,
    /// Optional base URL override for OpenAI-compatible proxies.
    pub openai_base_url: Option<String>,
    /// Embedding model name.
    pub embeddings_model: String,
    /// Embedding dimension.
    pub embeddings_dim: usize,
    /// Chat completion model name.
    pub chat_model: String,
    /// Default retrieval depth.
    pub rag_top_k: usize,
    /// Number of query paraphrases produced by the rewriter.
    pub agent_rewrites: usize,
    /// Judge strictness.
    pub judge_strictness: Strictness,
    /// Whether image inputs are OCR-processed.
    pub ocr_enabled: bool,
    /// Maximum accepted input file size in bytes.
    pub upload_max_size: u64,
    /// Directory uploads are staged into.
    pub upload_dir: PathBuf,
    /// Chunk size in characters.
    pub chunk_size: usize,
    /// Chunk overlap in characters.
    pub chunk_overlap: usize,
    /// Near-duplicate similarity threshold.
    pub dedup_threshold: f64,
    /// Word-shingle size for MinHash.
    pub shingle_size: usize,
    /// Embedding batch size.
    pub embed_batch_size: usize,
    /// Allow the deterministic hashed embedder (development only).
    pub dev_embeddings: bool,
    /// Timeout applied to every LLM/embedding capability call.
    pub llm_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            openai_api_key: None,
            openai_base_url: None,
            embeddings_model: DEFAULT_EMBEDDINGS_MODEL.to_string(),
            embeddings_dim: DEFAULT_EMBEDDINGS_DIM,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            rag_top_k: DEFAULT_RAG_TOP_K,
            agent_rewrites: DEFAULT_AGENT_REWRITES,
            judge_strictness: Strictness::Medium,
            ocr_enabled: true,
            upload_max_size: DEFAULT_UPLOAD_MAX_SIZE,
            upload_dir: PathBuf::from("uploads"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
            shingle_size: DEFAULT_SHINGLE_SIZE,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            dev_embeddings: false,
            llm_timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS),
        }
    }
}

impl Settings {
    /// Builds settings from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on unparsable values or an invalid
    /// chunking configuration (overlap >= chunk size).
    pub fn from_env() -> Result<Self, Error> {
        let mut settings = Self::default();

        settings.openai_api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        settings.openai_base_url = std::env::var("OPENAI_BASE_URL").ok();

        if let Ok(v) = std::env::var("EMBEDDINGS_MODEL") {
            settings.embeddings_model = v;
        }
        settings.embeddings_dim =
            parse_env("EMBEDDINGS_DIM", settings.embeddings_dim)?;
        if let Ok(v) = std::env::var("CHAT_MODEL") {
            settings.chat_model = v;
        }
        settings.rag_top_k = parse_env("RAG_TOP_K", settings.rag_top_k)?;
        settings.agent_rewrites = parse_env("AGENT_REWRITES", settings.agent_rewrites)?;
        if let Ok(v) = std::env::var("JUDGE_STRICTNESS") {
            settings.judge_strictness = Strictness::parse(&v)?;
        }
        if let Ok(v) = std::env::var("OCR_ENABLED") {
            settings.ocr_enabled = parse_bool("OCR_ENABLED", &v)?;
        }
        settings.upload_max_size = parse_env("UPLOAD_MAX_SIZE", settings.upload_max_size)?;
        if let Ok(v) = std::env::var("UPLOAD_DIR") {
            settings.upload_dir = PathBuf::from(v);
        }
        settings.chunk_size = parse_env("DOCRAG_CHUNK_SIZE", settings.chunk_size)?;
        settings.chunk_overlap = parse_env("DOCRAG_CHUNK_OVERLAP", settings.chunk_overlap)?;
        settings.dedup_threshold = parse_env("DOCRAG_DEDUP_THRESHOLD", settings.dedup_threshold)?;
        settings.shingle_size = parse_env("DOCRAG_SHINGLE_SIZE", settings.shingle_size)?;
        settings.embed_batch_size =
            parse_env("DOCRAG_EMBED_BATCH_SIZE", settings.embed_batch_size)?;
        if let Ok(v) = std::env::var("DOCRAG_DEV_EMBEDDINGS") {
            settings.dev_embeddings = parse_bool("DOCRAG_DEV_EMBEDDINGS", &v)?;
        }
        let timeout_secs: u64 =
            parse_env("DOCRAG_LLM_TIMEOUT_SECS", DEFAULT_LLM_TIMEOUT_SECS)?;
        settings.llm_timeout = Duration::from_secs(timeout_secs);

        settings.validate()?;
        Ok(settings)
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on invalid combinations.
    pub fn validate(&self) -> Result<(), Error> {
        if self.chunk_size == 0 {
            return Err(Error::Config {
                message: "chunk_size must be > 0".to_string(),
            });
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Config {
                message: format!(
                    "chunk_overlap {} must be less than chunk_size {}",
                    self.chunk_overlap, self.chunk_size
                ),
            });
        }
        if self.embeddings_dim == 0 {
            return Err(Error::Config {
                message: "EMBEDDINGS_DIM must be > 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.dedup_threshold) {
            return Err(Error::Config {
                message: format!(
                    "DOCRAG_DEDUP_THRESHOLD must be within [0, 1], got {}",
                    self.dedup_threshold
                ),
            });
        }
        if self.shingle_size == 0 {
            return Err(Error::Config {
                message: "DOCRAG_SHINGLE_SIZE must be > 0".to_string(),
            });
        }
        if self.embed_batch_size == 0 {
            return Err(Error::Config {
                message: "DOCRAG_EMBED_BATCH_SIZE must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Strips an optional `sqlite://` scheme prefix from a database URL.
///
/// `DATABASE_URL` itself is sourced by the CLI layer (clap `env`); this
/// helper normalizes whatever value arrives there.
pub(crate) fn strip_sqlite_scheme(url: &str) -> &str {
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url)
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, Error> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| Error::Config {
            message: format!("invalid value for {name}: {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, Error> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config {
            message: format!("invalid boolean for {name}: {raw:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.embeddings_model, "text-embedding-3-small");
        assert_eq!(s.embeddings_dim, 1536);
        assert_eq!(s.rag_top_k, 5);
        assert_eq!(s.agent_rewrites, 2);
        assert_eq!(s.judge_strictness, Strictness::Medium);
        assert_eq!(s.chunk_size, 1000);
        assert_eq!(s.chunk_overlap, 200);
        assert!((s.dedup_threshold - 0.85).abs() < f64::EPSILON);
        assert!(s.ocr_enabled);
        assert!(!s.dev_embeddings);
    }

    #[test]
    fn test_strictness_parse() {
        assert_eq!(Strictness::parse("low").unwrap(), Strictness::Low);
        assert_eq!(Strictness::parse("MEDIUM").unwrap(), Strictness::Medium);
        assert_eq!(Strictness::parse("high").unwrap(), Strictness::High);
        assert!(Strictness::parse("extreme").is_err());
    }

    #[test]
    fn test_strip_sqlite_scheme() {
        assert_eq!(strip_sqlite_scheme("sqlite:///tmp/a.db"), "/tmp/a.db");
        assert_eq!(strip_sqlite_scheme("sqlite:a.db"), "a.db");
        assert_eq!(strip_sqlite_scheme("/plain/path.db"), "/plain/path.db");
    }

    #[test]
    fn test_validate_overlap() {
        let s = Settings {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_threshold_range() {
        let s = Settings {
            dedup_threshold: 1.5,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", "true").unwrap());
        assert!(parse_bool("X", "1").unwrap());
        assert!(!parse_bool("X", "off").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }
}
