use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::storage::types::job::CodeLanguage;

pub const TEST_CASES_FILE: &str = "test_cases_inputs_and_expected.json";
pub const LIMITS_FILE: &str = "exec_time_and_memory_limits.json";
pub const LANGUAGE_BONUS_FILE: &str = "exec_time_and_memory_language_bonus.json";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid challenge id '{key}' in {path}")]
    InvalidChallengeId { path: PathBuf, key: String },
}

/// Read-only lookup of the test cases attached to each challenge.
#[cfg_attr(test, mockall::automock)]
pub trait TestCaseCatalog: Send + Sync {
    /// Number of test cases for the challenge, `None` when the challenge is unknown.
    fn test_case_count(&self, challenge_id: i64) -> Option<u32>;

    /// Per-test time limit in seconds, including the language's bonus.
    fn time_limit(&self, challenge_id: i64, language: CodeLanguage) -> Option<f64>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LimitsDocument {
    #[serde(default)]
    time_limits: HashMap<String, f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LanguageBonusDocument {
    #[serde(default)]
    time_bonus: HashMap<String, f64>,
}

/// Catalog built from the JSON documents shipped alongside the judge workers.
#[derive(Debug, Clone, Default)]
pub struct JsonTestCaseCatalog {
    test_case_counts: HashMap<i64, u32>,
    time_limits: HashMap<i64, f64>,
    time_bonus: HashMap<CodeLanguage, f64>,
}

impl JsonTestCaseCatalog {
    /// Loads the catalog from `dir`.
    ///
    /// The test-case and limit documents are required; the language bonus
    /// document is optional and missing languages use their built-in bonus.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let dir = dir.as_ref();

        let cases_path = dir.join(TEST_CASES_FILE);
        let cases: HashMap<String, Vec<serde_json::Value>> = read_json(&cases_path)?;
        let test_case_counts = cases
            .into_iter()
            .map(|(key, cases)| {
                let id = parse_challenge_id(&cases_path, &key)?;
                Ok((id, u32::try_from(cases.len()).unwrap_or(u32::MAX)))
            })
            .collect::<Result<HashMap<_, _>, CatalogError>>()?;

        let limits_path = dir.join(LIMITS_FILE);
        let limits: LimitsDocument = read_json(&limits_path)?;
        let time_limits = limits
            .time_limits
            .into_iter()
            .map(|(key, limit)| Ok((parse_challenge_id(&limits_path, &key)?, limit)))
            .collect::<Result<HashMap<_, _>, CatalogError>>()?;

        let bonus_path = dir.join(LANGUAGE_BONUS_FILE);
        let time_bonus = if bonus_path.exists() {
            let bonus: LanguageBonusDocument = read_json(&bonus_path)?;
            bonus
                .time_bonus
                .into_iter()
                .filter_map(|(language, secs)| {
                    language.parse::<CodeLanguage>().ok().map(|l| (l, secs))
                })
                .collect()
        } else {
            HashMap::new()
        };

        info!(
            challenges = test_case_counts.len(),
            dir = %dir.display(),
            "Loaded test case catalog"
        );

        Ok(Self {
            test_case_counts,
            time_limits,
            time_bonus,
        })
    }

    /// Registers a challenge directly, bypassing the JSON documents.
    #[must_use]
    pub fn with_challenge(mut self, challenge_id: i64, test_cases: u32, time_limit: f64) -> Self {
        self.test_case_counts.insert(challenge_id, test_cases);
        self.time_limits.insert(challenge_id, time_limit);
        self
    }
}

impl TestCaseCatalog for JsonTestCaseCatalog {
    fn test_case_count(&self, challenge_id: i64) -> Option<u32> {
        self.test_case_counts.get(&challenge_id).copied()
    }

    fn time_limit(&self, challenge_id: i64, language: CodeLanguage) -> Option<f64> {
        let base = self.time_limits.get(&challenge_id)?;
        let bonus = self
            .time_bonus
            .get(&language)
            .copied()
            .unwrap_or_else(|| language.default_time_bonus_secs());
        Some(base + bonus)
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, CatalogError> {
    let raw = fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_challenge_id(path: &Path, key: &str) -> Result<i64, CatalogError> {
    key.trim()
        .parse()
        .map_err(|_| CatalogError::InvalidChallengeId {
            path: path.to_path_buf(),
            key: key.to_string(),
        })
}
