use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, storage::job_store::StoreError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CodeLanguage {
    #[serde(rename = "java17")]
    Java17,
    #[serde(rename = "nodejs20")]
    NodeJs20,
    #[serde(rename = "nodejs20esm")]
    NodeJs20Esm,
    #[serde(rename = "python3")]
    Python3,
}

impl CodeLanguage {
    pub const ALL: [CodeLanguage; 4] = [
        CodeLanguage::Java17,
        CodeLanguage::NodeJs20,
        CodeLanguage::NodeJs20Esm,
        CodeLanguage::Python3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CodeLanguage::Java17 => "java17",
            CodeLanguage::NodeJs20 => "nodejs20",
            CodeLanguage::NodeJs20Esm => "nodejs20esm",
            CodeLanguage::Python3 => "python3",
        }
    }

    /// Extra seconds per test case granted on top of the challenge's base limit.
    pub fn default_time_bonus_secs(&self) -> f64 {
        match self {
            CodeLanguage::Java17 => 1.0,
            CodeLanguage::NodeJs20 | CodeLanguage::NodeJs20Esm | CodeLanguage::Python3 => 0.0,
        }
    }
}

impl fmt::Display for CodeLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeLanguage {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|language| language.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::Validation(format!("Unsupported code language '{s}'")))
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    #[serde(rename = "ready")]
    #[default]
    Ready,
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "stopped")]
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ready => "ready",
            JobStatus::InProgress => "in progress",
            JobStatus::Complete => "complete",
            JobStatus::Stopped => "stopped",
        }
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(JobStatus::Ready),
            "in progress" => Ok(JobStatus::InProgress),
            "complete" => Ok(JobStatus::Complete),
            "stopped" => Ok(JobStatus::Stopped),
            other => Err(StoreError::CorruptRecord(format!("unknown status '{other}'"))),
        }
    }
}

/// A submitted grading request.
///
/// Identity, owner, challenge, language, source and test-case count are fixed
/// at creation. Only `status` (written by workers) and `stop_flag` change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub user_id: i64,
    pub challenge_id: i64,
    pub code_language: CodeLanguage,
    pub source_code: String,
    pub total_test_cases: u32,
    pub status: JobStatus,
    pub stop_flag: bool,
    pub created_at: DateTime<Utc>,
}

pub const FIELD_JOB_ID: &str = "job_id";
pub const FIELD_USER_ID: &str = "user_id";
pub const FIELD_CHALLENGE_ID: &str = "challenge_id";
pub const FIELD_CODE_LANGUAGE: &str = "code_language";
pub const FIELD_SOURCE_CODE: &str = "source_code";
pub const FIELD_TOTAL_TEST_CASES: &str = "total_test_cases";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_STOP_FLAG: &str = "stop_flag";
pub const FIELD_CREATED_AT: &str = "created_at";

impl Job {
    pub fn new(
        user_id: i64,
        challenge_id: i64,
        code_language: CodeLanguage,
        source_code: String,
        total_test_cases: u32,
    ) -> Result<Self, AppError> {
        if total_test_cases == 0 {
            return Err(AppError::Validation(format!(
                "Challenge {challenge_id} has no test cases"
            )));
        }

        Ok(Self {
            job_id: Uuid::new_v4().to_string(),
            user_id,
            challenge_id,
            code_language,
            source_code,
            total_test_cases,
            status: JobStatus::Ready,
            stop_flag: false,
            created_at: Utc::now(),
        })
    }

    /// Flattens the job into the field/value pairs persisted by the store.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (FIELD_JOB_ID, self.job_id.clone()),
            (FIELD_USER_ID, self.user_id.to_string()),
            (FIELD_CHALLENGE_ID, self.challenge_id.to_string()),
            (FIELD_CODE_LANGUAGE, self.code_language.as_str().to_string()),
            (FIELD_SOURCE_CODE, self.source_code.clone()),
            (FIELD_TOTAL_TEST_CASES, self.total_test_cases.to_string()),
            (FIELD_STATUS, self.status.as_str().to_string()),
            (FIELD_STOP_FLAG, encode_flag(self.stop_flag)),
            (FIELD_CREATED_AT, self.created_at.to_rfc3339()),
        ]
    }

    /// Rebuilds a job from a persisted flat record.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, StoreError> {
        let field = |name: &str| {
            fields
                .get(name)
                .ok_or_else(|| StoreError::CorruptRecord(format!("missing field '{name}'")))
        };
        let number = |name: &str| {
            field(name)?.parse::<i64>().map_err(|e| {
                StoreError::CorruptRecord(format!("field '{name}' is not a number: {e}"))
            })
        };

        let total_test_cases = field(FIELD_TOTAL_TEST_CASES)?
            .parse::<u32>()
            .map_err(|e| StoreError::CorruptRecord(format!("bad total_test_cases: {e}")))?;
        let code_language = field(FIELD_CODE_LANGUAGE)?
            .parse::<CodeLanguage>()
            .map_err(|e| StoreError::CorruptRecord(e.to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(field(FIELD_CREATED_AT)?)
            .map_err(|e| StoreError::CorruptRecord(format!("bad created_at: {e}")))?
            .with_timezone(&Utc);

        Ok(Self {
            job_id: field(FIELD_JOB_ID)?.clone(),
            user_id: number(FIELD_USER_ID)?,
            challenge_id: number(FIELD_CHALLENGE_ID)?,
            code_language,
            source_code: field(FIELD_SOURCE_CODE)?.clone(),
            total_test_cases,
            status: field(FIELD_STATUS)?.parse()?,
            stop_flag: decode_flag(field(FIELD_STOP_FLAG)?)?,
            created_at,
        })
    }
}

/// Mutation applied to a stored job.
///
/// The stop flag can only ever be raised; there is no way to express clearing it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JobUpdate {
    stop: bool,
}

impl JobUpdate {
    pub fn stop() -> Self {
        Self { stop: true }
    }

    pub fn is_empty(&self) -> bool {
        !self.stop
    }

    pub fn to_fields(self) -> Vec<(&'static str, String)> {
        let mut fields = Vec::new();
        if self.stop {
            fields.push((FIELD_STOP_FLAG, encode_flag(true)));
        }
        fields
    }

    pub fn apply(self, job: &mut Job) {
        if self.stop {
            job.stop_flag = true;
        }
    }
}

fn encode_flag(flag: bool) -> String {
    (if flag { "1" } else { "0" }).to_string()
}

fn decode_flag(value: &str) -> Result<bool, StoreError> {
    match value {
        "1" | "true" | "True" => Ok(true),
        "0" | "false" | "False" => Ok(false),
        other => Err(StoreError::CorruptRecord(format!("bad stop_flag '{other}'"))),
    }
}
