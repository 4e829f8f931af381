// Allow complex types where needed for capability trait objects and progress channels
#![allow(clippy::type_complexity)]

pub mod cancel;
pub mod config;
pub mod crypto;
pub mod executor;
pub mod health;
pub mod progress;
pub mod simulation;
pub mod stats;
pub mod store;
pub(crate) mod supervisor;
pub mod verification;
pub mod wipe_orchestrator;

// Re-export the workflow entry points for convenience
pub use cancel::CancelFlag;
pub use wipe_orchestrator::{SessionForm, WipeWorkflow, WorkflowState};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Certificates stay valid for one year from issuance
pub const CERTIFICATE_VALIDITY_DAYS: i64 = 365;

// ==================== ERRORS ====================

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Operation '{operation}' is not allowed in state {state}")]
    InvalidTransition {
        operation: &'static str,
        state: WorkflowState,
    },

    #[error("A {operation} is already in progress for session {session_id}")]
    AlreadyRunning {
        operation: Operation,
        session_id: String,
    },

    #[error("{operation} capability failed: {source}")]
    Capability {
        operation: Operation,
        #[source]
        source: CapabilityError,
    },

    #[error("{operation} stalled: no progress for {after:?}")]
    Stalled {
        operation: Operation,
        after: std::time::Duration,
    },

    #[error("{0} cancelled")]
    Cancelled(Operation),

    #[error("Record store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Certificate issuance failed: {0}")]
    Issuance(String),
}

impl WorkflowError {
    /// Whether the user can retry the same step without restarting the session
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkflowError::Capability { .. }
                | WorkflowError::Stalled { .. }
                | WorkflowError::Store(_)
                | WorkflowError::Issuance(_)
        )
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Failure reported by an external capability (health probe, overwriter, extractor)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    #[error("malformed capability output: {0}")]
    Malformed(String),

    #[error("capability failed: {0}")]
    Failed(String),

    #[error("operation interrupted")]
    Interrupted,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ==================== ENUMERATIONS ====================

/// Long-running operations the workflow delegates to capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    HealthCheck,
    Wipe,
    Extraction,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::HealthCheck => write!(f, "health check"),
            Operation::Wipe => write!(f, "wipe"),
            Operation::Extraction => write!(f, "document extraction"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WipeType {
    Folder,
    FullDisk,
}

impl WipeType {
    pub const ALL: [WipeType; 2] = [WipeType::Folder, WipeType::FullDisk];

    pub fn as_str(&self) -> &'static str {
        match self {
            WipeType::Folder => "folder",
            WipeType::FullDisk => "full_disk",
        }
    }
}

impl fmt::Display for WipeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WipeType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WipeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("wipe type", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Windows,
    Linux,
    Mac,
    Android,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Windows,
        Platform::Linux,
        Platform::Mac,
        Platform::Android,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Mac => "mac",
            Platform::Android => "android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("platform", s))
    }
}

/// The fixed catalog of selectable overwrite algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WipeMethod {
    #[serde(rename = "dod_3_pass")]
    Dod3Pass,
    #[serde(rename = "dod_7_pass")]
    Dod7Pass,
    #[serde(rename = "gutmann_35_pass")]
    Gutmann35Pass,
    #[serde(rename = "random_single")]
    RandomSingle,
    #[serde(rename = "zero_fill")]
    ZeroFill,
}

impl WipeMethod {
    /// Catalog order, as presented to the user
    pub const CATALOG: [WipeMethod; 5] = [
        WipeMethod::Dod3Pass,
        WipeMethod::Dod7Pass,
        WipeMethod::Gutmann35Pass,
        WipeMethod::RandomSingle,
        WipeMethod::ZeroFill,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WipeMethod::Dod3Pass => "dod_3_pass",
            WipeMethod::Dod7Pass => "dod_7_pass",
            WipeMethod::Gutmann35Pass => "gutmann_35_pass",
            WipeMethod::RandomSingle => "random_single",
            WipeMethod::ZeroFill => "zero_fill",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WipeMethod::Dod3Pass => "DoD 5220.22-M (3 Pass)",
            WipeMethod::Dod7Pass => "DoD 5220.22-M (7 Pass)",
            WipeMethod::Gutmann35Pass => "Gutmann Method (35 Pass)",
            WipeMethod::RandomSingle => "Single Random Pass",
            WipeMethod::ZeroFill => "Zero Fill",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            WipeMethod::Dod3Pass => "Standard military wiping",
            WipeMethod::Dod7Pass => "Enhanced security",
            WipeMethod::Gutmann35Pass => "Maximum security",
            WipeMethod::RandomSingle => "Fast wiping",
            WipeMethod::ZeroFill => "Basic overwrite",
        }
    }

    /// Number of overwrite passes the algorithm performs
    pub fn passes(&self) -> u32 {
        match self {
            WipeMethod::Dod3Pass => 3,
            WipeMethod::Dod7Pass => 7,
            WipeMethod::Gutmann35Pass => 35,
            WipeMethod::RandomSingle | WipeMethod::ZeroFill => 1,
        }
    }

    /// Standards a certificate issued for this algorithm attests to
    pub fn compliance_standards(&self) -> &'static [&'static str] {
        match self {
            WipeMethod::Dod3Pass | WipeMethod::Dod7Pass => &["DoD 5220.22-M", "NIST 800-88"],
            WipeMethod::Gutmann35Pass => &["Gutmann 35-Pass", "NIST 800-88"],
            WipeMethod::RandomSingle | WipeMethod::ZeroFill => &["NIST 800-88"],
        }
    }
}

impl fmt::Display for WipeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WipeMethod {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WipeMethod::CATALOG
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("wipe method", s))
    }
}

/// Persisted lifecycle status of a wipe session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    HealthCheck,
    Wiping,
    Completed,
    Aborted,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 5] = [
        SessionStatus::Pending,
        SessionStatus::HealthCheck,
        SessionStatus::Wiping,
        SessionStatus::Completed,
        SessionStatus::Aborted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::HealthCheck => "health_check",
            SessionStatus::Wiping => "wiping",
            SessionStatus::Completed => "completed",
            SessionStatus::Aborted => "aborted",
        }
    }

    /// Sessions that have neither completed nor been aborted
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionStatus::Pending | SessionStatus::HealthCheck | SessionStatus::Wiping
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("session status", s))
    }
}

// ==================== RECORDS ====================

/// Health report fields stored verbatim on the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthDetails {
    pub bad_sectors: u32,
    pub temperature: i32,
    pub read_errors: u32,
    pub write_errors: u32,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WipeSession {
    pub id: String,
    pub session_name: String,
    pub wipe_type: WipeType,
    pub target_path: String,
    pub platform: Platform,
    pub wipe_method: Option<WipeMethod>,
    pub organization: Option<String>,
    pub status: SessionStatus,
    pub health_score: Option<u8>,
    pub health_details: Option<HealthDetails>,
    pub size_gb: Option<u64>,
    pub duration_minutes: Option<u64>,
    pub certificate_id: Option<String>,
    pub created_date: DateTime<Utc>,
}

/// Data supplied when creating a session; the store assigns id and created_date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWipeSession {
    pub session_name: String,
    pub wipe_type: WipeType,
    pub target_path: String,
    pub platform: Platform,
    pub organization: Option<String>,
}

impl NewWipeSession {
    pub fn into_record(self, id: String, created_date: DateTime<Utc>) -> WipeSession {
        WipeSession {
            id,
            session_name: self.session_name,
            wipe_type: self.wipe_type,
            target_path: self.target_path,
            platform: self.platform,
            wipe_method: None,
            organization: self.organization,
            status: SessionStatus::Pending,
            health_score: None,
            health_details: None,
            size_gb: None,
            duration_minutes: None,
            certificate_id: None,
            created_date,
        }
    }
}

/// Partial update applied to a stored session. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPatch {
    pub session_name: Option<String>,
    pub wipe_type: Option<WipeType>,
    pub target_path: Option<String>,
    pub platform: Option<Platform>,
    pub organization: Option<Option<String>>,
    pub wipe_method: Option<WipeMethod>,
    pub status: Option<SessionStatus>,
    pub health_score: Option<u8>,
    pub health_details: Option<HealthDetails>,
    pub size_gb: Option<u64>,
    pub duration_minutes: Option<u64>,
    pub certificate_id: Option<String>,
}

impl SessionPatch {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn apply(self, session: &mut WipeSession) {
        if let Some(v) = self.session_name {
            session.session_name = v;
        }
        if let Some(v) = self.wipe_type {
            session.wipe_type = v;
        }
        if let Some(v) = self.target_path {
            session.target_path = v;
        }
        if let Some(v) = self.platform {
            session.platform = v;
        }
        if let Some(v) = self.organization {
            session.organization = v;
        }
        if let Some(v) = self.wipe_method {
            session.wipe_method = Some(v);
        }
        if let Some(v) = self.status {
            session.status = v;
        }
        if let Some(v) = self.health_score {
            session.health_score = Some(v);
        }
        if let Some(v) = self.health_details {
            session.health_details = Some(v);
        }
        if let Some(v) = self.size_gb {
            session.size_gb = Some(v);
        }
        if let Some(v) = self.duration_minutes {
            session.duration_minutes = Some(v);
        }
        if let Some(v) = self.certificate_id {
            session.certificate_id = Some(v);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub id: String,
    pub certificate_id: String,
    pub session_id: String,
    pub organization: String,
    pub target_description: String,
    pub wipe_standard: WipeMethod,
    pub verification_hash: String,
    pub created_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub is_verified: bool,
    pub compliance_standards: Vec<String>,
}

/// Certificate content derived by the issuer; the store assigns id and created_date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCertificate {
    pub certificate_id: String,
    pub session_id: String,
    pub organization: String,
    pub target_description: String,
    pub wipe_standard: WipeMethod,
    pub verification_hash: String,
    pub compliance_standards: Vec<String>,
}

impl NewCertificate {
    pub fn into_record(self, id: String, created_date: DateTime<Utc>) -> Certificate {
        Certificate {
            id,
            certificate_id: self.certificate_id,
            session_id: self.session_id,
            organization: self.organization,
            target_description: self.target_description,
            wipe_standard: self.wipe_standard,
            verification_hash: self.verification_hash,
            created_date,
            expiry_date: created_date + Duration::days(CERTIFICATE_VALIDITY_DAYS),
            is_verified: true,
            compliance_standards: self.compliance_standards,
        }
    }
}

#[cfg(test)]
mod lib_tests;
