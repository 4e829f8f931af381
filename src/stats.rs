//! Aggregate reporting over stored sessions and certificates.

use crate::store::{RecordStore, SortSpec, StoreResult};
use crate::{Certificate, Platform, SessionStatus, WipeSession};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_sessions: usize,
    pub completed_sessions: usize,
    pub total_certificates: usize,
    /// Sum of `size_gb` over completed sessions
    pub total_data_wiped_gb: u64,
    /// Rounded mean over all sessions, sessions without a score counting as 0
    pub average_health_score: u32,
    /// Pending, health check or wiping
    pub active_sessions: usize,
    pub sessions_by_platform: BTreeMap<Platform, usize>,
    /// `YYYY-MM` of session creation to GB recorded that month
    pub data_wiped_by_month: BTreeMap<String, u64>,
}

impl DashboardStats {
    pub fn compute(sessions: &[WipeSession], certificates: &[Certificate]) -> Self {
        let completed: Vec<&WipeSession> = sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Completed)
            .collect();

        let average_health_score = if sessions.is_empty() {
            0
        } else {
            let total: u64 = sessions
                .iter()
                .map(|s| u64::from(s.health_score.unwrap_or(0)))
                .sum();
            (total as f64 / sessions.len() as f64).round() as u32
        };

        let mut sessions_by_platform = BTreeMap::new();
        let mut data_wiped_by_month = BTreeMap::new();
        for session in sessions {
            *sessions_by_platform.entry(session.platform).or_insert(0) += 1;
            *data_wiped_by_month
                .entry(session.created_date.format("%Y-%m").to_string())
                .or_insert(0) += session.size_gb.unwrap_or(0);
        }

        Self {
            total_sessions: sessions.len(),
            completed_sessions: completed.len(),
            total_certificates: certificates.len(),
            total_data_wiped_gb: completed.iter().filter_map(|s| s.size_gb).sum(),
            average_health_score,
            active_sessions: sessions.iter().filter(|s| s.status.is_active()).count(),
            sessions_by_platform,
            data_wiped_by_month,
        }
    }

    pub fn load(store: &dyn RecordStore) -> StoreResult<Self> {
        let sessions = store.list_sessions(&SortSpec::unsorted())?;
        let certificates = store.list_certificates(&SortSpec::unsorted())?;
        Ok(Self::compute(&sessions, &certificates))
    }
}

/// Case-insensitive substring search over id, organization and target
pub fn search_certificates<'a>(
    certificates: &'a [Certificate],
    term: &str,
) -> Vec<&'a Certificate> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return certificates.iter().collect();
    }

    certificates
        .iter()
        .filter(|c| {
            c.certificate_id.to_lowercase().contains(&term)
                || c.organization.to_lowercase().contains(&term)
                || c.target_description.to_lowercase().contains(&term)
        })
        .collect()
}
