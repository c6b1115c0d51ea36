//! Job status tracking

use serde::{Deserialize, Serialize};

/// Lifecycle of a submitted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting for an in-flight slot
    Pending,
    /// Sent to the prover pool
    Proving,
    /// Proof received
    Completed,
    /// Prover reported an error or the pool went away
    Failed { error: String },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed { .. })
    }
}

/// Counter snapshot over all tracked jobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub total: usize,
    pub pending: usize,
    pub proving: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusSummary {
    pub fn from_statuses<'a>(statuses: impl IntoIterator<Item = &'a JobStatus>) -> Self {
        let mut summary = Self::default();
        for status in statuses {
            summary.total += 1;
            match status {
                JobStatus::Pending => summary.pending += 1,
                JobStatus::Proving => summary.proving += 1,
                JobStatus::Completed => summary.completed += 1,
                JobStatus::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }

    /// Jobs not yet finished.
    pub fn in_flight(&self) -> usize {
        self.pending + self.proving
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let statuses = [
            JobStatus::Pending,
            JobStatus::Proving,
            JobStatus::Proving,
            JobStatus::Completed,
            JobStatus::Failed {
                error: "boom".into(),
            },
        ];
        let summary = StatusSummary::from_statuses(&statuses);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.in_flight(), 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert!(statuses[4].is_finished());
        assert!(!statuses[1].is_finished());
    }
}
