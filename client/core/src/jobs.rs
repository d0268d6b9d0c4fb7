//! Background Generation Jobs
//!
//! Image and video synthesis runs server-side and can outlive the request
//! that started it. The [`JobBoard`] holds the single visible set of jobs for
//! the active session: it is replaced by `generation_start`, nudged by
//! progress frames from the side-channel and emptied when the work finishes
//! or fails.

use serde::{Deserialize, Serialize};

/// Kind of media a job produces
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Still image synthesis
    Image,
    /// Video synthesis
    Video,
}

/// Lifecycle of a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Still rendering
    Generating,
    /// Finished successfully
    Complete,
    /// Failed terminally
    Error,
}

/// A job announced by a `generation_start` frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// What the job produces
    #[serde(rename = "type")]
    pub kind: JobKind,
    /// Prompt the job renders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Requested duration in seconds (video only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

/// A visible background job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    /// What the job produces
    pub kind: JobKind,
    /// Prompt the job renders
    pub prompt: Option<String>,
    /// Duration in seconds (video only)
    pub duration: Option<f64>,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Current status
    pub status: JobStatus,
    /// Latest status text from the server
    pub detail: Option<String>,
}

impl GenerationJob {
    /// A freshly started job
    #[must_use]
    pub fn generating(kind: JobKind) -> Self {
        Self {
            kind,
            prompt: None,
            duration: None,
            progress: 0,
            status: JobStatus::Generating,
            detail: None,
        }
    }

    /// Get a progress bar string
    #[must_use]
    pub fn progress_bar(&self, width: usize) -> String {
        let filled = (self.progress as usize * width) / 100;
        let empty = width.saturating_sub(filled);

        format!("{}{}", "█".repeat(filled), "░".repeat(empty))
    }
}

impl From<&JobRequest> for GenerationJob {
    fn from(request: &JobRequest) -> Self {
        Self {
            prompt: request.prompt.clone(),
            duration: request.duration,
            ..Self::generating(request.kind)
        }
    }
}

/// Convert a 0..1 fraction into a clamped percentage
#[must_use]
pub fn fraction_to_percent(fraction: f64) -> u8 {
    if fraction.is_nan() {
        return 0;
    }
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// The single visible set of jobs for a session
#[derive(Clone, Debug, Default)]
pub struct JobBoard {
    jobs: Vec<GenerationJob>,
}

impl JobBoard {
    /// Create an empty board
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently visible jobs
    #[must_use]
    pub fn jobs(&self) -> &[GenerationJob] {
        &self.jobs
    }

    /// Whether nothing is visible
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Replace the visible set with newly announced jobs
    pub fn start(&mut self, requests: &[JobRequest]) {
        self.jobs = requests.iter().map(GenerationJob::from).collect();
    }

    /// Apply a progress update from the side-channel
    ///
    /// Progress frames do not say which job they belong to, so they update
    /// the first visible job. When nothing is visible yet a default video job
    /// is created so the progress bar has something to attach to.
    pub fn apply_progress(&mut self, fraction: f64, detail: Option<&str>, duration: Option<f64>) {
        if self.jobs.is_empty() {
            self.jobs.push(GenerationJob::generating(JobKind::Video));
        }
        let job = &mut self.jobs[0];
        job.progress = fraction_to_percent(fraction);
        job.status = JobStatus::Generating;
        if let Some(detail) = detail {
            job.detail = Some(detail.to_string());
        }
        if duration.is_some() {
            job.duration = duration;
        }
    }

    /// Finished or failed jobs are removed from view
    pub fn clear(&mut self) {
        self.jobs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_creates_default_video_job() {
        let mut board = JobBoard::new();
        board.apply_progress(0.42, Some("rendering frames"), Some(6.0));

        assert_eq!(board.jobs().len(), 1);
        let job = &board.jobs()[0];
        assert_eq!(job.kind, JobKind::Video);
        assert_eq!(job.progress, 42);
        assert_eq!(job.detail.as_deref(), Some("rendering frames"));
        assert_eq!(job.duration, Some(6.0));
    }

    #[test]
    fn test_start_replaces_visible_set() {
        let mut board = JobBoard::new();
        board.apply_progress(0.5, None, None);
        board.start(&[
            JobRequest {
                kind: JobKind::Image,
                prompt: Some("a cat".into()),
                duration: None,
            },
            JobRequest {
                kind: JobKind::Video,
                prompt: None,
                duration: Some(4.0),
            },
        ]);

        assert_eq!(board.jobs().len(), 2);
        assert_eq!(board.jobs()[0].progress, 0);
        assert_eq!(board.jobs()[0].prompt.as_deref(), Some("a cat"));
    }

    #[test]
    fn test_fraction_is_clamped() {
        assert_eq!(fraction_to_percent(-1.0), 0);
        assert_eq!(fraction_to_percent(1.7), 100);
        assert_eq!(fraction_to_percent(f64::NAN), 0);
        assert_eq!(fraction_to_percent(0.256), 26);
    }

    #[test]
    fn test_progress_bar() {
        let mut job = GenerationJob::generating(JobKind::Image);
        job.progress = 50;
        assert_eq!(job.progress_bar(4), "██░░");
    }
}
