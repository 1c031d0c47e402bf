/// Retention policy for completed jobs
use super::models::{DownloadJob, JobStatus};

/// Ids of completed jobs beyond the `keep_last` most recently finished.
///
/// Jobs without a finish time rank by creation time.
pub fn completed_beyond(jobs: &[DownloadJob], keep_last: usize) -> Vec<String> {
    let mut completed: Vec<&DownloadJob> = jobs
        .iter()
        .filter(|job| job.status == JobStatus::Completed)
        .collect();

    completed.sort_by(|a, b| {
        let a_key = a.finished_at.unwrap_or(a.created_at);
        let b_key = b.finished_at.unwrap_or(b.created_at);
        b_key.cmp(&a_key).then_with(|| b.id.cmp(&a.id))
    });

    completed
        .into_iter()
        .skip(keep_last)
        .map(|job| job.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::DownloadOptions;
    use chrono::{Duration, Utc};

    fn job(id: &str, status: JobStatus, finished_minutes_ago: i64) -> DownloadJob {
        let mut job = DownloadJob::new("https://x.example", "e", "out", &DownloadOptions::default());
        job.id = id.to_string();
        job.status = status;
        job.finished_at = Some(Utc::now() - Duration::minutes(finished_minutes_ago));
        job
    }

    #[test]
    fn test_keeps_most_recently_finished() {
        let jobs = vec![
            job("old", JobStatus::Completed, 30),
            job("new", JobStatus::Completed, 1),
            job("mid", JobStatus::Completed, 10),
            job("failed", JobStatus::Failed, 100),
        ];

        let mut doomed = completed_beyond(&jobs, 1);
        doomed.sort();
        assert_eq!(doomed, vec!["mid".to_string(), "old".to_string()]);
    }

    #[test]
    fn test_keep_more_than_present() {
        let jobs = vec![job("a", JobStatus::Completed, 1)];
        assert!(completed_beyond(&jobs, 5).is_empty());
        assert_eq!(completed_beyond(&jobs, 0), vec!["a".to_string()]);
    }
}
