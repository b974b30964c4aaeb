use desam_protocol::JobSubmission;

use crate::authority::AuthorityFuture;

/// The job submission service.
///
/// Receives the job together with its resolved data dependencies and
/// returns the identifier it assigned to the job.
pub trait JobSubmitter: Send + Sync {
    fn submit_job(&self, submission: JobSubmission) -> AuthorityFuture<'_, String>;
}
