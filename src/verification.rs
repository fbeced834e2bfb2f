//! Tasker verification workflow
//!
//! `verification_status` moves `unsubmitted -> pending -> approved | rejected`
//! and a rejected tasker may resubmit. The submission row is the record of
//! truth; the profile's copy of the status is a mirror written second. When
//! the mirror write fails the operation still succeeds, reports
//! `profile_synced = false`, and [`VerificationWorkflow::resync_profile`]
//! repairs it later.

use crate::backend::Backend;
use crate::documents::{DocumentKind, DocumentStore, Upload};
use crate::error::{Error, Result, StatusLabel, ValidationError};
use crate::models::{Profile, ReviewUpdate, Role, VerificationStatus, VerificationSubmission};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Check a status change, independent of who asks for it
pub fn ensure_transition(
    from: Option<VerificationStatus>,
    to: VerificationStatus,
) -> std::result::Result<(), ValidationError> {
    use VerificationStatus::*;
    let allowed = matches!(
        (from, to),
        (None | Some(Pending) | Some(Rejected), Pending) | (Some(Pending), Approved | Rejected)
    );
    if allowed {
        Ok(())
    } else {
        Err(ValidationError::InvalidTransition {
            from: StatusLabel(from),
            to,
        })
    }
}

/// What the tasker filled in. Documents left out keep whatever the prior
/// submission stored.
#[derive(Debug, Clone, Default)]
pub struct SubmissionForm {
    pub service_category: String,
    pub national_id_number: String,
    pub bio: Option<String>,
    pub hourly_rate: Option<f64>,
    pub operating_radius: Option<f64>,
    pub documents: Vec<(DocumentKind, Upload)>,
}

impl SubmissionForm {
    pub fn new(service_category: &str, national_id_number: &str) -> Self {
        Self {
            service_category: service_category.to_string(),
            national_id_number: national_id_number.to_string(),
            ..Default::default()
        }
    }

    pub fn with_document(mut self, kind: DocumentKind, upload: Upload) -> Self {
        self.documents.retain(|(k, _)| *k != kind);
        self.documents.push((kind, upload));
        self
    }

    pub fn with_bio(mut self, bio: &str) -> Self {
        self.bio = Some(bio.to_string());
        self
    }

    pub fn with_hourly_rate(mut self, rate: f64) -> Self {
        self.hourly_rate = Some(rate);
        self
    }

    pub fn with_operating_radius(mut self, km: f64) -> Self {
        self.operating_radius = Some(km);
        self
    }

    fn check_fields(&self) -> std::result::Result<(), ValidationError> {
        if self.service_category.trim().is_empty() {
            return Err(ValidationError::MissingField("service category"));
        }
        if self.national_id_number.trim().is_empty() {
            return Err(ValidationError::MissingField("national ID number"));
        }
        Ok(())
    }
}

/// Result of a submission
#[derive(Debug)]
pub struct SubmitReport {
    pub submission: VerificationSubmission,
    /// Optional documents that were skipped or failed to upload
    pub warnings: Vec<Error>,
    /// False when the profile mirror could not be written
    pub profile_synced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Reject { reason: String },
}

impl ReviewDecision {
    pub fn reject(reason: &str) -> Self {
        ReviewDecision::Reject {
            reason: reason.to_string(),
        }
    }

    fn status(&self) -> VerificationStatus {
        match self {
            ReviewDecision::Approve => VerificationStatus::Approved,
            ReviewDecision::Reject { .. } => VerificationStatus::Rejected,
        }
    }
}

#[derive(Debug)]
pub struct ReviewReport {
    pub status: VerificationStatus,
    pub profile_synced: bool,
}

fn stored_ref(submission: &VerificationSubmission, kind: DocumentKind) -> Option<&String> {
    let r = match kind {
        DocumentKind::IdDocument => &submission.id_document_ref,
        DocumentKind::PassportPhoto => &submission.passport_photo_ref,
        DocumentKind::Certificate => &submission.certificate_ref,
        DocumentKind::Cv => &submission.cv_ref,
    };
    r.as_ref().filter(|s| !s.trim().is_empty())
}

#[derive(Clone)]
pub struct VerificationWorkflow {
    backend: Arc<dyn Backend>,
    documents: DocumentStore,
}

impl VerificationWorkflow {
    pub fn new(backend: Arc<dyn Backend>, documents: DocumentStore) -> Self {
        Self { backend, documents }
    }

    /// The tasker's current submission, for prefilling the form
    pub async fn current(&self, user_id: &str) -> Result<Option<VerificationSubmission>> {
        self.backend.fetch_submission(user_id).await
    }

    /// Submit or resubmit for review
    pub async fn submit(&self, user_id: &str, form: SubmissionForm) -> Result<SubmitReport> {
        form.check_fields()?;

        let mut warnings: Vec<Error> = Vec::new();
        let mut uploads = Vec::new();
        for (kind, upload) in form.documents.iter() {
            match self.documents.check(*kind, upload) {
                Ok(()) => uploads.push((*kind, upload)),
                Err(e) if kind.is_required() => return Err(e.into()),
                Err(e) => {
                    warn!(user_id, error = %e, "skipping {}", kind);
                    warnings.push(e.into());
                }
            }
        }

        self.ensure_tasker(user_id).await?;
        let prior = self.backend.fetch_submission(user_id).await?;
        ensure_transition(prior.as_ref().map(|p| p.status), VerificationStatus::Pending)?;

        for kind in DocumentKind::ALL.iter().filter(|k| k.is_required()) {
            let fresh = uploads.iter().any(|(k, _)| k == kind);
            let kept = prior.as_ref().and_then(|p| stored_ref(p, *kind)).is_some();
            if !fresh && !kept {
                return Err(ValidationError::MissingDocument(kind.label()).into());
            }
        }

        // Each upload stands alone; a failure does not undo the others.
        let mut stored: Vec<(DocumentKind, String)> = Vec::new();
        let mut failed_required = None;
        for (kind, upload) in uploads {
            match self.documents.upload_document(user_id, kind, upload).await {
                Ok(key) => stored.push((kind, key)),
                Err(e) if kind.is_required() => {
                    error!(user_id, error = %e, "required document upload failed");
                    if failed_required.is_none() {
                        failed_required = Some(e);
                    }
                }
                Err(e) => {
                    warn!(user_id, error = %e, "optional document upload failed");
                    warnings.push(e);
                }
            }
        }
        if let Some(e) = failed_required {
            return Err(e);
        }

        let reference = |kind: DocumentKind| {
            stored
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, key)| key.clone())
                .or_else(|| prior.as_ref().and_then(|p| stored_ref(p, kind)).cloned())
        };
        let submission = VerificationSubmission {
            user_id: user_id.to_string(),
            service_category: form.service_category.trim().to_string(),
            national_id_number: form.national_id_number.trim().to_string(),
            id_document_ref: reference(DocumentKind::IdDocument),
            passport_photo_ref: reference(DocumentKind::PassportPhoto),
            certificate_ref: reference(DocumentKind::Certificate),
            cv_ref: reference(DocumentKind::Cv),
            bio: form.bio.filter(|b| !b.trim().is_empty()),
            hourly_rate: form.hourly_rate,
            operating_radius: form.operating_radius,
            status: VerificationStatus::Pending,
            rejection_reason: prior.as_ref().and_then(|p| p.rejection_reason.clone()),
            reviewed_by: None,
            reviewed_at: None,
            created_at: prior.as_ref().and_then(|p| p.created_at),
        };

        let submission = self.backend.upsert_submission(&submission).await?;
        info!(user_id, "verification submitted");

        let profile_synced = self.mirror(user_id, Some(VerificationStatus::Pending)).await;
        Ok(SubmitReport {
            submission,
            warnings,
            profile_synced,
        })
    }

    /// Only taskers submit. A user without a profile row is refused too.
    async fn ensure_tasker(&self, user_id: &str) -> Result<()> {
        match self.backend.fetch_profile(user_id).await? {
            Some(profile) if profile.role.effective() == Role::Tasker => Ok(()),
            Some(profile) => {
                warn!(user_id, role = %profile.role, "verification submitted by non-tasker");
                Err(Error::forbidden("only taskers can submit verification"))
            }
            None => {
                warn!(user_id, "verification submitted without a profile");
                Err(Error::forbidden("only taskers can submit verification"))
            }
        }
    }

    /// Approve or reject a pending submission. Only admins may review.
    pub async fn review(
        &self,
        reviewer: &Profile,
        user_id: &str,
        decision: ReviewDecision,
    ) -> Result<ReviewReport> {
        if reviewer.role != Role::Admin {
            return Err(Error::forbidden("only admins can review verifications"));
        }
        let rejection_reason = match &decision {
            ReviewDecision::Approve => None,
            ReviewDecision::Reject { reason } => {
                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(ValidationError::MissingRejectionReason.into());
                }
                Some(reason.to_string())
            }
        };
        let status = decision.status();

        let current = self
            .backend
            .fetch_submission(user_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("verification for {}", user_id)))?;
        ensure_transition(Some(current.status), status)?;

        let update = ReviewUpdate {
            status,
            rejection_reason,
            reviewed_by: reviewer.id.clone(),
            reviewed_at: Utc::now(),
        };
        self.backend.record_review(user_id, &update).await?;
        info!(user_id, reviewer = %reviewer.id, status = %status, "verification reviewed");

        let profile_synced = self.mirror(user_id, Some(status)).await;
        Ok(ReviewReport {
            status,
            profile_synced,
        })
    }

    /// Copy the submission status onto the profile
    pub async fn resync_profile(&self, user_id: &str) -> Result<VerificationStatus> {
        let submission = self
            .backend
            .fetch_submission(user_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("verification for {}", user_id)))?;
        self.backend
            .set_verification_status(user_id, Some(submission.status))
            .await?;
        debug!(user_id, status = %submission.status, "profile status resynced");
        Ok(submission.status)
    }

    async fn mirror(&self, user_id: &str, status: Option<VerificationStatus>) -> bool {
        match self.backend.set_verification_status(user_id, status).await {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id, error = %e, "profile verification status not updated");
                false
            }
        }
    }
}
