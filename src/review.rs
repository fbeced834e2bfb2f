//! Admin review queue

use crate::backend::Backend;
use crate::documents::{DocumentKind, DocumentStore};
use crate::error::{Error, Result};
use crate::models::{Profile, VerificationStatus, VerificationSubmission};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueFilter {
    #[default]
    Pending,
    Approved,
    Rejected,
    All,
}

impl QueueFilter {
    pub fn status(&self) -> Option<VerificationStatus> {
        match self {
            QueueFilter::Pending => Some(VerificationStatus::Pending),
            QueueFilter::Approved => Some(VerificationStatus::Approved),
            QueueFilter::Rejected => Some(VerificationStatus::Rejected),
            QueueFilter::All => None,
        }
    }
}

impl FromStr for QueueFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(QueueFilter::All),
            other => other.parse::<VerificationStatus>().map(|status| match status {
                VerificationStatus::Pending => QueueFilter::Pending,
                VerificationStatus::Approved => QueueFilter::Approved,
                VerificationStatus::Rejected => QueueFilter::Rejected,
            }),
        }
    }
}

impl fmt::Display for QueueFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status() {
            Some(status) => write!(f, "{}", status),
            None => f.write_str("all"),
        }
    }
}

/// Signed links for the documents a submission references
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentLinks {
    links: Vec<(DocumentKind, String)>,
}

impl DocumentLinks {
    pub fn get(&self, kind: DocumentKind) -> Option<&str> {
        self.links
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, url)| url.as_str())
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub submission: VerificationSubmission,
    /// `None` when the applicant's profile could not be read
    pub applicant: Option<Profile>,
    pub documents: DocumentLinks,
}

impl QueueEntry {
    pub fn applicant_name(&self) -> &str {
        self.applicant
            .as_ref()
            .map(Profile::display_name)
            .unwrap_or("Unknown User")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.approved + self.rejected
    }
}

#[derive(Clone)]
pub struct ReviewQueue {
    backend: Arc<dyn Backend>,
    documents: DocumentStore,
}

impl ReviewQueue {
    pub fn new(backend: Arc<dyn Backend>, documents: DocumentStore) -> Self {
        Self { backend, documents }
    }

    /// Submissions matching `filter`, newest first
    pub async fn list(&self, filter: QueueFilter) -> Result<Vec<QueueEntry>> {
        let submissions = self.backend.list_submissions(filter.status()).await?;
        if submissions.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = submissions.iter().map(|s| s.user_id.clone()).collect();
        let mut profiles: HashMap<String, Profile> = match self.backend.fetch_profiles(&ids).await {
            Ok(profiles) => profiles.into_iter().map(|p| (p.id.clone(), p)).collect(),
            Err(e) => {
                warn!(error = %e, "could not load applicant profiles");
                HashMap::new()
            }
        };

        let mut entries = Vec::with_capacity(submissions.len());
        for submission in submissions {
            let applicant = profiles.remove(&submission.user_id);
            let documents = self.links(&submission).await;
            entries.push(QueueEntry {
                submission,
                applicant,
                documents,
            });
        }
        Ok(entries)
    }

    pub async fn counts(&self) -> Result<StatusCounts> {
        Ok(StatusCounts {
            pending: self
                .backend
                .count_submissions(VerificationStatus::Pending)
                .await?,
            approved: self
                .backend
                .count_submissions(VerificationStatus::Approved)
                .await?,
            rejected: self
                .backend
                .count_submissions(VerificationStatus::Rejected)
                .await?,
        })
    }

    /// One applicant, for the review page
    pub async fn load(&self, user_id: &str) -> Result<QueueEntry> {
        let submission = self
            .backend
            .fetch_submission(user_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("verification for {}", user_id)))?;
        let applicant = match self.backend.fetch_profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user_id, error = %e, "could not load applicant profile");
                None
            }
        };
        let documents = self.links(&submission).await;
        Ok(QueueEntry {
            submission,
            applicant,
            documents,
        })
    }

    /// Documents that cannot be signed are left out
    async fn links(&self, submission: &VerificationSubmission) -> DocumentLinks {
        let mut links = Vec::new();
        let refs = [
            (DocumentKind::IdDocument, &submission.id_document_ref),
            (DocumentKind::PassportPhoto, &submission.passport_photo_ref),
            (DocumentKind::Certificate, &submission.certificate_ref),
            (DocumentKind::Cv, &submission.cv_ref),
        ];
        for (kind, reference) in refs {
            let Some(reference) = reference.as_deref() else { continue };
            match self
                .documents
                .signed_url(reference, Some(&submission.user_id))
                .await
            {
                Ok(url) => links.push((kind, url)),
                Err(e) => warn!(user_id = %submission.user_id, error = %e, "no link for {}", kind),
            }
        }
        DocumentLinks { links }
    }
}
