//! Document and avatar storage
//!
//! Verification documents go to a private bucket and are referenced by key;
//! viewers get short-lived signed URLs. Avatars go to a public bucket and
//! the profile keeps the public URL.

use crate::backend::Backend;
use crate::config::AppConfig;
use crate::error::{Error, Result, ValidationError};
use crate::models::ProfilePatch;
use bytes::Bytes;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

const MIB: usize = 1024 * 1024;

const IMAGE_OR_PDF: &[&str] = &["image/jpeg", "image/jpg", "image/png", "application/pdf"];
const PDF_OR_WORD: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

/// Verification document slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    IdDocument,
    PassportPhoto,
    Certificate,
    Cv,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 4] = [
        DocumentKind::IdDocument,
        DocumentKind::PassportPhoto,
        DocumentKind::Certificate,
        DocumentKind::Cv,
    ];

    /// Prefix used in storage keys
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::IdDocument => "id_document",
            DocumentKind::PassportPhoto => "passport_photo",
            DocumentKind::Certificate => "certificate",
            DocumentKind::Cv => "cv",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DocumentKind::IdDocument => "ID document",
            DocumentKind::PassportPhoto => "passport photo",
            DocumentKind::Certificate => "certificate",
            DocumentKind::Cv => "CV",
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, DocumentKind::IdDocument | DocumentKind::PassportPhoto)
    }

    pub fn accepts(&self, mime: &str) -> bool {
        let allowed = match self {
            DocumentKind::Cv => PDF_OR_WORD,
            _ => IMAGE_OR_PDF,
        };
        allowed.contains(&mime.trim().to_ascii_lowercase().as_str())
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A file picked by the user
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl Upload {
    pub fn new(file_name: &str, content_type: &str, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Extension from the file name, `bin` when there is none
    pub fn extension(&self) -> &str {
        match self.file_name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => ext,
            _ => "bin",
        }
    }
}

pub fn validate_document(
    kind: DocumentKind,
    upload: &Upload,
    limit: usize,
) -> std::result::Result<(), ValidationError> {
    if upload.size() > limit {
        return Err(ValidationError::FileTooLarge {
            what: kind.label(),
            limit_mb: limit / MIB,
        });
    }
    if !kind.accepts(&upload.content_type) {
        return Err(ValidationError::UnsupportedType {
            what: kind.label(),
            mime: upload.content_type.clone(),
        });
    }
    Ok(())
}

pub fn validate_avatar(upload: &Upload, limit: usize) -> std::result::Result<(), ValidationError> {
    if !upload.content_type.starts_with("image/") {
        return Err(ValidationError::UnsupportedType {
            what: "profile photo",
            mime: upload.content_type.clone(),
        });
    }
    if upload.size() > limit {
        return Err(ValidationError::FileTooLarge {
            what: "profile photo",
            limit_mb: limit / MIB,
        });
    }
    Ok(())
}

pub fn document_key(user_id: &str, kind: DocumentKind, ext: &str, millis: i64) -> String {
    format!("{}/{}_{}.{}", user_id, kind.as_str(), millis, ext)
}

pub fn avatar_key(user_id: &str, ext: &str, millis: i64) -> String {
    format!("{}-{}.{}", user_id, millis, ext)
}

/// Turn a stored reference into a key inside `bucket`.
///
/// Older rows hold full URLs; those are cut after `{bucket}/`, or reduced
/// to their last two path segments. A bare file name is resolved under
/// `user_id` when one is given.
pub fn normalize_storage_path(
    bucket: &str,
    reference: &str,
    user_id: Option<&str>,
) -> std::result::Result<String, ValidationError> {
    let reference = reference.trim();
    let invalid = || ValidationError::InvalidPath(reference.to_string());
    if reference.is_empty() {
        return Err(invalid());
    }

    if reference.starts_with("http") {
        let path = reference.split(|c| c == '?' || c == '#').next().unwrap_or(reference);
        let marker = format!("{}/", bucket);
        if let Some(idx) = path.find(&marker) {
            let key = &path[idx + marker.len()..];
            if !key.is_empty() {
                return Ok(key.to_string());
            }
        }
        let segments: Vec<&str> = path.rsplit('/').take(2).collect();
        return match segments.as_slice() {
            [name, folder] if !name.is_empty() && !folder.is_empty() && !folder.contains(':') => {
                Ok(format!("{}/{}", folder, name))
            }
            _ => Err(invalid()),
        };
    }

    if reference.contains('/') {
        return Ok(reference.trim_start_matches('/').to_string());
    }
    match user_id {
        Some(user_id) if !user_id.is_empty() => Ok(format!("{}/{}", user_id, reference)),
        _ => Err(invalid()),
    }
}

#[derive(Clone)]
pub struct DocumentStore {
    backend: Arc<dyn Backend>,
    documents_bucket: String,
    avatar_bucket: String,
    document_limit: usize,
    avatar_limit: usize,
    signed_url_ttl: u64,
}

impl DocumentStore {
    pub fn new(backend: Arc<dyn Backend>, config: &AppConfig) -> Self {
        Self {
            backend,
            documents_bucket: config.documents_bucket.clone(),
            avatar_bucket: config.avatar_bucket.clone(),
            document_limit: config.document_size_limit,
            avatar_limit: config.avatar_size_limit,
            signed_url_ttl: config.signed_url_ttl,
        }
    }

    pub fn document_limit(&self) -> usize {
        self.document_limit
    }

    pub fn check(&self, kind: DocumentKind, upload: &Upload) -> std::result::Result<(), ValidationError> {
        validate_document(kind, upload, self.document_limit)
    }

    /// Upload one document and return its storage key
    pub async fn upload_document(
        &self,
        user_id: &str,
        kind: DocumentKind,
        upload: &Upload,
    ) -> Result<String> {
        self.check(kind, upload)?;
        let key = document_key(user_id, kind, upload.extension(), Utc::now().timestamp_millis());
        let stored = self
            .backend
            .upload_object(
                &self.documents_bucket,
                &key,
                upload.data.clone(),
                &upload.content_type,
                false,
            )
            .await
            .map_err(|e| Error::DocumentUpload {
                document: kind.label(),
                message: e.to_string(),
            })?;
        debug!(user_id, key = %stored, "uploaded {}", kind);
        Ok(stored)
    }

    /// Signed URL for a stored document reference
    pub async fn signed_url(&self, reference: &str, user_id: Option<&str>) -> Result<String> {
        let key = normalize_storage_path(&self.documents_bucket, reference, user_id)?;
        self.backend
            .signed_url(&self.documents_bucket, &key, self.signed_url_ttl)
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "could not sign document URL");
                e
            })
    }

    /// Upload a profile photo and point the profile at its public URL
    pub async fn upload_avatar(&self, user_id: &str, upload: &Upload) -> Result<String> {
        validate_avatar(upload, self.avatar_limit)?;
        let key = avatar_key(user_id, upload.extension(), Utc::now().timestamp_millis());
        let stored = self
            .backend
            .upload_object(
                &self.avatar_bucket,
                &key,
                upload.data.clone(),
                &upload.content_type,
                true,
            )
            .await?;
        let public_url = self.backend.public_url(&self.avatar_bucket, &stored);

        let patch = ProfilePatch {
            avatar_url: Some(public_url.clone()),
            ..Default::default()
        };
        self.backend.update_profile(user_id, &patch).await?;
        Ok(public_url)
    }
}
