//! Document intake rules and object storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::{AttachmentKind, RequestId};

const ACCEPTED_TYPES: [&str; 3] = ["application/pdf", "image/jpeg", "image/png"];

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("le fichier {0} est vide")]
    Empty(String),
    #[error("le fichier {file_name} dépasse la taille maximale de {limit} octets")]
    TooLarge {
        file_name: String,
        size: usize,
        limit: usize,
    },
    #[error("type de fichier non pris en charge pour {file_name}: {content_type}")]
    UnsupportedType {
        file_name: String,
        content_type: String,
    },
    #[error("le document signé doit être un fichier PDF")]
    SignedMustBePdf,
    #[error("contenu base64 invalide pour {file_name}")]
    Decode {
        file_name: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
    #[error("document '{0}' not found")]
    NotFound(String),
    #[error("storage io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl DocumentError {
    /// Errors caused by the uploaded file itself rather than the storage backend.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DocumentError::Empty(_)
                | DocumentError::TooLarge { .. }
                | DocumentError::UnsupportedType { .. }
                | DocumentError::SignedMustBePdf
                | DocumentError::Decode { .. }
        )
    }
}

/// File as it arrives in a JSON body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentUpload {
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Standard base64 of the file bytes.
    pub data: String,
}

impl DocumentUpload {
    pub fn from_bytes(file_name: impl Into<String>, content_type: Option<&str>, bytes: &[u8]) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.map(str::to_string),
            data: STANDARD.encode(bytes),
        }
    }

    pub fn decode(self) -> Result<IncomingDocument, DocumentError> {
        let bytes = STANDARD
            .decode(self.data.trim())
            .map_err(|source| DocumentError::Decode {
                file_name: self.file_name.clone(),
                source,
            })?;
        Ok(IncomingDocument {
            file_name: self.file_name,
            content_type: self.content_type,
            bytes,
        })
    }
}

/// Decoded file awaiting validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingDocument {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Document that passed [`UploadPolicy::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedDocument {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_bytes: usize,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

impl UploadPolicy {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Size and type checks. Signed documents must be PDFs by extension and type.
    pub fn check(
        &self,
        document: IncomingDocument,
        kind: AttachmentKind,
    ) -> Result<AcceptedDocument, DocumentError> {
        let IncomingDocument {
            file_name,
            content_type,
            bytes,
        } = document;

        if bytes.is_empty() {
            return Err(DocumentError::Empty(file_name));
        }
        if bytes.len() > self.max_bytes {
            return Err(DocumentError::TooLarge {
                file_name,
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        let content_type = resolve_content_type(&file_name, content_type.as_deref());

        if kind == AttachmentKind::Signed {
            let has_pdf_extension = Path::new(&file_name)
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
            if !has_pdf_extension || content_type != "application/pdf" {
                return Err(DocumentError::SignedMustBePdf);
            }
        } else if !ACCEPTED_TYPES.contains(&content_type.as_str()) {
            return Err(DocumentError::UnsupportedType {
                file_name,
                content_type,
            });
        }

        Ok(AcceptedDocument {
            file_name,
            content_type,
            bytes,
        })
    }
}

/// Declared type when it parses, otherwise a guess from the extension.
fn resolve_content_type(file_name: &str, declared: Option<&str>) -> String {
    declared
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .map(|mime| mime.essence_str().to_ascii_lowercase())
        .unwrap_or_else(|| {
            mime_guess::from_path(file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        })
}

/// `{request}/{kind}-{unique}-{file}` with the file name reduced to safe characters.
pub fn storage_key(request_id: &RequestId, kind: AttachmentKind, file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = safe.trim_start_matches('.');
    let unique = uuid::Uuid::new_v4().simple().to_string();
    format!("{}/{}-{}-{}", request_id, kind.label(), &unique[..12], safe)
}

pub fn validate_key(key: &str) -> Result<(), DocumentError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "..");
    if bad {
        return Err(DocumentError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Stored object location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredDocument {
    pub key: String,
    pub url: String,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(&self, key: &str, document: &AcceptedDocument) -> Result<StoredDocument, DocumentError>;
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, DocumentError>;
    async fn remove(&self, key: &str) -> Result<(), DocumentError>;
}

pub fn public_url(base: &str, key: &str) -> String {
    format!("{}/documents/{}", base.trim_end_matches('/'), key)
}

/// Documents kept under a directory and served by the API at `/documents/{key}`.
#[derive(Debug, Clone)]
pub struct LocalDocumentStore {
    root: PathBuf,
    public_base: String,
}

impl LocalDocumentStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, DocumentError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn put(&self, key: &str, document: &AcceptedDocument) -> Result<StoredDocument, DocumentError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &document.bytes).await?;
        debug!(key, bytes = document.bytes.len(), "document written");
        Ok(StoredDocument {
            key: key.to_string(),
            url: public_url(&self.public_base, key),
        })
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, DocumentError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(DocumentError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), DocumentError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(name: &str, content_type: Option<&str>, len: usize) -> IncomingDocument {
        IncomingDocument {
            file_name: name.to_string(),
            content_type: content_type.map(str::to_string),
            bytes: vec![7; len],
        }
    }

    #[test]
    fn accepts_pdf_and_images_within_limit() {
        let policy = UploadPolicy::default();
        let accepted = policy
            .check(incoming("releve.pdf", None, 10), AttachmentKind::StudentUpload)
            .expect("pdf accepted");
        assert_eq!(accepted.content_type, "application/pdf");
        let accepted = policy
            .check(
                incoming("scan.bin", Some("image/png"), 10),
                AttachmentKind::Processed,
            )
            .expect("declared png accepted");
        assert_eq!(accepted.content_type, "image/png");
    }

    #[test]
    fn rejects_oversized_empty_and_unknown_files() {
        let policy = UploadPolicy::new(8);
        assert!(matches!(
            policy.check(incoming("a.pdf", None, 9), AttachmentKind::StudentUpload),
            Err(DocumentError::TooLarge { size: 9, limit: 8, .. })
        ));
        assert!(matches!(
            policy.check(incoming("a.pdf", None, 0), AttachmentKind::StudentUpload),
            Err(DocumentError::Empty(_))
        ));
        assert!(matches!(
            policy.check(incoming("a.docx", None, 4), AttachmentKind::StudentUpload),
            Err(DocumentError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn signed_documents_must_be_pdf_by_name_and_type() {
        let policy = UploadPolicy::default();
        assert!(matches!(
            policy.check(incoming("signe.png", None, 4), AttachmentKind::Signed),
            Err(DocumentError::SignedMustBePdf)
        ));
        assert!(matches!(
            policy.check(
                incoming("signe.pdf", Some("image/png"), 4),
                AttachmentKind::Signed
            ),
            Err(DocumentError::SignedMustBePdf)
        ));
        policy
            .check(incoming("SIGNE.PDF", None, 4), AttachmentKind::Signed)
            .expect("upper-case extension is fine");
    }

    #[test]
    fn keys_stay_inside_the_store() {
        let key = storage_key(
            &RequestId("dem-1".to_string()),
            AttachmentKind::Signed,
            "../../etc/passwd",
        );
        assert!(key.starts_with("dem-1/signed-"));
        validate_key(&key).expect("generated keys are valid");
        assert!(validate_key("../secret").is_err());
        assert!(validate_key("/abs/path").is_err());
        assert!(validate_key("dem-1//x").is_err());
    }

    #[test]
    fn base64_uploads_decode() {
        let upload = DocumentUpload::from_bytes("a.pdf", Some("application/pdf"), b"%PDF-1.7");
        let decoded = upload.decode().expect("decodes");
        assert_eq!(decoded.bytes, b"%PDF-1.7");

        let broken = DocumentUpload {
            file_name: "a.pdf".to_string(),
            content_type: None,
            data: "***".to_string(),
        };
        assert!(matches!(broken.decode(), Err(DocumentError::Decode { .. })));
    }

    #[tokio::test]
    async fn local_store_round_trips_and_forgets() {
        let root = std::env::temp_dir().join(format!("gopac-docs-{}", uuid::Uuid::new_v4()));
        let store = LocalDocumentStore::new(&root, "http://localhost:3000/");
        let document = AcceptedDocument {
            file_name: "a.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: b"%PDF".to_vec(),
        };

        let stored = store.put("dem-1/a.pdf", &document).await.expect("stored");
        assert_eq!(stored.url, "http://localhost:3000/documents/dem-1/a.pdf");
        assert_eq!(store.fetch("dem-1/a.pdf").await.expect("read back"), b"%PDF");

        store.remove("dem-1/a.pdf").await.expect("removed");
        assert!(matches!(
            store.fetch("dem-1/a.pdf").await,
            Err(DocumentError::NotFound(_))
        ));
        let _ = std::fs::remove_dir_all(root);
    }
}
