pub mod engine;
pub mod extract;

// Re-export the verification surface
pub use engine::{
    VerificationEngine, VerificationOutcome, DEFAULT_EXTRACTION_TIMEOUT, MSG_HASH_MISMATCH,
    MSG_NOT_EXTRACTED, MSG_NOT_FOUND, MSG_NOT_IN_DATABASE, MSG_SESSION_NOT_COMPLETED,
    MSG_VERIFIED, MSG_VERIFIED_FROM_DOCUMENT,
};
pub use extract::{
    extraction_schema, DocumentExtractor, DocumentRef, ExtractedCertificate, ExtractionResult,
    ExtractionStatus, JsonDocumentExtractor, MediaType,
};
