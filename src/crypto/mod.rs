pub mod certificates;
pub mod secure_rng;


// Re-export
pub use certificates::{
    save_certificate, verification_hash_matches, CertificateIssuer, SigningKey,
    DEFAULT_ORGANIZATION,
};
pub use secure_rng::secure_random_bytes;
