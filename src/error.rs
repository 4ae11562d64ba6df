use thiserror::Error;

///
/// Errors reported by the homomorphic operations of this crate.
///
/// Mismatching tower sets or formats between two [`crate::rns::RnsPoly`]s are not
/// part of this enum; these are programming errors and cause a panic.
///
#[derive(Debug, Error)]
pub enum CkksError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("no switching key for automorphism {galois_element} (rotation by {rotation:?}) was generated")]
    MissingKey {
        galois_element: usize,
        rotation: Option<i64>
    },
    #[error("no relinearization key was generated, call eval_mult_key_gen first")]
    MissingRelinearizationKey,
    #[error("no bootstrapping precomputation for {slots} slots, call eval_bootstrap_setup/key_gen/precompute first")]
    MissingPrecomputation {
        slots: usize
    },
    #[error("ciphertext with {towers} towers cannot spend {required} more level(s), bootstrap it first")]
    CapacityExhausted {
        towers: usize,
        required: usize
    },
    #[error("bootstrapping reduced the tower count from {input_towers} to {output_towers}")]
    TowerLoss {
        input_towers: usize,
        output_towers: usize
    },
    #[error("operands do not match: {0}")]
    Mismatch(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error)
}

pub type Result<T> = std::result::Result<T, CkksError>;
