pub mod nsec;
pub mod signer;

pub use nsec::{generate_nsec_chain, synthesize_black_lies_nsec};
pub use signer::{DEFAULT_SIGNATURE_VALIDITY, sign_rrset, sign_zone};
