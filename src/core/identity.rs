//! Local checks on a national identity number. No registry lookup is made.

use sha2::{Digest, Sha256};
use crate::common::{ErrorKind, VerificationError};

pub const IDENTITY_NUMBER_LEN: usize = 12;

/// Checks the number is exactly twelve ASCII digits, then that consent was given.
pub fn validate(identity_number: &str, consent_granted: bool) -> Result<(), VerificationError> {
    let well_formed = identity_number.len() == IDENTITY_NUMBER_LEN
        && identity_number.bytes().all(|b| b.is_ascii_digit());

    if !well_formed {
        return Err(VerificationError::new(
            ErrorKind::InvalidIdentityFormat,
            "Please enter a valid 12-digit Aadhaar number",
        ));
    }

    if !consent_granted {
        return Err(VerificationError::new(
            ErrorKind::ConsentRequired,
            "Consent is required for Aadhaar verification",
        ));
    }

    Ok(())
}

/// Masks all but the last four characters, for display and logs.
pub fn mask(identity_number: &str) -> String {
    let count = identity_number.chars().count();
    identity_number
        .chars()
        .enumerate()
        .map(|(i, c)| if i + 4 < count { 'X' } else { c })
        .collect()
}

/// Short stable hash used to correlate log lines without the number itself.
pub fn fingerprint(identity_number: &str) -> String {
    let digest = Sha256::digest(identity_number.as_bytes());
    digest.iter().take(6).map(|b| format!("{:02x}", b)).collect()
}
