//! Fixed, invertible shortening of UUIDs for physical table names.
//!
//! Table names embed 128-bit ids as their 22-character base64url rendering
//! (no padding). `device:7IUxe2sUT32dRXAZhzXczw_service:…` therefore carries
//! the device UUID `ec85317b-6b14-4f7d-9d45-70198735dccf`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use thiserror::Error;
use uuid::Uuid;

/// Length of a shortened id inside a table name.
pub const SHORT_ID_LEN: usize = 22;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShortIdError {
    #[error("short id must be {SHORT_ID_LEN} base64url characters, got {got:?}")]
    InvalidShortId { got: String },
    #[error("not a valid UUID: {got:?}")]
    InvalidUuid { got: String },
}

/// Expand a 22-character short id into its canonical UUID string.
pub fn expand(short: &str) -> Result<String, ShortIdError> {
    if short.len() != SHORT_ID_LEN {
        return Err(ShortIdError::InvalidShortId { got: short.into() });
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(short)
        .map_err(|_| ShortIdError::InvalidShortId { got: short.into() })?;
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| ShortIdError::InvalidShortId { got: short.into() })?;
    Ok(Uuid::from_bytes(raw).to_string())
}

/// Shorten a canonical UUID string into its 22-character rendering.
pub fn shorten(id: &str) -> Result<String, ShortIdError> {
    let uuid = Uuid::parse_str(id).map_err(|_| ShortIdError::InvalidUuid { got: id.into() })?;
    Ok(URL_SAFE_NO_PAD.encode(uuid.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ec85317b-6b14-4f7d-9d45-70198735dccf", "7IUxe2sUT32dRXAZhzXczw")]
    #[case("00000000-0000-0000-0000-000000000000", "AAAAAAAAAAAAAAAAAAAAAA")]
    fn shorten_and_expand_are_inverse(#[case] long: &str, #[case] short: &str) {
        assert_eq!(shorten(long).expect("shorten"), short);
        assert_eq!(expand(short).expect("expand"), long);
    }

    #[test]
    fn round_trips_random_uuids() {
        for _ in 0..32 {
            let id = Uuid::new_v4().to_string();
            let short = shorten(&id).expect("shorten");
            assert_eq!(short.len(), SHORT_ID_LEN);
            assert_eq!(expand(&short).expect("expand"), id);
        }
    }

    #[rstest]
    #[case("too-short")]
    #[case("7IUxe2sUT32dRXAZhzXcz!")]
    #[case("7IUxe2sUT32dRXAZhzXczwX")]
    fn rejects_malformed_short_ids(#[case] short: &str) {
        assert!(matches!(
            expand(short),
            Err(ShortIdError::InvalidShortId { .. })
        ));
    }

    #[test]
    fn rejects_malformed_uuids() {
        assert!(matches!(
            shorten("not-a-uuid"),
            Err(ShortIdError::InvalidUuid { .. })
        ));
    }
}
