//! `X-Hub-Signature-256` verification

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, error};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Signs `body` the way a sender is expected to: `sha256=<lowercase hex>`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC pads or hashes the key, so every key length is accepted.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Checks the signature header against the exact bytes that were received.
///
/// A missing header, a wrong prefix, non-hex content or a digest of the wrong
/// length all count as a mismatch. The digest comparison is constant-time.
pub fn verify(secret: &str, body: &[u8], signature_header: Option<&str>) -> bool {
    let Some(header) = signature_header else {
        debug!("No signature header supplied");
        return false;
    };

    let Some(hex_sig) = header.strip_prefix(SIGNATURE_PREFIX) else {
        debug!("Signature header has no sha256= prefix");
        return false;
    };

    let Ok(claimed) = hex::decode(hex_sig) else {
        debug!("Signature header is not valid hex");
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        error!("Could not initialise HMAC with the configured secret");
        return false;
    };
    mac.update(body);
    // verify_slice rejects length mismatches and compares in constant time
    mac.verify_slice(&claimed).is_ok()
}
