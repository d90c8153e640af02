//! Entry-point gate for signed preview URLs.
//!
//! Callers pass the target URL base64url-encoded together with an HMAC-SHA1
//! signature of the encoded string. Verification happens before the pipeline
//! runs; a failed check never reaches it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::PreviewError;

type HmacSha1 = Hmac<Sha1>;

/// Decode a base64url-encoded target URL.
///
/// Anything after the first `/` is a display filename appended by callers
/// and is ignored.
pub fn decode_url(encoded: &str) -> Result<String, PreviewError> {
    let encoded = strip_filename(encoded);
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| PreviewError::InvalidSignature)?;
    String::from_utf8(bytes).map_err(|_| PreviewError::InvalidSignature)
}

/// Verify `sig` (base64url-encoded HMAC-SHA1 digest) against `encoded_url`.
///
/// The comparison is constant time. The filename suffix, if any, is not part
/// of the signed payload.
pub fn verify(sig: &str, encoded_url: &str, secret: &[u8]) -> bool {
    let encoded_url = strip_filename(encoded_url);

    let Ok(expected) = URL_SAFE_NO_PAD.decode(sig) else {
        return false;
    };

    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(encoded_url.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Produce the signature for an encoded URL, base64url-encoded.
pub fn sign(encoded_url: &str, secret: &[u8]) -> String {
    let mut mac = HmacSha1::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(encoded_url.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Encode a URL the way signed callers transmit it.
pub fn encode_url(url: &str) -> String {
    URL_SAFE_NO_PAD.encode(url.as_bytes())
}

fn strip_filename(encoded: &str) -> &str {
    match encoded.find('/') {
        Some(idx) if idx > 0 => &encoded[..idx],
        _ => encoded,
    }
}
