use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value as JsonValue;

/// Decodes the unverified payload of a compact signed token.
///
/// Only the middle (payload) segment is read; the signature is never checked
/// client-side — verification is the server's responsibility. Malformed input
/// of any kind degrades to `None`, never a panic: fewer than two segments,
/// invalid base64url, or a payload that is not JSON.
#[must_use]
pub fn decode_claims(token: &str) -> Option<JsonValue> {
    let mut segments = token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;

    // Tolerate both padded and unpadded base64url.
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// The `exp` claim of a token as epoch seconds, if present and decodable.
#[must_use]
pub fn expires_at(token: &str) -> Option<i64> {
    let claims = decode_claims(token)?;
    let exp = claims.get("exp")?;
    exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))
}

/// Builds an unsigned token carrying the given claims (test fixture).
#[cfg(test)]
pub(crate) fn encode_token(claims: &JsonValue) -> String {
    let b64 = |bytes: &[u8]| URL_SAFE_NO_PAD.encode(bytes);
    let header = b64(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = b64(&serde_json::to_vec(claims).expect("claims serialize"));
    format!("{header}.{payload}.sig")
}
