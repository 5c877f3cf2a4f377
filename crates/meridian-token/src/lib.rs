#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **meridian-token** – The HMAC-signed token envelope codec:
//! `<prefix><base32(canonicalBytes(payload))>.<base32(hmacTag)>`.

/// The typed payload carried inside each token kind.
pub mod payload;

pub use payload::{TokenKind, TokenPayload, TokenScope, TOKEN_VERSION};

use data_encoding::BASE32_NOPAD;
use meridian_crypto::{hmac_sign, hmac_verify};
use meridian_types::{MeridianError, Result};

/// A token that parsed structurally but has not yet been signature-verified.
#[derive(Debug, Clone)]
pub struct ParsedToken {
    prefix: &'static str,
    body_b32: String,
    tag_bytes: Vec<u8>,
    /// The decoded, typed payload.
    pub payload: TokenPayload,
}

impl ParsedToken {
    /// This token's kind, derived from its prefix.
    pub fn kind(&self) -> TokenKind {
        self.payload.kind()
    }

    /// The exact bytes the HMAC tag was computed over: `prefix` followed by
    /// the base32 body, as ASCII.
    fn signing_input(&self) -> String {
        format!("{}{}", self.prefix, self.body_b32)
    }
}

/// Parse a token string into its typed payload, without verifying its
/// signature. Rejects anything not in the `<prefix><body>.<tag>` shape, a
/// prefix/`tokenKind` mismatch, or an unsupported `tokenVersion`.
pub fn parse(token: &str) -> Result<ParsedToken> {
    let (kind, rest) = TokenKind::ALL
        .iter()
        .find_map(|(kind, prefix)| token.strip_prefix(prefix).map(|rest| (*kind, rest)))
        .ok_or(MeridianError::TokenInvalidFormat)?;

    let (body_b32, tag_b32) = rest.split_once('.').ok_or(MeridianError::TokenInvalidFormat)?;
    if body_b32.is_empty() || tag_b32.is_empty() {
        return Err(MeridianError::TokenInvalidFormat);
    }

    let body_bytes = BASE32_NOPAD
        .decode(body_b32.as_bytes())
        .map_err(|_| MeridianError::TokenInvalidFormat)?;
    let tag_bytes = BASE32_NOPAD
        .decode(tag_b32.as_bytes())
        .map_err(|_| MeridianError::TokenInvalidFormat)?;

    let value =
        meridian_canon::decode(&body_bytes).map_err(|_| MeridianError::TokenInvalidFormat)?;
    let payload: TokenPayload =
        serde_json::from_value(value).map_err(|_| MeridianError::TokenInvalidFormat)?;

    if payload.kind() != kind {
        return Err(MeridianError::TokenInvalidFormat);
    }
    if payload.token_version() != TOKEN_VERSION {
        return Err(MeridianError::TokenUnsupportedVersion);
    }

    Ok(ParsedToken {
        prefix: kind.prefix(),
        body_b32: body_b32.to_string(),
        tag_bytes,
        payload,
    })
}

/// Verify a parsed token's HMAC tag against the current signing key.
pub fn verify(parsed: &ParsedToken, key: &[u8]) -> Result<()> {
    let signing_input = parsed.signing_input();
    if hmac_verify(key, signing_input.as_bytes(), &parsed.tag_bytes) {
        Ok(())
    } else {
        Err(MeridianError::TokenBadSignature)
    }
}

/// Sign `payload`, producing the on-wire token string. Tokens have no
/// expiry; the HMAC tag is the only authorization.
pub fn sign(payload: &TokenPayload, key: &[u8]) -> Result<String> {
    let bytes = meridian_canon::canonicalize_serializable(payload)
        .map_err(|e| MeridianError::InternalError(e.to_string()))?;
    let body_b32 = BASE32_NOPAD.encode(&bytes);
    let signing_input = format!("{}{}", payload.kind().prefix(), body_b32);
    let tag = hmac_sign(key, signing_input.as_bytes());
    let tag_b32 = BASE32_NOPAD.encode(&tag);
    Ok(format!("{signing_input}.{tag_b32}"))
}

/// `sessionId`/`runId`/`nodeId` must match byte-for-byte between a state
/// token and an ack (or checkpoint) token presented alongside it.
pub fn assert_scope_match(state: &TokenPayload, other: &TokenPayload) -> Result<()> {
    let a = state.scope();
    let b = other.scope();
    if a.session_id == b.session_id && a.run_id == b.run_id && a.node_id == b.node_id {
        Ok(())
    } else {
        Err(MeridianError::TokenScopeMismatch)
    }
}
