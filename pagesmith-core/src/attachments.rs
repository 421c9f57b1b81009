//! Decoding of inline `data:` URI attachments.
//!
//! Failures are per attachment: a corrupt entry is recorded and skipped,
//! the remaining ones still flow downstream in their original order.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};

use crate::error::{AttachmentDecodeError, DecodeFailure};
use crate::types::{AttachmentRef, AttachmentSource};

/// Media type assumed when a data URI omits one (RFC 2397).
const DEFAULT_MEDIA_TYPE: &str = "text/plain";

/// Outcome of resolving a request's attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedAttachments {
    pub attachments: Vec<AttachmentRef>,
    pub errors: Vec<AttachmentDecodeError>,
}

/// Decode every attachment, collecting failures instead of stopping.
pub fn resolve(sources: &[AttachmentSource]) -> ResolvedAttachments {
    let mut resolved = ResolvedAttachments::default();
    for source in sources {
        match decode(source) {
            Ok(attachment) => resolved.attachments.push(attachment),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping attachment");
                resolved.errors.push(e);
            }
        }
    }
    resolved
}

/// Decode a single `data:[<media type>][;param]*[;base64],<payload>` URI.
pub fn decode(source: &AttachmentSource) -> Result<AttachmentRef, AttachmentDecodeError> {
    let fail = |reason| AttachmentDecodeError {
        name: source.name.clone(),
        reason,
    };

    let name = sanitize_name(&source.name).ok_or_else(|| fail(DecodeFailure::Name))?;

    let uri = source.url.trim();
    let rest = strip_prefix_ignore_case(uri, "data:").ok_or_else(|| fail(DecodeFailure::NotDataUri))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| fail(DecodeFailure::MissingPayload))?;

    let mut params = header.split(';');
    let media_type = params.next().unwrap_or_default().trim().to_ascii_lowercase();
    let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

    let media_type = if media_type.is_empty() {
        DEFAULT_MEDIA_TYPE.to_string()
    } else if is_valid_media_type(&media_type) {
        media_type
    } else {
        return Err(fail(DecodeFailure::MediaType(media_type)));
    };

    let bytes = if is_base64 {
        decode_base64(payload).map_err(|e| fail(DecodeFailure::Base64(e)))?
    } else {
        percent_encoding::percent_decode_str(payload).collect()
    };

    Ok(AttachmentRef {
        name,
        media_type,
        bytes,
    })
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn decode_base64(payload: &str) -> Result<Vec<u8>, String> {
    // Payloads sometimes arrive percent-encoded or wrapped across lines.
    let decoded = percent_encoding::percent_decode_str(payload).decode_utf8_lossy();
    let compact: String = decoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(compact.trim_end_matches('=')))
        .map_err(|e| e.to_string())
}

/// `type/subtype` with RFC 6838 token characters on both sides.
fn is_valid_media_type(media_type: &str) -> bool {
    let is_token = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$&-^_.+".contains(c))
    };
    match media_type.split_once('/') {
        Some((kind, subtype)) => is_token(kind) && is_token(subtype),
        None => false,
    }
}

/// Reduce a caller-supplied name to a single safe path segment.
fn sanitize_name(raw: &str) -> Option<String> {
    let last = raw.rsplit(['/', '\\']).next()?.trim();
    if last.is_empty() || last == "." || last == ".." {
        None
    } else {
        Some(last.to_string())
    }
}
