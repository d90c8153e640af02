use reqwest::StatusCode;

/// What kind of media the origin claims to have sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// Decision derived from the origin's status code and content type.
///
/// `Rejected` carries the origin status verbatim; it is reserved for codes
/// where the resource is known gone or forbidden and retrying is pointless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Proceed(MediaKind),
    Rejected(u16),
    UpstreamError,
    Unsupported,
}

/// Status codes surfaced verbatim instead of being folded into a generic
/// upstream failure.
const PASS_THROUGH_STATUSES: [u16; 3] = [403, 404, 410];

pub fn classify(status: StatusCode, content_type: Option<&str>) -> Classification {
    if PASS_THROUGH_STATUSES.contains(&status.as_u16()) {
        return Classification::Rejected(status.as_u16());
    }

    if !status.is_success() {
        return Classification::UpstreamError;
    }

    match content_type.map(media_type_essence) {
        Some(essence) if essence.starts_with("image/") => {
            Classification::Proceed(MediaKind::Image)
        }
        Some(essence) if essence.starts_with("video/") => {
            Classification::Proceed(MediaKind::Video)
        }
        _ => Classification::Unsupported,
    }
}

/// The media type without parameters: `image/png; charset=x` -> `image/png`.
pub fn media_type_essence(content_type: &str) -> &str {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
}
