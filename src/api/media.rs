//! Media type negotiation for `Accept` and `Content-Type`.

use axum::http::{header, HeaderMap};

use super::format::JSONAPI_MEDIA_TYPE;
use crate::error::ApiError;

struct MediaRange<'a> {
    essence: String,
    params: Vec<&'a str>,
    quality: f32,
}

impl MediaRange<'_> {
    /// How closely this range names `essence`: exact beats `type/*` beats `*/*`
    fn specificity(&self, essence: &str) -> Option<u8> {
        match self.essence.split_once('/') {
            Some(("*", "*")) => Some(0),
            Some((t, "*")) if essence.split_once('/').map(|(w, _)| w) == Some(t) => Some(1),
            _ if self.essence == essence => Some(2),
            _ => None,
        }
    }
}

fn parse_media_range(raw: &str) -> Option<MediaRange<'_>> {
    let mut parts = raw.split(';').map(str::trim);
    let essence = parts.next().filter(|s| !s.is_empty())?.to_ascii_lowercase();
    let mut quality = 1.0;
    let mut params = Vec::new();
    for param in parts.filter(|p| !p.is_empty()) {
        match param.split_once('=') {
            Some((name, value)) if name.trim().eq_ignore_ascii_case("q") => {
                quality = value.trim().parse::<f32>().unwrap_or(1.0);
            }
            _ => params.push(param),
        }
    }
    Some(MediaRange { essence, params, quality })
}

fn accept_ranges(headers: &HeaderMap) -> Vec<MediaRange<'_>> {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(parse_media_range)
        .collect()
}

/// The most specific range matching `essence` decides; `q=0` refuses it
fn admits(ranges: &[MediaRange<'_>], essence: &str, usable: impl Fn(&MediaRange<'_>) -> bool) -> bool {
    ranges
        .iter()
        .filter(|range| usable(*range))
        .filter_map(|range| range.specificity(essence).map(|rank| (rank, range)))
        .max_by(|(a, x), (b, y)| a.cmp(b).then(x.quality.total_cmp(&y.quality)))
        .is_some_and(|(_, range)| range.quality > 0.0)
}

fn jsonapi_params_allowed(params: &[&str]) -> bool {
    params.iter().all(|p| {
        let lower = p.to_ascii_lowercase();
        lower.starts_with("ext=") || lower.starts_with("profile=")
    })
}

/// Whether the `Accept` header admits a JSON:API or JSON response
pub fn accepts_json(headers: &HeaderMap) -> bool {
    let ranges = accept_ranges(headers);
    if ranges.is_empty() {
        return true;
    }

    admits(&ranges, JSONAPI_MEDIA_TYPE, |range| {
        range.essence != JSONAPI_MEDIA_TYPE || jsonapi_params_allowed(&range.params)
    }) || admits(&ranges, "application/json", |_| true)
}

/// Whether the `Accept` header admits `mime` (parameters on `mime` are ignored)
pub fn accepts(headers: &HeaderMap, mime: &str) -> bool {
    let Some(wanted) = parse_media_range(mime) else {
        return false;
    };
    let ranges = accept_ranges(headers);
    ranges.is_empty() || admits(&ranges, &wanted.essence, |_| true)
}

/// Require a JSON or JSON:API request body media type
pub fn ensure_json_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let raw = headers
        .get(header::CONTENT_TYPE)
        .ok_or_else(|| {
            ApiError::unsupported_media_type(format!("Content-Type must be {} or application/json", JSONAPI_MEDIA_TYPE))
        })?
        .to_str()
        .map_err(|_| ApiError::unsupported_media_type("Content-Type header is not valid text"))?;

    match parse_media_range(raw) {
        Some(range) if range.essence == "application/json" => Ok(()),
        Some(range) if range.essence == JSONAPI_MEDIA_TYPE && jsonapi_params_allowed(&range.params) => Ok(()),
        Some(range) if range.essence == JSONAPI_MEDIA_TYPE => Err(ApiError::unsupported_media_type(
            "JSON:API media type must not carry parameters other than ext or profile",
        )),
        _ => Err(ApiError::unsupported_media_type(format!(
            "Content-Type '{}' is not supported; use {} or application/json",
            raw, JSONAPI_MEDIA_TYPE
        ))),
    }
}

/// Like [`ensure_json_content_type`] but only when a body is declared
pub fn ensure_json_content_type_if_present(headers: &HeaderMap) -> Result<(), ApiError> {
    if headers.contains_key(header::CONTENT_TYPE) {
        ensure_json_content_type(headers)
    } else {
        Ok(())
    }
}
