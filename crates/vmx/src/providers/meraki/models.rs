//! Meraki Dashboard API request and response bodies.
//!
//! Resource representations shared with the pipeline (organizations,
//! inventory devices, networks, tokens) live in the provider traits module
//! since they already match the API's JSON shape.

use serde::{Deserialize, Serialize};

/// Body of `POST /networks/{networkId}/devices/claim`.
#[derive(Debug, Serialize)]
pub struct ClaimDevicesRequest<'a> {
    /// Serials to claim.
    pub serials: &'a [String],
}

/// Body of `POST /networks/{networkId}/devices/remove`.
#[derive(Debug, Serialize)]
pub struct RemoveDeviceRequest<'a> {
    /// Serial to remove.
    pub serial: &'a str,
}

/// Error body returned by the Dashboard API.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error messages.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ErrorResponse {
    /// Extract a message from a raw error body, falling back to the body itself.
    pub fn message_from(body: &str) -> String {
        match serde_json::from_str::<Self>(body) {
            Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
            _ => body.to_string(),
        }
    }
}

/// Extract the `rel=next` target from an RFC 8288 `Link` header value.
pub fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut segments = part.split(';');
        let target = segments.next()?.trim();
        let is_next = segments.any(|param| {
            let param = param.trim().replace(' ', "");
            param == "rel=next" || param == "rel=\"next\""
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}
