//! Response handling shared by every provider adapter.

use crate::{Error, Result};
use reqwest::Response;

/// Largest upstream body an adapter will buffer.
pub(crate) const MAX_RESPONSE_BYTES: usize = 32 * 1024 * 1024;

const MAX_ERROR_TEXT_CHARS: usize = 500;

/// Maps a failed `send()` or body read to the crate taxonomy, logging it on
/// the way.
///
/// The request URL is stripped first: some providers authenticate with a
/// query parameter, and reqwest's `Display` prints the full URL.
pub(crate) fn send_error(provider: &str, e: reqwest::Error) -> Error {
    let e = e.without_url();
    if e.is_timeout() {
        tracing::error!("{} request timed out: {}", provider, e);
        return Error::UpstreamTimeout(format!("{} request timed out", provider));
    }
    tracing::error!("Failed to send request to {}: {}", provider, e);
    Error::Upstream {
        status: None,
        message: format!("{} request failed", provider),
    }
}

/// Reads a successful response body, bounded by [`MAX_RESPONSE_BYTES`].
///
/// Non-2xx statuses and empty bodies become [`Error::Upstream`] carrying the
/// provider's status code.
pub(crate) async fn read_body(provider: &str, mut response: Response) -> Result<Vec<u8>> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!("{} API error (status {}): {}", provider, status, error_text);
        let error_text: String = error_text.chars().take(MAX_ERROR_TEXT_CHARS).collect();
        return Err(Error::upstream(
            status.as_u16(),
            format!("{} API error: {}", provider, error_text),
        ));
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| send_error(provider, e))? {
        if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
            tracing::error!(
                "{} response exceeded {} bytes, aborting read",
                provider,
                MAX_RESPONSE_BYTES
            );
            return Err(Error::upstream(
                status.as_u16(),
                format!("{} response exceeds {} bytes", provider, MAX_RESPONSE_BYTES),
            ));
        }
        body.extend_from_slice(&chunk);
    }

    if body.is_empty() {
        return Err(Error::upstream(
            status.as_u16(),
            format!("{} returned an empty body", provider),
        ));
    }

    Ok(body)
}

/// Content type reported by the provider, without parameters.
pub(crate) fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
}
