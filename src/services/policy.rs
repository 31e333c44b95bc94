//! Pure policy functions translating user-facing duration and quota tokens
//! into stored constraints.

use crate::errors::{ShareError, ShareResult};
use chrono::{DateTime, Duration, Utc};

/// Translate a duration token into an absolute expiry deadline.
///
/// The token table is fixed: `3h`, `1d`, `1w`, `1m` (30 days). A share that
/// should never expire must say so explicitly with `never`; anything else,
/// including an empty token, is rejected rather than silently defaulting to
/// no expiry.
pub fn expiry_from_token(token: &str, now: DateTime<Utc>) -> ShareResult<Option<DateTime<Utc>>> {
    let duration = match token.trim() {
        "3h" => Duration::hours(3),
        "1d" => Duration::days(1),
        "1w" => Duration::weeks(1),
        "1m" => Duration::days(30),
        "never" => return Ok(None),
        other => {
            return Err(ShareError::InvalidPolicy(format!(
                "unrecognized expiry choice `{other}`"
            )));
        }
    };
    Ok(Some(now + duration))
}

/// Translate a quota token into a download limit.
///
/// Absence, an empty string, or `unlimited` all mean no quota. Otherwise the
/// token must parse as a positive integer.
pub fn max_downloads_from_token(token: Option<&str>) -> ShareResult<Option<i64>> {
    let token = match token.map(str::trim) {
        None | Some("") | Some("unlimited") => return Ok(None),
        Some(token) => token,
    };
    match token.parse::<i64>() {
        Ok(limit) if limit > 0 => Ok(Some(limit)),
        _ => Err(ShareError::InvalidPolicy(format!(
            "max downloads must be a positive integer, got `{token}`"
        ))),
    }
}
