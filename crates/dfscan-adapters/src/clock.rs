//! Wall-clock timestamps for reports and responses.

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

/// Current UTC time as an RFC 3339 timestamp.
#[must_use]
pub fn iso_timestamp() -> String {
    match OffsetDateTime::now_utc().format(&Rfc3339) {
        Ok(ts) => ts,
        Err(e) => {
            debug!("Timestamp format failed: {e}");
            String::from("1970-01-01T00:00:00Z")
        }
    }
}
