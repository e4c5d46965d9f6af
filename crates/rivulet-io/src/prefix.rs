//! Calendar-token expansion for object-storage key prefixes.
//!
//! The literal tokens `%{YEAR}`, `%{MONTH}`, `%{DAY}`, `%{HOUR}`,
//! `%{MINUTE}`, `%{SECOND}` expand to the current UTC wall clock with
//! fixed widths (4,2,2,2,2,2). Tokens are independent; any subset may
//! appear, and unknown text passes through untouched.

use chrono::{DateTime, Utc};

/// Expand `prefix` against the current UTC wall clock.
pub fn expand(prefix: &str) -> String {
    expand_at(prefix, Utc::now())
}

fn expand_at(prefix: &str, now: DateTime<Utc>) -> String {
    prefix
        .replace("%{YEAR}", &now.format("%Y").to_string())
        .replace("%{MONTH}", &now.format("%m").to_string())
        .replace("%{DAY}", &now.format("%d").to_string())
        .replace("%{HOUR}", &now.format("%H").to_string())
        .replace("%{MINUTE}", &now.format("%M").to_string())
        .replace("%{SECOND}", &now.format("%S").to_string())
}
