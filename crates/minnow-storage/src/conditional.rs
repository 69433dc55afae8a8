//! Precondition evaluation for `If-Match`, `If-None-Match`,
//! `If-Modified-Since` and `If-Unmodified-Since`.

use chrono::{DateTime, Utc};
use minnow_common::error::{MinnowError, Result};
use minnow_common::hash::canonical_etag;
use minnow_common::time::truncate_to_seconds;
use minnow_common::types::ObjectInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Put,
    Other,
}

impl Method {
    fn is_read(self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_unmodified_since: Option<DateTime<Utc>>,
}

impl Conditions {
    pub fn is_empty(&self) -> bool {
        self.if_match.is_none()
            && self.if_none_match.is_none()
            && self.if_modified_since.is_none()
            && self.if_unmodified_since.is_none()
    }
}

/// Decides whether a request may proceed against `object` (`None` when the
/// object does not exist).
pub fn evaluate(object: Option<&ObjectInfo>, conditions: &Conditions, method: Method) -> Result<()> {
    let Some(info) = object else {
        if conditions.if_match.is_some() {
            return Err(MinnowError::PreconditionFailed);
        }
        return Ok(());
    };
    let modified = truncate_to_seconds(info.last_modified);

    if let Some(if_match) = &conditions.if_match {
        if !etag_matches(if_match, &info.etag) {
            return Err(MinnowError::PreconditionFailed);
        }
    } else if let Some(since) = conditions.if_unmodified_since
        && modified > since
    {
        return Err(MinnowError::PreconditionFailed);
    }

    if let Some(if_none_match) = &conditions.if_none_match {
        if etag_matches(if_none_match, &info.etag) {
            return Err(not_modified_or_failed(info, method));
        }
    } else if let Some(since) = conditions.if_modified_since
        && method.is_read()
        && modified <= since
    {
        return Err(not_modified_or_failed(info, method));
    }

    Ok(())
}

fn not_modified_or_failed(info: &ObjectInfo, method: Method) -> MinnowError {
    if method.is_read() {
        MinnowError::NotModified {
            etag: info.etag.clone(),
            last_modified: info.last_modified,
        }
    } else {
        MinnowError::PreconditionFailed
    }
}

/// Matches an ETag header (possibly a comma separated list, weak tags or `*`)
/// against a stored ETag.
pub fn etag_matches(header: &str, etag: &str) -> bool {
    let etag = canonical_etag(etag);
    header.split(',').map(str::trim).any(|candidate| {
        if candidate == "*" {
            return true;
        }
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        canonical_etag(candidate) == etag
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Duration;

    use super::*;

    fn object() -> ObjectInfo {
        ObjectInfo {
            bucket: "bucket".to_string(),
            key: "key".to_string(),
            size: 11,
            etag: "5eb63bbbe01eeed093cb22bb8f5acdc3".to_string(),
            content_type: "text/plain".to_string(),
            last_modified: DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap(),
            metadata: HashMap::new(),
            parts: Vec::new(),
        }
    }

    #[test]
    fn if_match() {
        let info = object();
        let matching = Conditions {
            if_match: Some("\"5eb63bbbe01eeed093cb22bb8f5acdc3\"".to_string()),
            ..Conditions::default()
        };
        assert!(evaluate(Some(&info), &matching, Method::Get).is_ok());

        let mismatched = Conditions {
            if_match: Some("\"eb63bbbe01eeed093cb22bb8f5acdc3\"".to_string()),
            ..Conditions::default()
        };
        assert!(matches!(
            evaluate(Some(&info), &mismatched, Method::Get),
            Err(MinnowError::PreconditionFailed)
        ));

        let any = Conditions {
            if_match: Some("*".to_string()),
            ..Conditions::default()
        };
        assert!(evaluate(Some(&info), &any, Method::Put).is_ok());
        assert!(evaluate(None, &any, Method::Put).is_err());
    }

    #[test]
    fn if_none_match() {
        let info = object();
        let matching = Conditions {
            if_none_match: Some("\"other\", W/\"5eb63bbbe01eeed093cb22bb8f5acdc3\"".to_string()),
            ..Conditions::default()
        };
        assert!(matches!(
            evaluate(Some(&info), &matching, Method::Get),
            Err(MinnowError::NotModified { .. })
        ));
        assert!(matches!(
            evaluate(Some(&info), &matching, Method::Put),
            Err(MinnowError::PreconditionFailed)
        ));

        let create_only = Conditions {
            if_none_match: Some("*".to_string()),
            ..Conditions::default()
        };
        assert!(evaluate(None, &create_only, Method::Put).is_ok());
        assert!(evaluate(Some(&info), &create_only, Method::Put).is_err());

        let mismatched = Conditions {
            if_none_match: Some("\"other\"".to_string()),
            ..Conditions::default()
        };
        assert!(evaluate(Some(&info), &mismatched, Method::Get).is_ok());
    }

    #[test]
    fn modification_dates_use_whole_seconds() {
        let info = object();
        let at = truncate_to_seconds(info.last_modified);

        let later = Conditions {
            if_modified_since: Some(at + Duration::minutes(1)),
            ..Conditions::default()
        };
        assert!(matches!(
            evaluate(Some(&info), &later, Method::Head),
            Err(MinnowError::NotModified { .. })
        ));
        let same_second = Conditions {
            if_modified_since: Some(at),
            ..Conditions::default()
        };
        assert!(evaluate(Some(&info), &same_second, Method::Get).is_err());
        let earlier = Conditions {
            if_modified_since: Some(at - Duration::minutes(1)),
            ..Conditions::default()
        };
        assert!(evaluate(Some(&info), &earlier, Method::Get).is_ok());
        assert!(evaluate(Some(&info), &later, Method::Put).is_ok());

        let unmodified_before = Conditions {
            if_unmodified_since: Some(at - Duration::minutes(1)),
            ..Conditions::default()
        };
        assert!(matches!(
            evaluate(Some(&info), &unmodified_before, Method::Get),
            Err(MinnowError::PreconditionFailed)
        ));
        let unmodified_at = Conditions {
            if_unmodified_since: Some(at),
            ..Conditions::default()
        };
        assert!(evaluate(Some(&info), &unmodified_at, Method::Get).is_ok());
    }

    #[test]
    fn etag_matching_rules() {
        assert!(etag_matches("\"abc\"", "abc"));
        assert!(etag_matches("W/\"abc\"", "\"abc\""));
        assert!(etag_matches("\"x\" , \"abc\"", "abc"));
        assert!(!etag_matches("\"abcd\"", "abc"));
    }
}
