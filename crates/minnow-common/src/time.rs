use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC850_DATE: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME_DATE: &str = "%a %b %e %H:%M:%S %Y";

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// `Last-Modified` style date, always in IMF-fixdate form.
pub fn format_http_date(dt: &DateTime<Utc>) -> String {
    dt.format(IMF_FIXDATE).to_string()
}

/// Accepts the three date forms HTTP/1.1 allows in conditional headers.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    [IMF_FIXDATE, RFC850_DATE, ASCTIME_DATE]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Timestamp format used in XML listings.
pub fn format_iso8601(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// HTTP dates carry whole seconds only.
pub fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(0)
}
