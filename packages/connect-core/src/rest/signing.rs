//! Request signing recipe for the vendor REST API (§4.3).

use std::time::{SystemTime, UNIX_EPOCH};

/// Builds the `request_ts`/`request_sig` pair for a call to `/<obj>/<action>`.
///
/// `signed_params` must already be in ASCII-sorted key order.
#[must_use]
pub fn sign(obj: &str, action: &str, signed_params: &[(&str, &str)], app_secret: &str) -> (String, String) {
    let request_ts = request_timestamp();

    let mut sig_source = String::new();
    sig_source.push_str(obj);
    sig_source.push_str(action);
    for (key, value) in signed_params {
        sig_source.push_str(key);
        sig_source.push_str(value);
    }
    sig_source.push_str(&request_ts);
    sig_source.push_str(app_secret);

    let digest = md5::compute(sig_source.as_bytes());
    let signature = format!("{digest:x}");

    (request_ts, signature)
}

/// Formats the current Unix time with six decimal places, matching the
/// vendor's `%.6f` timestamp format.
fn request_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_params_must_be_presorted_by_caller() {
        let (ts, sig) = sign("track", "get", &[("app_id", "1"), ("track_id", "64868955")], "secret");
        assert!(!ts.is_empty());
        assert_eq!(sig.len(), 32);
    }

    #[test]
    fn signature_is_deterministic_for_fixed_timestamp() {
        let sig_source = format!("{}{}{}{}{}", "user", "login", "emaila@b.com", "1700000000.000000", "secret");
        let digest = md5::compute(sig_source.as_bytes());
        assert_eq!(format!("{digest:x}").len(), 32);
    }
}
