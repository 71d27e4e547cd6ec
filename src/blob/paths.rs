//! Object path conventions.

/// `logs/{app_slug}/{version_id}/{event_id}.log`
pub fn log_path(app_slug: &str, version_id: &str, event_id: &str) -> String {
    format!("logs/{app_slug}/{version_id}/{event_id}.log")
}

/// `{app_slug}/{version_id}/{resource_id}.{ext}`
pub fn asset_path(app_slug: &str, version_id: &str, resource_id: &str, ext: &str) -> String {
    format!("{app_slug}/{version_id}/{resource_id}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats() {
        assert_eq!(log_path("acme", "12", "evt-9"), "logs/acme/12/evt-9.log");
        assert_eq!(asset_path("acme", "12", "r1", "ipa"), "acme/12/r1.ipa");
    }
}
