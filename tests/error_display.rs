use rpx_lib::{ErrorCategory, RpxError};

#[test]
fn config_error_display_includes_message() {
    let err = RpxError::Config("missing profile dir".to_string());

    assert_eq!(format!("{}", err), "Configuration error: missing profile dir");
}

#[test]
fn io_error_display_wraps_source() {
    let io_err = std::io::Error::other("disk full");
    let err: RpxError = io_err.into();
    let rendered = format!("{}", err);

    assert!(rendered.starts_with("IO error: "));
    assert!(rendered.contains("disk full"));
}

#[test]
fn origin_helper_includes_status_and_message() {
    let err = RpxError::origin(404, "not found");

    assert_eq!(
        format!("{}", err),
        "Origin responded with status 404: not found"
    );
}

#[test]
fn navigation_helper_uses_message() {
    let err = RpxError::navigation("no response received for https://example.com");

    assert_eq!(
        format!("{}", err),
        "Navigation failed: no response received for https://example.com"
    );
}

#[test]
fn payload_serializes_with_lowercase_category() {
    let payload = RpxError::Challenge("interstitial persisted".to_string()).to_payload();
    assert_eq!(payload.category, ErrorCategory::Challenge);

    let json = serde_json::to_value(&payload).unwrap();
    assert_eq!(json["category"], "challenge");
    assert!(json["error"].as_str().unwrap().contains("interstitial"));
}
