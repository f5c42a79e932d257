use netmon::{NetmonError, Result};

#[test]
fn test_config_error() {
    let err = NetmonError::Config("capacity must be at least 1".to_string());
    assert_eq!(err.to_string(), "配置错误: capacity must be at least 1");
}

#[test]
fn test_invalid_url() {
    let err = netmon::http::normalize_url("http://").unwrap_err();
    assert!(matches!(err, NetmonError::UrlParseError(_)));
    assert!(err.to_string().starts_with("URL 解析错误"));
}

#[test]
fn test_error_conversion_from_anyhow() {
    let anyhow_err = anyhow::anyhow!("test anyhow error");
    let netmon_err: NetmonError = anyhow_err.into();
    assert!(netmon_err.to_string().contains("test anyhow error"));
}

#[test]
fn test_config_parse_error() {
    let err = netmon::ConfigLoader::parse("capacity = \"many\"").unwrap_err();
    assert!(matches!(err, NetmonError::ConfigParse(_)));
}

#[test]
fn test_result_type() {
    fn returns_error() -> Result<()> {
        Err(NetmonError::Config("test".to_string()))
    }

    match returns_error() {
        Err(NetmonError::Config(msg)) => assert_eq!(msg, "test"),
        _ => panic!("Expected Config error"),
    }
}
