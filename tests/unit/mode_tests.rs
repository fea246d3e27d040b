//! Unit tests for `ServerMode` parsing and display.

use clap::ValueEnum;

use nacos_mcp_router::mode::ServerMode;

#[test]
fn default_mode_is_stdio() {
    assert_eq!(ServerMode::default(), ServerMode::Stdio);
}

#[test]
fn modes_deserialize_from_snake_case() {
    for (raw, mode) in [
        ("\"stdio\"", ServerMode::Stdio),
        ("\"sse\"", ServerMode::Sse),
        ("\"streamable\"", ServerMode::Streamable),
    ] {
        assert_eq!(serde_json::from_str::<ServerMode>(raw).unwrap(), mode);
    }
}

#[test]
fn cli_values_match_display() {
    for mode in ServerMode::value_variants() {
        let parsed = ServerMode::from_str(&mode.to_string(), false).expect("round trip");
        assert_eq!(parsed, *mode);
    }
}
