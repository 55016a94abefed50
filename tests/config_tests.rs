use std::path::PathBuf;

use sire_report::{load_config, parse_config, ConfigError, ExportFormat, ReportConfig, DEFAULT_TITLE};

#[test]
fn partial_config_falls_back_to_defaults() {
    let cfg = parse_config("title: Fleet Review\n").unwrap();
    assert_eq!(cfg.title, "Fleet Review");
    assert_eq!(cfg.output, ReportConfig::default().output);
    assert_eq!(cfg.display.width, 120);
}

#[test]
fn full_config_maps_to_emit_options() {
    let raw = "title: X\noutput:\n  dir: /tmp/reports\n  file_stem: vessel\n  formats: [html]\ndisplay:\n  width: 80\n";
    let cfg = parse_config(raw).unwrap();
    let opts = cfg.emit_options();
    assert_eq!(opts.out_dir, PathBuf::from("/tmp/reports"));
    assert_eq!(opts.file_stem, "vessel");
    assert_eq!(opts.formats, vec![ExportFormat::Html]);
    assert_eq!(cfg.display.width, 80);
}

#[test]
fn defaults_are_valid() {
    let cfg = ReportConfig::default();
    assert_eq!(cfg.title, DEFAULT_TITLE);
    assert!(cfg.validate().is_ok());
}

#[test]
fn invalid_values_are_rejected() {
    for raw in [
        "title: '  '\n",
        "output:\n  formats: []\n",
        "output:\n  file_stem: a/b\n",
        "output:\n  file_stem: '..'\n",
        "display:\n  width: 5\n",
    ] {
        match parse_config(raw) {
            Err(ConfigError::Invalid(_)) => {}
            other => panic!("expected Invalid for {:?}, got {:?}", raw, other),
        }
    }
}

#[test]
fn malformed_yaml_is_a_parse_error() {
    assert!(matches!(parse_config("title: [unclosed\n"), Err(ConfigError::Parse(_))));
    assert!(matches!(parse_config("output:\n  formats: [docx]\n"), Err(ConfigError::Parse(_))));
}

#[test]
fn missing_file_is_a_read_error() {
    let td = tempfile::tempdir().unwrap();
    let err = load_config(&td.path().join("report.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read(_)));
    assert!(err.to_string().starts_with("Failed to read config"));
}

#[test]
fn load_config_reads_yaml_file() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("report.yaml");
    std::fs::write(&path, "output:\n  file_stem: custom\n").unwrap();
    let cfg = load_config(&path).unwrap();
    assert_eq!(cfg.output.file_stem, "custom");
}
