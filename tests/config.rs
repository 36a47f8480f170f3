use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use tempfile::TempDir;

use tag_harvester::booru::ApiSource;
use tag_harvester::config::{Config, ConfigLoader, ConfigOverrides, OutputTarget};
use tag_harvester::domain::{Layout, ScheduleMode, VariantKind};
use tag_harvester::error::HarvestError;

fn write_config(content: &str) -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("harvest.json");
    fs::write(&path, content).unwrap();
    let path = path.to_string_lossy().into_owned();
    (dir, path)
}

#[test]
fn file_values_are_applied() {
    let (_dir, path) = write_config(
        r#"{
            "source": "yandere",
            "tags_file": "my_tags.txt",
            "batch_width": 3,
            "quota": 10,
            "mode": "concurrent",
            "timeout_secs": 5,
            "retry": { "max_attempts": 4 },
            "variants": ["sample", "original"],
            "max_pages": 7
        }"#,
    );

    let resolved = ConfigLoader::resolve(Some(&path), ConfigOverrides::default()).unwrap();

    assert_eq!(resolved.source, ApiSource::Yandere);
    assert_eq!(resolved.client.endpoint, "https://yande.re/post.json");
    assert_eq!(resolved.client.timeout, Duration::from_secs(5));
    assert_eq!(resolved.run.batch_width, 3);
    assert_eq!(resolved.run.quota, 10);
    assert_eq!(resolved.run.mode, ScheduleMode::Concurrent);
    assert_eq!(resolved.run.retry.max_attempts, 4);
    assert_eq!(resolved.run.retry.delay_ms, 0);
    assert_eq!(
        resolved.run.variants,
        vec![VariantKind::Sample, VariantKind::Original]
    );
    assert_eq!(resolved.run.max_pages, Some(7));
    assert_eq!(resolved.tags_file.to_string_lossy(), "my_tags.txt");
}

#[test]
fn overrides_win_over_file() {
    let (_dir, path) = write_config(r#"{ "quota": 10, "start_line": 4 }"#);
    let overrides = ConfigOverrides {
        quota: Some(3),
        mode: Some(ScheduleMode::Concurrent),
        ..ConfigOverrides::default()
    };

    let resolved = ConfigLoader::resolve(Some(&path), overrides).unwrap();

    assert_eq!(resolved.run.quota, 3);
    assert_eq!(resolved.run.start_line, 4);
    assert_eq!(resolved.run.mode, ScheduleMode::Concurrent);
}

#[test]
fn archive_layout_defaults_under_output_dir() {
    let overrides = ConfigOverrides {
        layout: Some(Layout::Archive),
        output_dir: Some(Utf8PathBuf::from("data")),
        ..ConfigOverrides::default()
    };

    let resolved = ConfigLoader::resolve_config(Config::default(), overrides).unwrap();

    assert_matches!(
        resolved.output,
        OutputTarget::Archive { ref archive, ref log, ref staging }
            if archive == "data/images.zip" && log == "data/train.csv" && staging == "data/images"
    );
    assert_eq!(resolved.run.variants[0], VariantKind::Thumb720);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.json");

    let err = ConfigLoader::resolve(Some(&path.to_string_lossy()), ConfigOverrides::default())
        .unwrap_err();

    assert_matches!(err, HarvestError::ConfigRead(_));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let (_dir, path) = write_config("{ not json");
    let err = ConfigLoader::resolve(Some(&path), ConfigOverrides::default()).unwrap_err();
    assert_matches!(err, HarvestError::ConfigParse(_));
}

#[test]
fn unknown_variant_is_rejected() {
    let (_dir, path) = write_config(r#"{ "variants": ["huge"] }"#);
    let err = ConfigLoader::resolve(Some(&path), ConfigOverrides::default()).unwrap_err();
    assert_matches!(err, HarvestError::InvalidVariant(_));
}

#[test]
fn zero_values_are_rejected() {
    for overrides in [
        ConfigOverrides {
            batch_width: Some(0),
            ..ConfigOverrides::default()
        },
        ConfigOverrides {
            start_line: Some(0),
            ..ConfigOverrides::default()
        },
        ConfigOverrides {
            timeout_secs: Some(0),
            ..ConfigOverrides::default()
        },
    ] {
        let err = ConfigLoader::resolve_config(Config::default(), overrides).unwrap_err();
        assert_matches!(err, HarvestError::InvalidConfig(_));
    }
}

#[test]
fn blank_proxy_is_ignored() {
    let config = Config {
        proxy: Some("  ".to_string()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config, ConfigOverrides::default()).unwrap();
    assert!(resolved.client.proxy.is_none());
}

#[test]
fn path_keys_deserialize_from_file() {
    let (_dir, path) = write_config(
        r#"{
            "layout": "archive",
            "output_dir": "data",
            "archive_path": "packs/images.zip",
            "log_path": "packs/train.csv",
            "staging_dir": "tmp/staging"
        }"#,
    );

    let resolved = ConfigLoader::resolve(Some(&path), ConfigOverrides::default()).unwrap();

    assert_matches!(
        resolved.output,
        OutputTarget::Archive { ref archive, ref log, ref staging }
            if archive == "packs/images.zip" && log == "packs/train.csv" && staging == "tmp/staging"
    );
}

#[test]
fn folder_output_dir_from_file() {
    let (_dir, path) = write_config(r#"{ "output_dir": "harvested" }"#);

    let resolved = ConfigLoader::resolve(Some(&path), ConfigOverrides::default()).unwrap();

    assert_matches!(resolved.output, OutputTarget::Folders { ref root } if root == "harvested");
}
