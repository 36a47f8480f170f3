use std::fs;

use assert_matches::assert_matches;
use tempfile::TempDir;

use tag_harvester::error::HarvestError;
use tag_harvester::tags::TagSource;

fn source_with(content: &str) -> (TempDir, TagSource) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tags.txt");
    fs::write(&path, content).unwrap();
    (dir, TagSource::new(path))
}

#[test]
fn blank_lines_are_skipped_but_counted() {
    let (_dir, source) = source_with("cat ears\n\n   \nblue sky\n");

    let tasks = source.read_from(1).unwrap();

    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].line_number, 1);
    assert_eq!(tasks[1].line_number, 4);
    assert_eq!(tasks[1].query, "blue sky");
    assert_eq!(source.line_count().unwrap(), 4);
}

#[test]
fn start_line_skips_earlier_lines() {
    let (_dir, source) = source_with("a\nb\nc\n");

    let tasks = source.read_from(2).unwrap();

    let numbers: Vec<u64> = tasks.iter().map(|task| task.line_number).collect();
    assert_eq!(numbers, vec![2, 3]);
}

#[test]
fn queries_are_trimmed() {
    let (_dir, source) = source_with("  red hair \r\n");

    let tasks = source.read_from(1).unwrap();

    assert_eq!(tasks[0].query, "red hair");
    assert_eq!(tasks[0].api_query(), "red_hair");
}

#[test]
fn start_past_end_yields_nothing() {
    let (_dir, source) = source_with("a\n");
    assert!(source.read_from(3).unwrap().is_empty());
}

#[test]
fn missing_file_is_source_not_found() {
    let dir = TempDir::new().unwrap();
    let source = TagSource::new(dir.path().join("nope.txt"));

    assert_matches!(source.read_from(1), Err(HarvestError::SourceNotFound(_)));
    assert_matches!(source.line_count(), Err(HarvestError::SourceNotFound(_)));
}
