// SPDX-License-Identifier: MIT

use super::*;

fn write(dir: &Path, name: &str, body: &str) {
    std::fs::write(dir.join(name), body).unwrap();
}

fn minimal(id: &str) -> String {
    format!(
        r#"
id = "{id}"
name = "{id}"

[[steps]]
name = "step1"
type = "database_maintenance"
"#
    )
}

#[test]
fn loads_all_toml_files_sorted() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "b.toml", &minimal("beta"));
    write(dir.path(), "a.toml", &minimal("alpha"));
    write(dir.path(), "notes.txt", "not a definition");

    let defs = load_dir(dir.path()).unwrap();
    let ids: Vec<&str> = defs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "beta"]);
}

#[test]
fn invalid_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "good.toml", &minimal("good"));
    write(dir.path(), "broken.toml", "id = ");
    write(dir.path(), "incomplete.toml", "id = \"x\"\nname = \"x\"\n");

    let defs = load_dir(dir.path()).unwrap();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].id, "good");
}

#[test]
fn duplicate_ids_error() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "one.toml", &minimal("same"));
    write(dir.path(), "two.toml", &minimal("same"));

    let err = load_dir(dir.path()).unwrap_err();
    assert!(matches!(err, DefinitionError::Duplicate(id) if id == "same"));
}

#[test]
fn missing_directory_errors() {
    let dir = tempfile::tempdir().unwrap();
    let gone = dir.path().join("absent");
    assert!(matches!(load_dir(&gone), Err(DefinitionError::Io(..))));
}

#[test]
fn empty_directory_is_fine() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_dir(dir.path()).unwrap().is_empty());
}
