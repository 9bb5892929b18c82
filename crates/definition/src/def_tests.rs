// SPDX-License-Identifier: MIT

use super::*;

const NEWS_CRAWLER: &str = r#"
id = "news-crawler"
name = "News Crawler"
description = "Crawl the news site every six hours"
tags = ["news", "daily"]
schedule = "0 */6 * * *"
timeout = "30m"
enabled = true
auto_start = false
error_tolerance = "continue_on_error"

[variables]
user_agent = "quaero/1.0"

[[steps]]
name = "crawl_news"
type = "crawler"

[steps.config]
start_urls = ["https://example.com"]
include_patterns = ["^https://example\\.com/.*"]
exclude_patterns = []
max_depth = 2
max_pages = 500
follow_links = true
"#;

#[test]
fn parses_full_document() {
    let def = JobDefinition::from_toml(NEWS_CRAWLER).unwrap();
    assert_eq!(def.id, "news-crawler");
    assert_eq!(def.name, "News Crawler");
    assert_eq!(def.tags, vec!["news", "daily"]);
    assert_eq!(def.error_tolerance, ErrorTolerance::ContinueOnError);
    assert_eq!(def.timeout(), Duration::from_secs(30 * 60));
    assert!(def.cron().is_some());
    assert!(def.enabled);
    assert!(!def.auto_start);

    let step = def.step("crawl_news").unwrap();
    assert_eq!(step.action, "crawler");
    assert_eq!(step.config["max_depth"], 2);
    assert_eq!(step.config["start_urls"][0], "https://example.com");
}

#[test]
fn minimal_document_gets_defaults() {
    let def = JobDefinition::from_toml(
        r#"
id = "maint"
name = "Maintenance"

[[steps]]
name = "vacuum"
type = "database_maintenance"
"#,
    )
    .unwrap();

    assert!(def.enabled);
    assert!(!def.auto_start);
    assert_eq!(def.error_tolerance, ErrorTolerance::Strict);
    assert_eq!(def.timeout, "30m");
    assert!(def.schedule.is_none());
}

#[test]
fn deprecated_root_fields_are_ignored() {
    let def = JobDefinition::from_toml(
        r#"
id = "legacy"
name = "Legacy"
type = "crawler"
job_type = "crawler"
source_type = "web"

[[steps]]
name = "go"
type = "crawler"
"#,
    )
    .unwrap();
    assert_eq!(def.id, "legacy");
}

#[test]
fn variables_merge_under_step_config() {
    let def = JobDefinition::from_toml(
        r#"
id = "vars"
name = "Vars"

[variables]
region = "eu"
max_depth = 1

[[steps]]
name = "crawl"
type = "crawler"

[steps.config]
max_depth = 3
"#,
    )
    .unwrap();

    let merged = def.step_config(def.step("crawl").unwrap());
    assert_eq!(merged["region"], "eu");
    // Step keys overwrite globals.
    assert_eq!(merged["max_depth"], 3);
}

#[test]
fn depends_on_must_reference_earlier_step() {
    let err = JobDefinition::from_toml(
        r#"
id = "chain"
name = "Chain"

[[steps]]
name = "first"
type = "crawler"
depends_on = "second"

[[steps]]
name = "second"
type = "transform"
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("depends_on"));
}

#[test]
fn depends_on_earlier_step_is_valid() {
    let def = JobDefinition::from_toml(
        r#"
id = "chain"
name = "Chain"

[[steps]]
name = "fetch"
type = "crawler"

[[steps]]
name = "index"
type = "reindex"
depends_on = "fetch"
"#,
    )
    .unwrap();
    assert_eq!(def.steps[1].depends_on.as_deref(), Some("fetch"));
}

#[test]
fn duplicate_step_names_rejected() {
    let err = JobDefinition::from_toml(
        r#"
id = "dup"
name = "Dup"

[[steps]]
name = "a"
type = "crawler"

[[steps]]
name = "a"
type = "transform"
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("duplicate step name"));
}

#[test]
fn missing_steps_rejected() {
    let err = JobDefinition::from_toml(
        r#"
id = "empty"
name = "Empty"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, DefinitionError::Parse(_) | DefinitionError::Invalid { .. }));
}

#[test]
fn bad_schedule_rejected() {
    let err = JobDefinition::from_toml(
        r#"
id = "sched"
name = "Sched"
schedule = "every full moon"

[[steps]]
name = "a"
type = "crawler"
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("bad schedule"));
}

#[test]
fn bad_timeout_rejected() {
    let err = JobDefinition::from_toml(
        r#"
id = "t"
name = "T"
timeout = "soon"

[[steps]]
name = "a"
type = "crawler"
"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("bad timeout"));
}

#[test]
fn definition_serde_round_trip() {
    let def = JobDefinition::from_toml(NEWS_CRAWLER).unwrap();
    let json = serde_json::to_string(&def).unwrap();
    let parsed: JobDefinition = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, def);
}
