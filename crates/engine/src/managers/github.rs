// SPDX-License-Identifier: MIT

//! GitHub managers: workflow-run and repository fetches, one child per repo.

use crate::error::EngineError;
use crate::manager::{typed_config, Manager, ManagerContext};
use quaero_core::{Clock, JobId};
use quaero_definition::{JobDefinition, Step};
use serde::Deserialize;
use serde_json::json;

pub const ACTIONS_FETCH_TYPE: &str = "github_actions_repo";
pub const REPO_FETCH_TYPE: &str = "github_repo";

fn validate_repos(step: &Step, repos: &[String]) -> Result<(), EngineError> {
    if repos.is_empty() {
        return Err(EngineError::invalid_config(&step.name, "repos must not be empty"));
    }
    for repo in repos {
        let mut parts = repo.split('/');
        let owner = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        if owner.is_empty() || name.is_empty() || parts.next().is_some() {
            return Err(EngineError::invalid_config(
                &step.name,
                format!("repo {repo:?} is not owner/name"),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ActionsFetchConfig {
    repos: Vec<String>,
    /// Restrict to one workflow file, e.g. "ci.yml".
    #[serde(default)]
    workflow: Option<String>,
    #[serde(default = "default_run_limit")]
    run_limit: usize,
}

fn default_run_limit() -> usize {
    50
}

pub struct GithubActionsFetchManager;

#[async_trait::async_trait]
impl<C: Clock> Manager<C> for GithubActionsFetchManager {
    fn action_type(&self) -> &'static str {
        "github_actions_fetch"
    }

    async fn create_parent_job(
        &self,
        step: &Step,
        def: &JobDefinition,
        ctx: &ManagerContext<C>,
    ) -> Result<JobId, EngineError> {
        let merged = def.step_config(step);
        let config: ActionsFetchConfig = typed_config(step, &merged)?;
        validate_repos(step, &config.repos)?;
        if config.run_limit == 0 {
            return Err(EngineError::invalid_config(&step.name, "run_limit must be positive"));
        }

        let children = config
            .repos
            .iter()
            .map(|repo| {
                let mut child_config = merged.clone();
                child_config.insert("repo".into(), json!(repo));
                child_config.insert("run_limit".into(), json!(config.run_limit));
                if let Some(workflow) = &config.workflow {
                    child_config.insert("workflow".into(), json!(workflow));
                }
                ManagerContext::<C>::child(ACTIONS_FETCH_TYPE, repo.clone(), child_config)
            })
            .collect();

        ctx.spawn_parent(def, step, children)
    }
}

#[derive(Debug, Deserialize)]
struct RepoFetchConfig {
    repos: Vec<String>,
    #[serde(default)]
    include_issues: bool,
    #[serde(default)]
    include_pulls: bool,
}

pub struct GithubRepoFetchManager;

#[async_trait::async_trait]
impl<C: Clock> Manager<C> for GithubRepoFetchManager {
    fn action_type(&self) -> &'static str {
        "github_repo_fetch"
    }

    async fn create_parent_job(
        &self,
        step: &Step,
        def: &JobDefinition,
        ctx: &ManagerContext<C>,
    ) -> Result<JobId, EngineError> {
        let merged = def.step_config(step);
        let config: RepoFetchConfig = typed_config(step, &merged)?;
        validate_repos(step, &config.repos)?;

        let children = config
            .repos
            .iter()
            .map(|repo| {
                let mut child_config = merged.clone();
                child_config.insert("repo".into(), json!(repo));
                child_config.insert("include_issues".into(), json!(config.include_issues));
                child_config.insert("include_pulls".into(), json!(config.include_pulls));
                ManagerContext::<C>::child(REPO_FETCH_TYPE, repo.clone(), child_config)
            })
            .collect();

        ctx.spawn_parent(def, step, children)
    }
}
