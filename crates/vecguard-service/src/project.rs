//! Project language lookup and isolation-context construction.
//!
//! A project's language comes from the relational metadata store, read-only.
//! Once a project has been seen with a language, a different answer is
//! refused: language is immutable for the life of a project.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::error;
use vecguard_types::{IsolationContext, IsolationError, Language, ProjectId};

/// Read-only view of project metadata.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    /// `None` for unknown projects.
    async fn language_of(&self, project_id: &ProjectId) -> Result<Option<Language>, IsolationError>;
}

/// Directory backed by configuration.
#[derive(Default)]
pub struct StaticProjectDirectory {
    projects: DashMap<ProjectId, Language>,
}

impl StaticProjectDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(projects: &BTreeMap<String, String>) -> Result<Self, IsolationError> {
        let directory = Self::new();
        for (project, language) in projects {
            directory.insert(ProjectId::parse(project)?, Language::parse(language)?);
        }
        Ok(directory)
    }

    pub fn insert(&self, project_id: ProjectId, language: Language) {
        self.projects.insert(project_id, language);
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

#[async_trait]
impl ProjectDirectory for StaticProjectDirectory {
    async fn language_of(
        &self,
        project_id: &ProjectId,
    ) -> Result<Option<Language>, IsolationError> {
        Ok(self.projects.get(project_id).map(|l| l.clone()))
    }
}

/// Builds `IsolationContext`s from a project id and the directory.
pub struct ContextResolver {
    directory: Arc<dyn ProjectDirectory>,
    pinned: DashMap<ProjectId, Language>,
}

impl ContextResolver {
    pub fn new(directory: Arc<dyn ProjectDirectory>) -> Self {
        Self {
            directory,
            pinned: DashMap::new(),
        }
    }

    pub async fn resolve(&self, project_id: &str) -> Result<IsolationContext, IsolationError> {
        let project_id = ProjectId::parse(project_id)?;
        let language = self
            .directory
            .language_of(&project_id)
            .await?
            .ok_or_else(|| IsolationError::context("project_id", "unknown project"))?;

        let pinned = self
            .pinned
            .entry(project_id.clone())
            .or_insert_with(|| language.clone())
            .clone();

        if pinned != language {
            error!(
                project = %project_id,
                registered = %pinned,
                reported = %language,
                "Project language changed, refusing context"
            );
            return Err(IsolationError::UnsupportedOperation(format!(
                "language of project {project_id} is immutable ({pinned}); changing it to {language} requires a migration"
            )));
        }

        Ok(IsolationContext::new(project_id, language))
    }
}
