//! Project matrix: fan tests out across target environments

use gauntlet_common::{default_projects, Error as ConfigError, Project, RunConfig};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{E2eError, E2eResult};
use crate::registry::{TestCase, TestId};

/// Longest readable prefix of a slug, before the digest
const SLUG_PREFIX_MAX: usize = 80;

/// Unique key of a work item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItemId {
    pub test_id: TestId,
    pub project_name: String,
}

impl WorkItemId {
    /// File-system friendly name, used for artifact directories.
    ///
    /// The readable prefix is lossy, so a digest of the full id is appended
    /// to keep distinct work items in distinct directories.
    pub fn slug(&self) -> String {
        let raw = format!("{}-{}", self.test_id, self.project_name);
        let mut slug = String::with_capacity(raw.len() + 9);
        let mut last_dash = false;
        for c in raw.chars() {
            if slug.len() >= SLUG_PREFIX_MAX {
                break;
            }
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
                last_dash = false;
            } else if !last_dash && !slug.is_empty() {
                slug.push('-');
                last_dash = true;
            }
        }
        let mut slug = slug.trim_end_matches('-').to_string();
        if !slug.is_empty() {
            slug.push('-');
        }
        slug.push_str(&self.digest()[..8]);
        slug
    }

    /// Hex SHA-256 over the id's parts, each NUL-terminated
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for part in self
            .test_id
            .suite
            .iter()
            .chain([&self.test_id.name, &self.project_name])
        {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.project_name, self.test_id)
    }
}

/// One (test, project) pairing
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Position in expansion order; the tie-break for reporting
    pub index: usize,
    pub test: Arc<TestCase>,
    pub project: Arc<Project>,
}

impl WorkItem {
    pub fn id(&self) -> WorkItemId {
        WorkItemId {
            test_id: self.test.id().clone(),
            project_name: self.project.name.clone(),
        }
    }
}

/// Ordered, validated list of projects
#[derive(Debug, Clone)]
pub struct ProjectMatrix {
    projects: Vec<Arc<Project>>,
}

impl ProjectMatrix {
    /// Validate each project and enforce unique names
    pub fn new(projects: Vec<Project>) -> E2eResult<Self> {
        if projects.is_empty() {
            return Err(E2eError::InvalidConfig(
                "project matrix must contain at least one project".into(),
            ));
        }

        let mut seen = HashSet::new();
        for project in &projects {
            project.validate()?;
            if !seen.insert(project.name.clone()) {
                return Err(ConfigError::DuplicateProject(project.name.clone()).into());
            }
        }

        Ok(Self {
            projects: projects.into_iter().map(Arc::new).collect(),
        })
    }

    /// chromium, firefox, webkit, mobile-chrome, mobile-safari
    pub fn default_desktop_and_mobile() -> Self {
        Self {
            projects: default_projects().into_iter().map(Arc::new).collect(),
        }
    }

    pub fn from_config(config: &RunConfig) -> E2eResult<Self> {
        Self::new(config.projects.clone())
    }

    /// Keep only the named projects, in matrix order
    pub fn retain_named(&self, names: &[String]) -> E2eResult<Self> {
        if names.is_empty() {
            return Ok(self.clone());
        }
        for name in names {
            if !self.projects.iter().any(|p| &p.name == name) {
                return Err(E2eError::InvalidConfig(format!("unknown project: {}", name)));
            }
        }
        Ok(Self {
            projects: self
                .projects
                .iter()
                .filter(|p| names.contains(&p.name))
                .cloned()
                .collect(),
        })
    }

    pub fn projects(&self) -> &[Arc<Project>] {
        &self.projects
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Cross product with tests as the outer loop and projects as the inner loop
    pub fn expand(&self, tests: &[Arc<TestCase>]) -> Vec<WorkItem> {
        tests
            .iter()
            .flat_map(|test| {
                self.projects.iter().map(move |project| (test, project))
            })
            .enumerate()
            .map(|(index, (test, project))| WorkItem {
                index,
                test: Arc::clone(test),
                project: Arc::clone(project),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::body_fn;
    use gauntlet_common::Browser;

    fn tests(n: usize) -> Vec<Arc<TestCase>> {
        (0..n)
            .map(|i| {
                Arc::new(TestCase::new(
                    TestId::new(["suite"], format!("test {}", i)),
                    body_fn(|_| Box::pin(async { Ok(()) })),
                ))
            })
            .collect()
    }

    fn projects(names: &[&str]) -> Vec<Project> {
        names.iter().map(|n| Project::new(*n, Browser::Chromium)).collect()
    }

    #[test]
    fn test_expand_is_full_cross_product_in_order() {
        let matrix = ProjectMatrix::new(projects(&["chromium", "firefox", "webkit"])).unwrap();
        let items = matrix.expand(&tests(4));
        assert_eq!(items.len(), 12);

        let ids: HashSet<WorkItemId> = items.iter().map(WorkItem::id).collect();
        assert_eq!(ids.len(), 12);

        let order: Vec<(String, String)> = items
            .iter()
            .take(4)
            .map(|w| (w.test.id().name.clone(), w.project.name.clone()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("test 0".to_string(), "chromium".to_string()),
                ("test 0".to_string(), "firefox".to_string()),
                ("test 0".to_string(), "webkit".to_string()),
                ("test 1".to_string(), "chromium".to_string()),
            ]
        );
        assert!(items.iter().enumerate().all(|(i, w)| w.index == i));
    }

    #[test]
    fn test_duplicate_project_rejected() {
        let err = ProjectMatrix::new(projects(&["chromium", "chromium"])).unwrap_err();
        assert!(matches!(err, E2eError::Config(ConfigError::DuplicateProject(n)) if n == "chromium"));
    }

    #[test]
    fn test_empty_or_invalid_project_rejected() {
        assert!(ProjectMatrix::new(vec![]).is_err());
        assert!(ProjectMatrix::new(projects(&[""])).is_err());
    }

    #[test]
    fn test_retain_named() {
        let matrix = ProjectMatrix::new(projects(&["chromium", "firefox", "webkit"])).unwrap();
        let only = matrix
            .retain_named(&["webkit".to_string(), "chromium".to_string()])
            .unwrap();
        let names: Vec<_> = only.projects().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["chromium", "webkit"]);
        assert!(matrix.retain_named(&["edge".to_string()]).is_err());
    }

    #[test]
    fn test_default_matrix() {
        let matrix = ProjectMatrix::default_desktop_and_mobile();
        assert_eq!(matrix.len(), 5);
        assert!(matrix.projects()[3].is_mobile);
        assert_eq!(matrix.expand(&tests(2)).len(), 10);
    }

    #[test]
    fn test_slug() {
        let id = WorkItemId {
            test_id: TestId::new(["Todo CRUD"], "should add @smoke"),
            project_name: "mobile-chrome".into(),
        };
        let slug = id.slug();
        assert!(slug.starts_with("todo-crud-should-add-smoke-mobile-chrome-"), "{}", slug);
        assert_eq!(slug.len(), "todo-crud-should-add-smoke-mobile-chrome-".len() + 8);
        assert_eq!(slug, id.clone().slug());
    }

    #[test]
    fn test_slug_distinguishes_similar_ids() {
        let item = |suite: &[&str], name: &str, project: &str| WorkItemId {
            test_id: TestId::new(suite.iter().copied(), name),
            project_name: project.into(),
        };

        let spaced = item(&["Todo"], "add item", "chromium");
        let dashed = item(&["Todo"], "add-item", "chromium");
        assert_ne!(spaced.slug(), dashed.slug());

        // Same rendered text, different structure
        let nested = item(&["Todo", "add"], "item", "chromium");
        let flat = item(&["Todo"], "add > item", "chromium");
        assert_ne!(nested.slug(), flat.slug());

        // Titles with no ASCII at all still get their own directory
        let first = item(&["Список"], "добавить", "chromium");
        let second = item(&["Список"], "удалить", "chromium");
        assert_ne!(first.slug(), second.slug());
        assert!(first.slug().starts_with("chromium-"));

        let long = item(&["suite"], &"x".repeat(500), "chromium");
        assert!(long.slug().len() <= SLUG_PREFIX_MAX + 9);
    }
}
