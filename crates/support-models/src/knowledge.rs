//! Curated knowledge entries.
//!
//! Each entry documents one technology used in company projects and is
//! tagged with a category and keywords that the retrieval step matches
//! against user questions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EntryId;

/// Closed set of technology areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechnologyCategory {
    Orchestration,
    Containerization,
    InfrastructureAsCode,
    CiCd,
    MonitoringLogging,
    Database,
    Networking,
    OperatingSystem,
    Programming,
    SystemAdministration,
}

impl TechnologyCategory {
    /// Every category, in declaration order.
    pub const ALL: [TechnologyCategory; 10] = [
        Self::Orchestration,
        Self::Containerization,
        Self::InfrastructureAsCode,
        Self::CiCd,
        Self::MonitoringLogging,
        Self::Database,
        Self::Networking,
        Self::OperatingSystem,
        Self::Programming,
        Self::SystemAdministration,
    ];

    /// Stable identifier, as stored.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Orchestration => "orchestration",
            Self::Containerization => "containerization",
            Self::InfrastructureAsCode => "infrastructure_as_code",
            Self::CiCd => "ci_cd",
            Self::MonitoringLogging => "monitoring_logging",
            Self::Database => "database",
            Self::Networking => "networking",
            Self::OperatingSystem => "operating_system",
            Self::Programming => "programming",
            Self::SystemAdministration => "system_administration",
        }
    }

    /// The category name as words, e.g. `infrastructure as code`.
    pub fn words(self) -> String {
        self.as_str().replace('_', " ")
    }
}

impl std::fmt::Display for TechnologyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TechnologyCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace([' ', '-', '/'], "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown technology category: {}", s))
    }
}

/// A documentation snippet for one technology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Unique identifier.
    pub id: EntryId,

    /// Technology name, e.g. "Kubernetes".
    pub technology_name: String,

    /// Technology area.
    pub category: TechnologyCategory,

    /// Free-text body injected into the prompt.
    pub content: String,

    /// Ordered keywords used for matching.
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Incremented on every content or keyword edit.
    pub version: u32,

    /// Who created the entry.
    pub created_by: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    /// Creates a new entry at version 1.
    pub fn new(
        technology_name: impl Into<String>,
        category: TechnologyCategory,
        content: impl Into<String>,
        keywords: Vec<String>,
        created_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntryId::new(),
            technology_name: technology_name.into(),
            category,
            content: content.into(),
            keywords,
            version: 1,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies an edit. Returns `true` when something changed, in which case
    /// the version is bumped and `updated_at` refreshed.
    pub fn edit(
        &mut self,
        content: Option<String>,
        keywords: Option<Vec<String>>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut changed = false;

        if let Some(content) = content {
            if content != self.content {
                self.content = content;
                changed = true;
            }
        }

        if let Some(keywords) = keywords {
            if keywords != self.keywords {
                self.keywords = keywords;
                changed = true;
            }
        }

        if changed {
            self.version += 1;
            self.updated_at = now;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry() -> KnowledgeEntry {
        KnowledgeEntry::new(
            "Kubernetes",
            TechnologyCategory::Orchestration,
            "Pods and deployments",
            vec!["pod".into(), "kubectl".into()],
            "system",
            Utc::now(),
        )
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(
            "infrastructure as code".parse::<TechnologyCategory>().unwrap(),
            TechnologyCategory::InfrastructureAsCode
        );
        assert_eq!("CI/CD".parse::<TechnologyCategory>().unwrap(), TechnologyCategory::CiCd);
        assert!("cooking".parse::<TechnologyCategory>().is_err());
    }

    #[test]
    fn test_category_words() {
        assert_eq!(TechnologyCategory::MonitoringLogging.words(), "monitoring logging");
        assert_eq!(TechnologyCategory::Database.words(), "database");
    }

    #[test]
    fn test_category_serde_is_snake_case() {
        let json = serde_json::to_string(&TechnologyCategory::CiCd).unwrap();
        assert_eq!(json, "\"ci_cd\"");
    }

    #[test]
    fn test_edit_bumps_version_on_change() {
        let mut e = entry();
        let later = e.updated_at + Duration::minutes(1);

        assert!(e.edit(Some("Pods, deployments and services".into()), None, later));
        assert_eq!(e.version, 2);
        assert_eq!(e.updated_at, later);

        assert!(e.edit(None, Some(vec!["pod".into()]), later));
        assert_eq!(e.version, 3);
    }

    #[test]
    fn test_edit_without_change_keeps_version() {
        let mut e = entry();
        let content = e.content.clone();
        assert!(!e.edit(Some(content), None, Utc::now()));
        assert_eq!(e.version, 1);
    }
}
