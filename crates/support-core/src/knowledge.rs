//! The live knowledge base.
//!
//! Readers take an `Arc` to an immutable [`KnowledgeSnapshot`]; writers
//! persist their change, build a new snapshot from the store and swap it in.
//! A reader therefore sees either the old or the new set of entries.

use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use support_models::{KnowledgeEntry, TechnologyCategory};
use support_persistence::Persistence;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;
use crate::retrieval;

/// Immutable view of every knowledge entry at one point in time.
#[derive(Debug, Default)]
pub struct KnowledgeSnapshot {
    entries: Vec<KnowledgeEntry>,
    generation: u64,
}

impl KnowledgeSnapshot {
    pub fn entries(&self) -> &[KnowledgeEntry] {
        &self.entries
    }

    /// Increases by one on every swap.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries relevant to `query`, best first.
    pub fn select(&self, query: &str, max: usize) -> Vec<KnowledgeEntry> {
        retrieval::select(query, &self.entries, max)
            .into_iter()
            .cloned()
            .collect()
    }
}

/// One entry of a seed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedEntry {
    pub technology_name: String,
    pub category: TechnologyCategory,
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Counts from a seed import.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Accessor for the current knowledge snapshot.
pub struct KnowledgeBase {
    store: Arc<dyn Persistence>,
    current: RwLock<Arc<KnowledgeSnapshot>>,
    writer: Mutex<()>,
}

impl KnowledgeBase {
    /// Loads every stored entry into the first snapshot.
    pub async fn load(store: Arc<dyn Persistence>) -> Result<Self> {
        let entries = store.list_knowledge_entries().await?;
        info!(entries = entries.len(), "Knowledge base loaded");
        Ok(Self {
            store,
            current: RwLock::new(Arc::new(KnowledgeSnapshot {
                entries,
                generation: 1,
            })),
            writer: Mutex::new(()),
        })
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<KnowledgeSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Re-reads the store and swaps in a fresh snapshot. Returns the entry count.
    pub async fn reload(&self) -> Result<usize> {
        let _writer = self.writer.lock().await;
        self.rebuild().await
    }

    /// Creates an entry or edits the one with the same technology name
    /// (case-insensitive). The version only moves when something changed.
    pub async fn upsert(&self, seed: SeedEntry, created_by: &str, now: DateTime<Utc>) -> Result<UpsertOutcome> {
        let _writer = self.writer.lock().await;
        let outcome = self.upsert_locked(seed, created_by, now).await?;
        if outcome != UpsertOutcome::Unchanged {
            self.rebuild().await?;
        }
        Ok(outcome)
    }

    /// Imports a JSON array of [`SeedEntry`] values.
    pub async fn import_seed_file(&self, path: &Path, created_by: &str) -> Result<SeedReport> {
        let data = tokio::fs::read_to_string(path).await?;
        let seeds: Vec<SeedEntry> = serde_json::from_str(&data)?;
        self.import(seeds, created_by, Utc::now()).await
    }

    /// Upserts every seed, then swaps in one new snapshot.
    pub async fn import(&self, seeds: Vec<SeedEntry>, created_by: &str, now: DateTime<Utc>) -> Result<SeedReport> {
        let _writer = self.writer.lock().await;
        let mut report = SeedReport::default();
        for seed in seeds {
            match self.upsert_locked(seed, created_by, now).await? {
                UpsertOutcome::Created => report.created += 1,
                UpsertOutcome::Updated => report.updated += 1,
                UpsertOutcome::Unchanged => report.unchanged += 1,
            }
        }
        self.rebuild().await?;
        info!(
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            "Knowledge seed imported"
        );
        Ok(report)
    }

    async fn upsert_locked(&self, seed: SeedEntry, created_by: &str, now: DateTime<Utc>) -> Result<UpsertOutcome> {
        let existing = self
            .store
            .list_knowledge_entries()
            .await?
            .into_iter()
            .find(|e| e.technology_name.eq_ignore_ascii_case(seed.technology_name.trim()));

        match existing {
            Some(mut entry) => {
                let mut changed = entry.edit(Some(seed.content), Some(seed.keywords), now);
                if entry.category != seed.category {
                    entry.category = seed.category;
                    if !changed {
                        entry.version += 1;
                        entry.updated_at = now;
                    }
                    changed = true;
                }
                if !changed {
                    return Ok(UpsertOutcome::Unchanged);
                }
                self.store.put_knowledge_entry(&entry).await?;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                let entry = KnowledgeEntry::new(
                    seed.technology_name.trim(),
                    seed.category,
                    seed.content,
                    seed.keywords,
                    created_by,
                    now,
                );
                self.store.put_knowledge_entry(&entry).await?;
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn rebuild(&self) -> Result<usize> {
        let entries = self.store.list_knowledge_entries().await?;
        let count = entries.len();

        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let generation = current.generation + 1;
        *current = Arc::new(KnowledgeSnapshot { entries, generation });
        info!(entries = count, generation, "Knowledge snapshot swapped");
        Ok(count)
    }
}
