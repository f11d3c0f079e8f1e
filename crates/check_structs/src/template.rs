//! Check templates and their immutable version arena.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a check, matching the `PostgreSQL` type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "check_severity", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Ordinal value used as a model feature (LOW=1 .. CRITICAL=4).
    #[must_use]
    pub const fn numeric(self) -> f32 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 2.0,
            Self::High => 3.0,
            Self::Critical => 4.0,
        }
    }

    /// Bonus added to the rotation rule score.
    #[must_use]
    pub const fn rule_bonus(self) -> f64 {
        match self {
            Self::Critical => 50.0,
            Self::High => 25.0,
            Self::Medium | Self::Low => 0.0,
        }
    }
}

/// Where a template came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateSource {
    /// Written by an operator.
    Authored,
    /// Derived from customer feedback, optionally carrying a sentiment in `-1..=1`.
    CustomerFeedback { sentiment: Option<f32> },
}

impl TemplateSource {
    /// Sentiment attached to feedback-derived templates, `0.0` otherwise.
    #[must_use]
    pub fn sentiment(self) -> f32 {
        match self {
            Self::CustomerFeedback {
                sentiment: Some(score),
            } => score.clamp(-1.0, 1.0),
            Self::CustomerFeedback { sentiment: None } | Self::Authored => 0.0,
        }
    }
}

/// An immutable, versioned check definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub version: u32,
    /// The record this version replaces, if any.
    pub supersedes: Option<Uuid>,
    pub title: String,
    pub category: String,
    pub severity: Severity,
    /// Authored rotation weight in `0..=100`.
    pub rotation_priority: u8,
    pub include_in_rotation: bool,
    pub active: bool,
    pub source: TemplateSource,
}

impl Template {
    /// Creates a first-version authored template with default rotation settings.
    #[must_use]
    pub fn new(brand_id: Uuid, title: &str, category: &str, severity: Severity) -> Self {
        Self {
            id: Uuid::new_v4(),
            brand_id,
            version: 1,
            supersedes: None,
            title: title.to_string(),
            category: category.to_string(),
            severity,
            rotation_priority: 50,
            include_in_rotation: true,
            active: true,
            source: TemplateSource::Authored,
        }
    }

    /// Returns true if the template may enter the daily rotation at all.
    /// Priority only weights sampling, so priority 0 is still eligible.
    #[must_use]
    pub const fn is_rotation_eligible(&self) -> bool {
        self.active && self.include_in_rotation
    }
}

/// Append-only arena of template records.
///
/// Edits never mutate a record; they append a new version whose `supersedes`
/// points at the record it replaces.
#[derive(Debug, Clone, Default)]
pub struct TemplateArena {
    records: Vec<Template>,
    index: HashMap<Uuid, usize>,
    superseded: HashSet<Uuid>,
}

impl TemplateArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an arena from records in any order.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = Template>) -> Self {
        let mut arena = Self::new();
        for record in records {
            arena.insert(record);
        }
        arena
    }

    /// Inserts a record as-is. Re-inserting a known id is ignored.
    pub fn insert(&mut self, template: Template) {
        if self.index.contains_key(&template.id) {
            return;
        }
        if let Some(parent) = template.supersedes {
            self.superseded.insert(parent);
        }
        self.index.insert(template.id, self.records.len());
        self.records.push(template);
    }

    /// Appends a new version of `previous_id` produced by `edit`.
    ///
    /// Returns the id of the new record, or `None` if `previous_id` is unknown
    /// or already superseded.
    pub fn supersede(
        &mut self,
        previous_id: Uuid,
        edit: impl FnOnce(&mut Template),
    ) -> Option<Uuid> {
        if self.superseded.contains(&previous_id) {
            return None;
        }
        let previous = self.get(previous_id)?;
        let mut next = previous.clone();
        edit(&mut next);
        next.id = Uuid::new_v4();
        next.version = previous.version + 1;
        next.supersedes = Some(previous_id);
        next.brand_id = previous.brand_id;

        let id = next.id;
        self.insert(next);
        Some(id)
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&Template> {
        self.index.get(&id).and_then(|&i| self.records.get(i))
    }

    /// Returns true if a newer version of `id` exists.
    #[must_use]
    pub fn is_superseded(&self, id: Uuid) -> bool {
        self.superseded.contains(&id)
    }

    /// Iterates over head versions only.
    pub fn current(&self) -> impl Iterator<Item = &Template> {
        self.records
            .iter()
            .filter(|t| !self.superseded.contains(&t.id))
    }

    /// Walks from `id` back through its predecessors, newest first.
    #[must_use]
    pub fn lineage(&self, id: Uuid) -> Vec<&Template> {
        let mut chain = Vec::new();
        let mut cursor = self.get(id);
        while let Some(template) = cursor {
            chain.push(template);
            // Guard against malformed cycles in imported data.
            if chain.len() > self.records.len() {
                break;
            }
            cursor = template.supersedes.and_then(|parent| self.get(parent));
        }
        chain
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
