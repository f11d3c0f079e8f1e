//! Row types that do not map one-to-one onto domain types.

use check_structs::{Segment, Severity, Store, Template, TemplateSource};
use uuid::Uuid;

/// A row of `check_templates`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TemplateRow {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub version: i32,
    pub supersedes: Option<Uuid>,
    pub title: String,
    pub category: String,
    pub severity: Severity,
    pub rotation_priority: i16,
    pub include_in_rotation: bool,
    pub active: bool,
    pub source_kind: String,
    pub sentiment: Option<f32>,
}

impl TryFrom<TemplateRow> for Template {
    type Error = anyhow::Error;

    fn try_from(row: TemplateRow) -> Result<Self, Self::Error> {
        let source = match row.source_kind.as_str() {
            "authored" => TemplateSource::Authored,
            "customer_feedback" => TemplateSource::CustomerFeedback {
                sentiment: row.sentiment,
            },
            other => anyhow::bail!("Unknown template source kind for {}: {other}", row.id),
        };

        Ok(Self {
            id: row.id,
            brand_id: row.brand_id,
            version: u32::try_from(row.version)?,
            supersedes: row.supersedes,
            title: row.title,
            category: row.category,
            severity: row.severity,
            rotation_priority: u8::try_from(row.rotation_priority.clamp(0, 100))?,
            include_in_rotation: row.include_in_rotation,
            active: row.active,
            source,
        })
    }
}

/// A row of `stores`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoreRow {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub name: String,
    pub segment: Option<Segment>,
}

impl From<StoreRow> for Store {
    fn from(row: StoreRow) -> Self {
        Self {
            id: row.id,
            brand_id: row.brand_id,
            name: row.name,
            segment: row.segment,
        }
    }
}
