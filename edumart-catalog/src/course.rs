use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CourseStatus {
    Draft,
    Published,
    Archived,
    Deleted,
}

/// What checkout needs to know about a course, as the catalog reports it right now.
/// Order items copy these fields so later catalog edits never rewrite history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourseSnapshot {
    pub id: Uuid,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub instructor_id: Uuid,
    pub instructor_name: String,
    pub original_price: Decimal,
    pub status: CourseStatus,
}

impl CourseSnapshot {
    pub fn is_purchasable(&self) -> bool {
        self.status == CourseStatus::Published && self.original_price >= Decimal::ZERO
    }
}
