pub mod client;
pub mod course;

pub use client::{CatalogClient, HttpCatalogClient, InMemoryCatalog};
pub use course::{CourseSnapshot, CourseStatus};
