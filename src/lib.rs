// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # refreg
//!
//! A reference registry that sits between a language-model planner and a
//! database. Storage ids (UUIDs, integer keys) never reach the model: every
//! entity is presented under a short, typed, stable reference like
//! `recipe_1`, and every reference the model writes back is resolved to its
//! storage id before a query runs.
//!
//! ## Architecture
//!
//! - **References** (`reference`): `EntityRef` parsing and per-type allocation
//! - **Registry** (`registry`): bidirectional ref ↔ storage-id map with action upgrades
//! - **Lifecycle** (`lifecycle`): recency, action transitions, retention
//! - **Artifacts** (`artifact`): `gen_` references for unsaved content and promotion
//! - **Translation** (`translate`): row ingress/egress at the database boundary
//! - **Enrichment** (`enrich`): lazy foreign-key linking and deferred labels
//! - **Persistence** (`snapshot`, `session`): versioned snapshots, turn commits
//! - **View** (`view`): the active context shown to the planner
//!
//! ## Library usage
//!
//! ```no_run
//! use refreg::record::Action;
//! use refreg::reference::{EntityType, StorageId};
//! use refreg::registry::RefRegistry;
//! use refreg::schema::RegistryConfig;
//!
//! let mut registry = RefRegistry::new(RegistryConfig::default());
//! let recipe = EntityType::new("recipe").unwrap();
//! let r = registry
//!     .register(StorageId::from("550e8400-e29b-41d4"), &recipe, "Thai Curry", Action::Read)
//!     .unwrap();
//! assert_eq!(r.to_string(), "recipe_1");
//! assert_eq!(registry.resolve_ref(&r).unwrap().as_str(), "550e8400-e29b-41d4");
//! print!("{}", registry.current_view());
//! ```

pub mod artifact;
pub mod enrich;
pub mod error;
pub mod lifecycle;
pub mod record;
pub mod reference;
pub mod registry;
pub mod schema;
pub mod session;
pub mod snapshot;
pub mod translate;
pub mod view;
