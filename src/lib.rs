//! Entity REST: configuration-driven REST exposure of mapped database entities.

pub mod config;
pub mod error;
pub mod extractors;
pub mod geometry;
pub mod handlers;
pub mod migration;
pub mod record;
pub mod registry;
pub mod resource;
pub mod response;
pub mod routes;
pub mod security;
pub mod session;
pub mod sql;
pub mod state;
pub mod value;

pub use config::{load_from_dir, resolve, FullConfig, ResolvedModel, Settings};
pub use error::{AppError, ConfigError};
pub use migration::apply_migrations;
pub use registry::ResourceRegistry;
pub use resource::{AdditionalFields, Child, EntityResource, UnresolvedIds, Upserted};
pub use routes::{common_routes, rest_routes, route_table};
pub use session::{MemoryStore, PgSessionProvider, Session, SessionProvider};
pub use state::ResourceState;
