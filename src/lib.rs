//! PQL: a filter / facet / paging query language for a genomics data portal,
//! compiled into search-engine requests.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pql::{CompilerConfig, EntityType, PqlEngine, Registry};
//!
//! let registry = Arc::new(Registry::builtin()?);
//! let engine = PqlEngine::new(registry, CompilerConfig::default());
//! let request = engine.compile(EntityType::MutationCentric, "facets(*),in(sequencingStrategyNested,'WGA','WGD')")?;
//! println!("{}", request.to_json());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod ast;
pub mod backend;
pub mod builder;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod passes;
pub mod query;
pub mod registry;
pub mod token;

pub use ast::ExpressionNode;
pub use backend::{InMemoryBackend, SearchBackend, SearchResponse};
pub use config::CompilerConfig;
pub use engine::PqlEngine;
pub use error::{ErrorClass, PqlError};
pub use query::SearchRequest;
pub use registry::{EntityType, Registry};
