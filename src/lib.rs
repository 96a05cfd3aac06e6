//! # sqlx-named-query
//!
//! Named-parameter query methods for SQLx, verified when they are defined rather
//! than when they first run.
//!
//! ## Features
//!
//! - **Named Placeholders**: Write `:name` in SQL and declare a parameter with the same name
//! - **Collection Expansion**: `IN(:ids)` becomes `IN(?, ?, ?)` for each call, checked against the engine's bind parameter ceiling
//! - **Definition-Time Checks**: Unresolved or unused parameters, unknown tables and columns and impossible return shapes are rejected before any call
//! - **Result Mapping**: Scalars, records with column overrides, optional and collection shapes
//! - **Observable Queries**: Re-evaluate a query whenever one of the tables it reads changes
//! - **Generic Executor Support**: Run on `MySqlPool`, `Transaction`, any SQLx `Executor`, or your own [`Executor`]
//!
//! ## Quick Start
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! sqlx = { version = "0.8", features = ["mysql", "runtime-tokio"] }
//! sqlx-named-query = "0.1"
//! ```
//!
//! ## Examples
//!
//! ### Defining and Binding a Query
//!
//! ```rust
//! use sqlx_named_query::prelude::*;
//!
//! let schema = SchemaSnapshot::new().with_table("song", ["id", "name", "release_year"]);
//!
//! let query = PreparedQuery::compile(
//!     QueryDefinition::new(
//!         "findSongsByReleaseYear",
//!         "SELECT * FROM song WHERE release_year = :year",
//!         ReturnShape::collection(ReturnShape::record(
//!             RecordShape::new("Song")
//!                 .field("id", ValueType::Integer)
//!                 .field("name", ValueType::Text),
//!         )),
//!     )
//!     .param("year", ValueType::Integer),
//!     &schema,
//!     &BinderConfig::default(),
//! )?;
//!
//! let statement = query.bind(&Arguments::new().with("year", 1995))?;
//! assert_eq!(statement.sql, "SELECT * FROM song WHERE release_year = ?");
//! # Ok::<(), sqlx_named_query::Error>(())
//! ```
//!
//! ### Running on a Pool
//!
//! ```rust,no_run
//! use sqlx::MySqlPool;
//! use sqlx_named_query::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = MySqlPool::connect("mysql://localhost/music").await?;
//! let schema = SchemaSnapshot::new().with_table("song", ["id", "name"]);
//!
//! let query = PreparedQuery::compile(
//!     QueryDefinition::new(
//!         "findNames",
//!         "SELECT name FROM song WHERE id IN(:songIds)",
//!         ReturnShape::collection(ReturnShape::Scalar(ValueType::Text)),
//!     )
//!     .collection_param("songIds", ValueType::Integer),
//!     &schema,
//!     &BinderConfig::default(),
//! )?;
//!
//! let names = query
//!     .fetch(&Arguments::new().with_list("songIds", [1, 2, 3]), &pool)
//!     .await?;
//! println!("{names:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ### Using with Transactions
//!
//! ```rust,no_run
//! use sqlx::{MySql, MySqlPool, Transaction};
//! use sqlx_named_query::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let pool = MySqlPool::connect("mysql://localhost/bank").await?;
//! let schema = SchemaSnapshot::new().with_table("accounts", ["id", "balance"]);
//! let transfer = PreparedQuery::compile(
//!     QueryDefinition::new(
//!         "adjustBalance",
//!         "UPDATE accounts SET balance = balance + :amount WHERE id = :id",
//!         ReturnShape::RowCount,
//!     )
//!     .param("amount", ValueType::Integer)
//!     .param("id", ValueType::Integer),
//!     &schema,
//!     &BinderConfig::default(),
//! )?;
//!
//! let mut tx: Transaction<MySql> = pool.begin().await?;
//! transfer
//!     .fetch(&Arguments::new().with("amount", -100).with("id", 1), &mut *tx)
//!     .await?;
//! transfer
//!     .fetch(&Arguments::new().with("amount", 100).with("id", 2), &mut *tx)
//!     .await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Observing a Query
//!
//! ```rust
//! use sqlx_named_query::prelude::*;
//! use sqlx_named_query::{BoundStatement, BoxError, ExecutionOutcome, Executor};
//! use std::sync::Arc;
//!
//! struct Counter;
//!
//! impl Executor for Counter {
//!     fn execute(&self, _: &BoundStatement) -> Result<ExecutionOutcome, BoxError> {
//!         Ok(ExecutionOutcome::Rows(RowSet::new(["total"]).with_row([3])))
//!     }
//! }
//!
//! let schema = SchemaSnapshot::new().with_table("song", ["id", "name"]);
//! let query = Arc::new(PreparedQuery::compile(
//!     QueryDefinition::new(
//!         "countSongs",
//!         "SELECT COUNT(*) AS total FROM song",
//!         ReturnShape::reactive(ReturnShape::Scalar(ValueType::Integer)),
//!     ),
//!     &schema,
//!     &BinderConfig::default(),
//! )?);
//!
//! let tracker = Arc::new(InvalidationTracker::new());
//! let subscription = query.observe(
//!     &Arguments::new(),
//!     Arc::new(Counter),
//!     tracker.clone(),
//!     |total| println!("songs: {total:?}"),
//! )?;
//!
//! tracker.notify(["song"]);
//! subscription.unsubscribe();
//! # Ok::<(), sqlx_named_query::Error>(())
//! ```
//!
//! ## How It Works
//!
//! 1. **Compile**: Scan the SQL for `:name` markers (skipping literals and comments), resolve them to parameters, classify the statement and check it against the schema
//! 2. **Bind**: For each call, expand collections, check the ceiling and build positional SQL with its values
//! 3. **Execute**: Construct a fresh SQLx `Query` for the bound statement and map the outcome to the declared return shape
//!
//! ## Limitations
//!
//! - Schema validation is token based, not a full SQL parser
//! - The SQLx adapter only supports MySQL
//!
//! ## License
//!
//! Licensed under either of Apache License, Version 2.0 or MIT license at your option.

pub mod binder;
pub mod builder;
pub mod classifier;
pub mod config;
pub mod error;
pub mod executor;
pub mod mapper;
pub mod mysql;
pub mod query;
pub mod reactive;
pub mod registry;
pub mod scanner;
pub mod schema;
pub mod shape;
pub mod value;

pub use binder::{Arguments, ParameterDecl};
pub use classifier::StatementKind;
pub use config::{BinderConfig, UnusedParameterPolicy};
pub use error::{BoxError, Error, Result};
pub use executor::{BoundStatement, ExecutionOutcome, Executor};
pub use mapper::{ColumnMapping, ColumnMismatchWarning, Mapped, MappedRecord, QueryOutput};
pub use query::{PreparedQuery, QueryDefinition};
pub use reactive::{InvalidationNotifier, InvalidationTracker, ReactiveSubscription};
pub use registry::QueryRegistry;
pub use schema::{SchemaSnapshot, SchemaSource};
pub use shape::{RecordShape, ReturnShape};
pub use value::{RowSet, Value, ValueType};

/// Convenience re-exports for common use cases
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::{
        Arguments, BinderConfig, InvalidationTracker, Mapped, PreparedQuery, QueryDefinition,
        QueryOutput, QueryRegistry, RecordShape, ReturnShape, RowSet, SchemaSnapshot, Value,
        ValueType,
    };
}
