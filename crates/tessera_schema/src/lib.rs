//! Entity Publishing Engine
//!
//! # Lifecycle
//!
//! Entities are authored as metadata and promoted to live tables:
//!
//! 1. **Draft**: fields and lookups are edited freely; no table exists
//! 2. **Publish**: validated, dependencies cascaded, table created, locked
//! 3. **Modified**: metadata edited after publication
//! 4. **Publish changes**: additive ALTER, back to Published
//! 5. **Withdraw**: taken out of service, optionally dropping the table
//!
//! A publish never half-happens. Metadata, DDL and provisioning share one
//! transaction; the DDL audit log records what was attempted either way.
//!
//! # Modules
//!
//! - [`ddl`]: metadata to SQL text (pure)
//! - [`execution`]: run and audit DDL, introspect live tables
//! - [`alignment`]: add missing columns to live tables
//! - [`migration`]: data-loss risk of a proposed field list
//! - [`lock`]: lock state and field provenance rules
//! - [`store`]: validated metadata edits (Published → Modified)
//! - [`graph`]: lookup dependency ordering
//! - [`publish`]: the orchestrator
//! - [`provisioning`]: default form templates and menu nodes
//! - [`registry`]: runtime types and dynamic records
//! - [`config`]: `tessera.toml`

pub mod alignment;
pub mod config;
pub mod ddl;
pub mod execution;
pub mod graph;
pub mod lock;
pub mod migration;
pub mod provisioning;
pub mod publish;
pub mod registry;
pub mod store;

pub use ddl::{DdlSynthesizer, SqlDialect};
pub use execution::{DdlBatch, DdlExecutor, DdlJournal, ExecError, TableColumn};

pub use alignment::{AlignmentError, AlignmentOutcome, AlignmentStatus, AlignmentSummary, SchemaAlignment};
pub use config::{ConfigError, EngineConfig, PublishingConfig, WithdrawalMode};
pub use lock::{EntityLockService, EntityLocking, LockError, LockInfo, ValidationReport};
pub use migration::{MigrationEvaluator, MigrationImpact, MigrationOperation, MigrationOperationType, RiskLevel};
pub use store::{EntityStore, EntityUpdate, StoreError};

// Orchestration
pub use graph::GraphError;
pub use publish::{
    CascadeAction, CascadeStep, ChangeAnalysis, PublishError, PublishResult, PublishingService, TypeChange,
};

// Collaborators
pub use provisioning::{MenuRegistration, ProvisionError, SqliteProvisioner, TemplateProvisioner, TemplateProvisioning};
pub use registry::{
    CompileError, CompileOutcome, DescriptorCompiler, DynamicRecord, FieldValue, RuntimeEntityType, TypeCompiler,
    TypeRegistry,
};
