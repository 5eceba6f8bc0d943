//! Glupe blueprint resolution engine.
//!
//! Turns annotated blueprint text into oracle prompts and absorbs the
//! results:
//!
//! - [`scanner`]: blueprint text → literal spans and [`SemanticUnit`]s
//! - [`symbols`]: inheritance and parameter injection
//! - [`cache`]: content-addressed reuse and persistent state
//! - [`context`]: one resolution pass over a blueprint
//! - [`import`] / [`export`]: file inlining and output splitting
//! - [`machine`]: the bounded generate/verify state machine
//! - [`collaborator`]: oracle, verifier and sleeper traits

pub mod cache;
pub mod collaborator;
pub mod context;
pub mod export;
pub mod import;
pub mod machine;
pub mod markers;
pub mod preprocess;
pub mod repair;
pub mod scanner;
pub mod series;
pub mod symbols;
pub mod token;
pub mod unit;

pub use cache::{
    clean as clean_cache, content_hash, CacheEntry, CacheError, ContentCache, PersistentState,
};
pub use collaborator::{Oracle, OracleError, Sleeper, Verifier, VerifierReport, VerifyTarget};
pub use context::{resolve_blueprint, Piece, ResolutionContext, ResolvedBlueprint};
pub use export::{ExportError, ExportReport, ExportSplitter, TemplateStripper};
pub use import::{resolve_file, resolve_imports, ImportError, ImportOutcome};
pub use machine::{
    transition, DispatchDecision, Effect, ErrorHistory, Event, FatalReason, LoopPolicy,
    LoopState, MachineError, OracleOutcome, Verdict,
};
pub use scanner::{scan, Scan, ScanError, Segment};
pub use series::{parse_series_blueprint, BlueprintFileEntry};
pub use symbols::{ResolveWarning, SymbolTable};
pub use unit::{SemanticUnit, UnitKind};
