//! Restricted execution of extraction strategies.
//!
//! A strategy is a Rhai script defining one function, `extract_tools(html)`,
//! that turns a fetched document into a list of tool records. Strategies may
//! be hand written or generated, so they are treated as untrusted: the engine
//! exposes only the core language and a handful of text helpers.
//!
//! # Security Model
//!
//! - **No ambient access**: no file, socket, process or environment symbols
//!   are registered; module imports resolve nowhere and `eval` is disabled
//! - **Strict variables**: an identifier that is not declared fails to compile
//! - **Budgets**: wall-clock deadline, operation count, data sizes, call depth
//!   and returned record count are all capped
//!
//! # Example
//!
//! ```no_run
//! use trawler_sandbox::{SandboxConfig, StrategySandbox};
//!
//! # async fn demo() -> Result<(), trawler_sandbox::SandboxError> {
//! let sandbox = StrategySandbox::new(SandboxConfig::default());
//! let script = r#"
//!     fn extract_tools(html) {
//!         markdown_links(html).map(|l| #{ name: l.text, description: l.rest, url: l.url })
//!     }
//! "#;
//! let records = sandbox.execute(script, "- [Tool](https://tool.dev) - a tool").await?;
//! assert_eq!(records[0].name, "Tool");
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod helpers;
mod manager;
mod record;

pub use config::SandboxConfig;
pub use error::{SandboxError, SandboxErrorKind, SandboxResult};
pub use helpers::strip_tags;
pub use manager::{ENTRY_POINT, StrategySandbox};
pub use record::ExtractedRecord;
