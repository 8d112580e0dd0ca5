//! opsmon-report: ops projections and LLM report synthesis.
//!
//! # Architecture
//!
//! ```text
//! ReportPipeline::generate
//!   ├── ReportFacts::collect      (StateStore snapshot + dependency cache)
//!   ├── ReportModel::generate     first pass, one retry on transport failure
//!   ├── parse_and_validate        decode → normalize → sanitize → gate
//!   │   └── repair pass           once, when the first response is unusable
//!   ├── ReportData::fallback      when nothing usable came back
//!   └── render_report_markdown
//! ```

pub mod error;
pub mod facts;
pub mod model;
pub mod normalize;
pub mod ops;
pub mod pipeline;
pub mod prompt;
pub mod render;
pub mod schema;

pub use error::{ModelError, ReportError};
pub use facts::{REPORT_EVENTS_LIMIT, ReportFacts, SourcesInfo};
pub use model::{GenerateRequest, OllamaClient, ReportModel};
pub use normalize::{parse_and_validate, parse_report_data};
pub use ops::{OpsHealth, OpsSummary, Overall, ops_health, ops_summary};
pub use pipeline::{ReportPipeline, ReportResponse, Synthesis};
pub use render::render_report_markdown;
pub use schema::{CurrentIssue, NotableEvent, ReportData, Severity, report_json_schema};
