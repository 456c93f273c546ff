//! Page rendering: context assembly, template execution and atomic
//! persistence into the shared cache tree.
//!
//! Concurrent misses for one cache path are coalesced so the fragment source
//! and the template engine run once per path, and a failed render never
//! leaves a partial file behind.

mod pipeline;
mod types;

pub use pipeline::{
    METRIC_CACHE_WRITE_FAILED, METRIC_RENDER_COALESCED, METRIC_RENDER_FAILED, METRIC_RENDER_MS,
    METRIC_RENDER_TOTAL, RenderPipeline,
};
pub use types::{PageFields, RenderContext, RenderError, ServedPage, TemplateIdentity};
