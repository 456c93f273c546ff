//! Page templates: authoring dialect conversion, compilation and the
//! per-render content function table.

pub mod compile;
pub mod convert;
mod error;
pub mod functions;
pub mod registry;

pub use compile::CompiledTemplate;
pub use convert::TemplateConverter;
pub use error::{ConvertError, ConvertErrorKind, TemplateError, excerpt};
pub use functions::FunctionTable;
pub use registry::{RegistryError, TemplateRegistry};
