pub mod catalog;
pub mod format;
pub mod normalize;
pub mod path;
pub mod request;
pub mod transform;

pub use catalog::{CatalogError, CatalogSummary, CompiledProvider, ConfigCatalog, ConfigRecords, Mapping};
pub use format::{FormatError, PreParser, PreParserRegistry};
pub use normalize::{normalize, NormalizeError, NormalizedQuote};
pub use path::{FieldPath, PathError};
pub use request::{build_request, RequestBuildError};
pub use transform::{TransformError, TransformRegistry, ValueTransform};
