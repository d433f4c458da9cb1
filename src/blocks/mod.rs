pub mod context;
pub mod kinds;
pub mod props;
pub mod settings;

pub use context::{LabelCatalog, NotebookContext};
pub use kinds::{
    collect_queries, BlockKind, BlockQuery, BlockSettings, ChartType, MetricSelection, QueryError,
};
pub use props::{apply_patch, parse_prop, EditorMutation, PropSchema, PropsPatch};
pub use settings::{OpenRequest, OpenRequests, SettingsPanel};
