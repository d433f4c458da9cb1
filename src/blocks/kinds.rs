//! Embeddable data block types and their typed settings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::context::NotebookContext;
use super::props::{read_json_prop, read_number_prop, read_str_prop, PropSchema, PropsPatch};
use crate::filters::{Filter, FilterError};
use crate::models::Block;
use crate::timewindow::ResolvedWindow;

pub const PROP_TITLE: &str = "title";
pub const PROP_METRIC: &str = "metric";
pub const PROP_FILTERS: &str = "filters";
pub const PROP_GROUP_BY: &str = "groupBy";
pub const PROP_FLOW_NAME: &str = "flowName";
pub const PROP_CHART_TYPE: &str = "chartType";
pub const PROP_LIMIT: &str = "limit";

#[derive(Error, Debug, PartialEq)]
pub enum QueryError {
    #[error("Block {0} has no metric selected")]
    MissingMetric(String),
    #[error("Block {0} has no flow selected")]
    MissingFlow(String),
    #[error("Invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),
}

/// Block types that render backend data. Every other block type is plain
/// editor content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockKind {
    Metric,
    Chart,
    FlowStatus,
    Heatmap,
    EventsCalendar,
}

impl BlockKind {
    pub const ALL: [BlockKind; 5] = [
        Self::Metric,
        Self::Chart,
        Self::FlowStatus,
        Self::Heatmap,
        Self::EventsCalendar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Chart => "chart",
            Self::FlowStatus => "flowStatus",
            Self::Heatmap => "heatmap",
            Self::EventsCalendar => "eventsCalendar",
        }
    }

    pub fn from_type(block_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == block_type)
    }

    pub fn of(block: &Block) -> Option<Self> {
        Self::from_type(&block.block_type)
    }

    fn uses_metric(&self) -> bool {
        matches!(self, Self::Metric | Self::Chart | Self::Heatmap)
    }

    /// Property defaults of this block type.
    pub fn schema(&self) -> PropSchema {
        let base = PropSchema::new()
            .prop(PROP_TITLE, "")
            .prop(PROP_FILTERS, "[]");
        match self {
            Self::Metric | Self::Heatmap => base.prop(PROP_METRIC, "").prop(PROP_GROUP_BY, "[]"),
            Self::Chart => base
                .prop(PROP_METRIC, "")
                .prop(PROP_GROUP_BY, "[]")
                .prop(PROP_CHART_TYPE, ChartType::default().as_str()),
            Self::FlowStatus => base
                .prop(PROP_FLOW_NAME, "")
                .prop(PROP_LIMIT, DEFAULT_FLOW_LIMIT),
            Self::EventsCalendar => base.prop(PROP_LIMIT, DEFAULT_EVENTS_LIMIT),
        }
    }

    /// A new block of this kind with every default filled in.
    pub fn new_block(&self, id: impl Into<String>) -> Block {
        let mut block = Block::new(id, self.as_str());
        self.schema().fill_defaults(&mut block);
        block
    }
}

const DEFAULT_FLOW_LIMIT: u64 = 10;
const DEFAULT_EVENTS_LIMIT: u64 = 100;

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selected metric, stored JSON-encoded in the `metric` prop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSelection {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl MetricSelection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aggregation: None,
            unit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Line,
    Bar,
    Area,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Bar => "bar",
            Self::Area => "area",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "line" => Some(Self::Line),
            "bar" => Some(Self::Bar),
            "area" => Some(Self::Area),
            _ => None,
        }
    }
}

/// Typed view of a data block's props. Malformed props read as defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSettings {
    pub block_id: String,
    pub kind: BlockKind,
    pub title: String,
    pub metric: Option<MetricSelection>,
    pub filters: Vec<Filter>,
    pub group_by: Vec<String>,
    pub flow_name: Option<String>,
    pub chart_type: ChartType,
    pub limit: Option<usize>,
}

impl BlockSettings {
    /// `None` for blocks that are not data blocks.
    pub fn from_block(block: &Block) -> Option<Self> {
        let kind = BlockKind::of(block)?;

        let limit = match kind {
            BlockKind::FlowStatus | BlockKind::EventsCalendar => {
                let default = if kind == BlockKind::FlowStatus {
                    DEFAULT_FLOW_LIMIT
                } else {
                    DEFAULT_EVENTS_LIMIT
                };
                let limit = read_number_prop(block, PROP_LIMIT)
                    .filter(|n| n.is_finite() && *n >= 1.0)
                    .map(|n| n as usize)
                    .unwrap_or(default as usize);
                Some(limit)
            }
            _ => None,
        };

        Some(Self {
            block_id: block.id.clone(),
            kind,
            title: read_str_prop(block, PROP_TITLE).unwrap_or_default().to_string(),
            metric: if kind.uses_metric() {
                read_json_prop(block, PROP_METRIC, None)
            } else {
                None
            },
            filters: read_json_prop(block, PROP_FILTERS, Vec::new()),
            group_by: if kind.uses_metric() {
                read_json_prop(block, PROP_GROUP_BY, Vec::new())
            } else {
                Vec::new()
            },
            flow_name: match kind {
                BlockKind::FlowStatus => read_str_prop(block, PROP_FLOW_NAME).map(str::to_string),
                _ => None,
            },
            chart_type: match kind {
                BlockKind::Chart => read_str_prop(block, PROP_CHART_TYPE)
                    .and_then(ChartType::parse)
                    .unwrap_or_default(),
                _ => ChartType::default(),
            },
            limit,
        })
    }

    /// Patch writing these settings back into the block's props.
    pub fn to_patch(&self) -> Result<PropsPatch, serde_json::Error> {
        let mut patch = PropsPatch::new()
            .set(PROP_TITLE, self.title.as_str())
            .set_json(PROP_FILTERS, &self.filters)?;

        if self.kind.uses_metric() {
            patch = match &self.metric {
                Some(metric) => patch.set_json(PROP_METRIC, metric)?,
                None => patch.set(PROP_METRIC, ""),
            };
            patch = patch.set_json(PROP_GROUP_BY, &self.group_by)?;
        }
        match self.kind {
            BlockKind::Chart => {
                patch = patch.set(PROP_CHART_TYPE, self.chart_type.as_str());
            }
            BlockKind::FlowStatus => {
                patch = patch.set(PROP_FLOW_NAME, self.flow_name.clone().unwrap_or_default());
            }
            _ => {}
        }
        if let Some(limit) = self.limit {
            patch = patch.set(PROP_LIMIT, limit as u64);
        }
        Ok(patch)
    }
}

/// Data request of one block: its settings combined with the notebook
/// context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockQuery {
    pub block_id: String,
    pub kind: BlockKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<MetricSelection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_name: Option<String>,
    pub filters: Vec<Filter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    pub window: ResolvedWindow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl BlockQuery {
    /// Build the query. Draft filters (no value yet) are left out.
    pub fn build(settings: &BlockSettings, ctx: &NotebookContext) -> Result<Self, QueryError> {
        if settings.kind.uses_metric() && settings.metric.is_none() {
            return Err(QueryError::MissingMetric(settings.block_id.clone()));
        }
        if settings.kind == BlockKind::FlowStatus && settings.flow_name.is_none() {
            return Err(QueryError::MissingFlow(settings.block_id.clone()));
        }

        let filters: Vec<Filter> = ctx
            .effective_filters(&settings.filters)
            .into_iter()
            .filter(|f| !f.is_draft())
            .collect();
        for filter in &filters {
            filter.validate()?;
        }

        let unknown = ctx.unknown_labels(&filters);
        if !unknown.is_empty() {
            log::warn!(
                "Query: block {} filters on unknown label(s) {:?}",
                settings.block_id,
                unknown
            );
        }

        Ok(Self {
            block_id: settings.block_id.clone(),
            kind: settings.kind,
            metric: settings.metric.clone(),
            flow_name: settings.flow_name.clone(),
            filters,
            group_by: settings.group_by.clone(),
            window: ctx.window,
            limit: settings.limit,
        })
    }
}

/// Queries for every data block in a document, nested blocks included.
/// Blocks whose settings are incomplete are skipped with a debug log.
pub fn collect_queries(blocks: &[Block], ctx: &NotebookContext) -> Vec<BlockQuery> {
    let mut queries = Vec::new();
    collect_into(blocks, ctx, &mut queries);
    queries
}

fn collect_into(blocks: &[Block], ctx: &NotebookContext, out: &mut Vec<BlockQuery>) {
    for block in blocks {
        if let Some(settings) = BlockSettings::from_block(block) {
            match BlockQuery::build(&settings, ctx) {
                Ok(query) => out.push(query),
                Err(e) => log::debug!("Query: skipping block {}: {}", block.id, e),
            }
        }
        collect_into(&block.children, ctx, out);
    }
}
