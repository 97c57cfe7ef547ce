pub mod conversation;
pub mod geometry;
pub mod node;
pub mod priority;
pub mod projection;

pub use conversation::{NextStep, Role, Turn};
pub use geometry::{Polygon, PolygonError};
pub use node::{
	GraphUpdate, LineageError, Node, NodeId, Point, SchedulerSettings, SettingsPatch, Usage,
};
pub use priority::{PriorityBreakdown, PriorityWeights};
pub use projection::{ProjectionError, ProjectionModel};
