//! Rendering GPX files as annotated text and dispatching route actions.
//! （將 GPX 檔案呈現為附註文字，並分派路線動作。）
//!
//! Flow: a [`Converter`] turns the source into text, the route scanner finds
//! the segment headers, [`annotate`] adds map/elevation affordances below
//! each header, and the [`ActionDispatcher`] runs the map or elevation
//! collaborator when one is activated.

pub mod adapters;
pub mod annotate;
pub mod dispatch;
pub mod error;
pub mod view;

pub use adapters::{
    Collaborators, CommandConverter, CommandViewer, ConversionResult, Converter,
    DisplayUnavailable, ElevationRenderer, MapRenderer, RouteScript, Viewer,
};
pub use annotate::{
    annotate, Affordance, AffordanceId, AffordanceKind, Annotated, SHOW_ELEVATION_LABEL,
    SHOW_MAP_LABEL,
};
pub use dispatch::{ActionDispatcher, Activation, Shown};
pub use error::{ToolFailure, ViewError};
pub use view::{InlineImage, RouteView, SharedRouteView, SourceState, ViewMode};
