pub mod error;
pub mod filter;
pub mod id;
pub mod model;
pub mod normalize;
pub mod schema;
pub mod time;

pub use error::{CoreError, Result};
pub use filter::{BBox, filter_by_bbox, filter_by_types};
pub use id::{extract_id, is_qid};
pub use model::{
    Coordinates, EventFeature, EventType, FEATURE_SOURCE, FeatureCollection, Interval, RawRow,
};
pub use normalize::{merge_and_normalize, parse_point, resolve_type, to_feature};
pub use schema::validate_feature_collection;
pub use time::Timestamp;
