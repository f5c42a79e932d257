pub mod engine;
pub mod filter;

pub use engine::{
    EndpointAggregate, Percentiles, StatsSummary, compute_percentiles, compute_stats, filter,
    group_by_endpoint, normalize_endpoint, round1, slowest, status_breakdown,
};
pub use filter::RequestFilter;
