//! The three engines that live inside this crate (the embedded and
//! data-frame engines live in their own crates, registered with the same
//! `Engine` trait at startup).

pub mod aggregation;
pub mod bigdata;
pub mod direct_sql;
pub mod row_coercion;

pub use aggregation::{AggregationEngine, AggregationServiceClient, CubeQueryRequest, UnconfiguredAggregationClient};
pub use bigdata::{BigDataEngine, ClusterGateway, ClusterGatewayFactory, UnconfiguredClusterGateway};
pub use direct_sql::DirectSqlEngine;
