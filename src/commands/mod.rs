pub mod cache;
pub mod cluster;
pub mod collect;
pub mod db;
pub mod ledger;
pub mod query;
pub mod redis_link;
pub mod settings;
pub mod timeseries;
