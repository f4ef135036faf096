pub mod baseline;
pub mod scoring;
pub mod series;
pub mod status;
