#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
#![allow(non_snake_case)]

pub mod config;
pub mod diagnostics;
pub mod effect_size;
pub mod lars;
pub mod lasso;
pub mod linalg;
pub mod outliers;
pub mod pipeline;
pub mod preprocess;
pub mod regression;
pub mod render;
pub mod report;
pub mod tree;

// Tabular input lives beside the analysis core and is pulled in by path.
#[path = "../ingest/mod.rs"]
pub mod ingest;
