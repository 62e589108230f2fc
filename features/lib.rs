#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

pub mod assemble;
pub mod config;
pub mod genotype;
pub mod locus;
pub mod pipeline;
pub mod types;
pub mod vcf;

#[path = "../shared/files.rs"]
pub mod files;

#[path = "../explain/mod.rs"]
pub mod explain;
