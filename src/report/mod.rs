//! Report output.

pub mod generator;

pub use generator::{
    file_timestamp, render_references_csv, write_csv, write_reports, ReportPaths,
};
