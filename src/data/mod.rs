//! Tabular example files

pub mod csv;

pub use self::csv::{format_probability, CsvData, CsvLayout, CsvReader, CsvRow};
