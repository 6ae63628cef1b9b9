//! Scripted access to the engine: CSV command scripts in, result rows out.

pub mod batch;
pub mod csv;
