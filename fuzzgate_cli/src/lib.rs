//! Demo fuzz targets shared by the `fuzzgate` binary and the reproducers it writes.

pub mod demo;
