//! Built-in fuzz targets, one per invocation mode.

use fuzzgate_core::{
    BindingError, FuzzTarget, FuzzedDataProvider, InvocationMode, SharedCoverageMap,
};
use std::sync::OnceLock;
use tracing::info;

pub fn coverage() -> &'static SharedCoverageMap {
    static COVERAGE: OnceLock<SharedCoverageMap> = OnceLock::new();
    COVERAGE.get_or_init(SharedCoverageMap::new)
}

pub fn check_bytes(data: &[u8]) {
    coverage().mark(1);
    if data.len() > 2 && data[0] == b'B' && data[1] == b'A' && data[2] == b'D' {
        coverage().mark(2);
        panic!("BAD input detected by harness!");
    }
    if data.len() > 3 && data[0] == b'C' && data[1] == b'R' && data[2] == b'A' && data[3] == b'S' {
        coverage().mark(3);
        panic!("CRASH input detected by harness!");
    }
}

pub fn check_records(provider: &mut dyn FuzzedDataProvider) {
    coverage().mark(10);
    let count = provider.consume_u64_in_range(0, 16);
    let name = provider.consume_string(16);
    if name.starts_with("BAD") {
        coverage().mark(11);
        if count > 8 {
            coverage().mark(12);
            panic!("record {name:?} claims {count} entries");
        }
    }
}

pub fn target(mode: InvocationMode) -> Result<FuzzTarget, BindingError> {
    let builder = match mode {
        InvocationMode::Bytes => {
            FuzzTarget::builder("fuzzgate_cli::demo::check_bytes").bytes(check_bytes)
        }
        InvocationMode::Provider => {
            FuzzTarget::builder("fuzzgate_cli::demo::check_records").provider(check_records)
        }
    };
    builder
        .initialize(|| coverage().mark(0))
        .tear_down(|| {
            info!("Demo target torn down");
            Ok(())
        })
        .build()
}
