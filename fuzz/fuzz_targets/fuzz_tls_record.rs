#![no_main]
use std::sync::Arc;

use bastion_tls::crypt::registry::AlgorithmRegistry;
use bastion_tls::record::{ReadOutcome, RecordReader};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut reader = RecordReader::new(Arc::new(AlgorithmRegistry::with_defaults()));
    let mut input = data;
    while let Ok((outcome, consumed)) = reader.read_record(input) {
        input = &input[consumed..];
        if matches!(outcome, ReadOutcome::NeedMore(_)) || input.is_empty() {
            break;
        }
    }
});
