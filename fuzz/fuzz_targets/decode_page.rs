#![no_main]

use libfuzzer_sys::fuzz_target;
use snaplog_core::archive::PageName;
use snaplog_core::archive::codec::decode_page;

fuzz_target!(|data: &[u8]| {
    let name: PageName = "1_1-2_64".parse().expect("valid name");
    // Arbitrary bytes must be rejected cleanly, never panic.
    if let Ok(batch) = decode_page(&name, data) {
        assert!(!batch.events().is_empty());
        let first = batch.events().first().map(|e| e.id);
        assert!(first >= Some(name.first_id));
    }
});
