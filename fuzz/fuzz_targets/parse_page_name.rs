#![no_main]

use libfuzzer_sys::fuzz_target;
use snaplog_core::archive::PageName;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(name) = text.parse::<PageName>() {
        // Accepted names print back exactly as spelled.
        assert_eq!(name.to_string(), text);
        assert!(name.first_id <= name.last_id);
        assert_eq!(PageName::from_archive_path(&name.archive_path()).ok(), Some(name));
    }
});
