#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(config) = nosgraph::Config::from_toml(text) {
            let _ = config.validate();
        }
    }
});
