#![no_main]
use libfuzzer_sys::fuzz_target;
use swarmshare::decode_locator;

fuzz_target!(|data: &str| {
    // decode_locator() should never panic on arbitrary UTF-8 strings
    let _ = decode_locator(data);
});
