#![no_main]
use libfuzzer_sys::fuzz_target;
use swarmshare::descriptor::bencode;

fuzz_target!(|data: &[u8]| {
    // decode() should never panic, and anything it accepts is canonical
    if let Ok(value) = bencode::decode(data) {
        assert_eq!(value.encode(), data);
    }
});
