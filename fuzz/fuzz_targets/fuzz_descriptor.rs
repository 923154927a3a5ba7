#![no_main]
use libfuzzer_sys::fuzz_target;
use swarmshare::decode_descriptor;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes either fail cleanly or yield a self-consistent descriptor
    if let Ok(descriptor) = decode_descriptor(data) {
        assert!(descriptor.validate().is_ok());
    }
});
