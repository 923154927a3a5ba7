#![no_main]
use libfuzzer_sys::fuzz_target;
use swarmshare::peer::WireMessage;

fuzz_target!(|data: &[u8]| {
    if let Some((&kind, payload)) = data.split_first() {
        // Whatever decodes must encode back to the same envelope body
        if let Ok(msg) = WireMessage::decode(kind, payload) {
            let encoded = msg.encode();
            assert_eq!(&encoded[5..], payload);
        }
    }
});
