#![no_main]

use libfuzzer_sys::fuzz_target;
use skylink_transport::finder::FrameSynchronizer;

/// Feed arbitrary bytes in arbitrary chunk sizes. The first byte picks the
/// chunk size; the synchronizer must never panic or hold more than one
/// frame's worth of candidate bytes.
fuzz_target!(|data: &[u8]| {
    let Some((&chunk, rest)) = data.split_first() else {
        return;
    };
    let mut sync = FrameSynchronizer::new();
    for piece in rest.chunks(usize::from(chunk.max(1))) {
        for frame in sync.feed(piece).into_iter().flatten() {
            assert!(frame.payload.len() <= 128);
        }
        assert!(sync.remaining() <= skylink_transport::frame::FRAME_LEN);
    }
});
