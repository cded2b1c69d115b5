//! Fuzz target for Frame::decode and Payload::from_frame
//!
//! Arbitrary bytes must never panic the parser. Anything that decodes must
//! map to a coordinator event without panicking either.

#![no_main]

use duet_proto::{Frame, Payload};
use duet_server::CoordinatorEvent;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data) else {
        return;
    };

    let _ = Payload::from_frame(&frame);
    let _ = CoordinatorEvent::from_frame(1, &frame);
});
