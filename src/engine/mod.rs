// Core engine - sequence resolution and transcode invocation, no UI

pub mod encode;
pub mod locate;
pub mod progress;
pub mod sequence;

pub use encode::{
    build_encode_cmd, encode, format_cmd, run_encoder, CancelFlag, Codec, EncodeError,
    EncodeInput, EncodeOptions, EncodeRequest, DEFAULT_FRAME_RATE,
};
pub use locate::Encoder;
pub use progress::{frame_marker, scan_lines, ProgressParser};
pub use sequence::{resolve, trailing_digits, SequenceDescriptor, SequenceError};
