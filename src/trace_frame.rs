/// Position in a recorded execution. Frames advance event-by-event; event
/// numbers are monotone over a whole trace.
pub type FrameTime = u64;
