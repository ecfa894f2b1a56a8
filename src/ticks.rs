/// Measure of tracee progress: the number of retired conditional branches.
pub type Ticks = u64;
