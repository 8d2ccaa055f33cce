bitflags::bitflags! {
    /// Per-call directives supplied alongside a single cache operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u8 {
        /// Block until the cluster replies, even on an asynchronous cache.
        const FORCE_SYNCHRONOUS = 1 << 0;
        /// Do not wait for the cluster, even on a synchronous cache.
        const FORCE_ASYNCHRONOUS = 1 << 1;
        /// Apply the operation to the local node only.
        const CACHE_MODE_LOCAL = 1 << 2;
    }
}

impl Default for Flags {
    fn default() -> Self {
        Flags::empty()
    }
}
