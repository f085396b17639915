//! Instruction writers. Both are pure byte emitters and build on every host.

pub mod arm64 {
    pub mod writer;
}

pub mod x86_64 {
    pub mod writer;
}
