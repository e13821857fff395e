#![allow(dead_code)]

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::{FakeFileApi, FakeProcessor, ProcessorBehavior, QueryKind};
pub use harness::Harness;
