pub mod host;
pub mod queue;
pub mod recognizer;
pub mod storage;
