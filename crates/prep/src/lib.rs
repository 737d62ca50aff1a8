pub mod preparer;
pub mod request;
pub mod worker;
