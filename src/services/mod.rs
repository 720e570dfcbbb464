pub mod worker;

pub use worker::{JobOutcome, TransferWorker};
