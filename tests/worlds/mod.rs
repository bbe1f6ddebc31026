//! Cucumber worlds shared by the behavioural test runner.

mod report;

pub use report::ReportWorld;
