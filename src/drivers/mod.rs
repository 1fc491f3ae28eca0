//! Hardware watchdog driver.

pub mod watchdog;
