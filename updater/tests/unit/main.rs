//! Unit test harness

mod test_channel;
mod test_orchestrator;
mod test_tftp;
