/*!
# Logvault DevKit - test doubles for the collector

Library for exercising collection runs without a real fleet:
- Mock SFTP transport that serves a canned log tree
- Mock reachability probe
- Test harness with a temporary storage root
*/

pub mod test_utils;
pub mod transport_stub;

pub use test_utils::TestHarness;
pub use transport_stub::{FailureMode, MockProbe, MockTransport};
